//! Key/serdata capability boundary: how typed samples become immutable,
//! topic-qualified byte keys.
//!
//! The registry never inspects application types directly. A data type opts
//! in through [`KeySpec`], which serializes the declared key fields (and the
//! full sample) into owned byte buffers. Everything downstream works on those
//! buffers only, so keys of any length survive without truncation.

use core::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of a keyed topic within one participant.
///
/// Keys carry the topic they were extracted under, so identical key bytes on
/// different topics name different instances.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TopicId(pub u32);

/// Serialization capability a keyed data type provides to the registry.
///
/// `write_key` must be deterministic and side-effect-free: two samples of the
/// same instance must produce identical key bytes on every call.
pub trait KeySpec {
    /// Append the serialized declared key fields of `self`.
    fn write_key(&self, out: &mut Vec<u8>);
    /// Append the full serialized sample.
    fn write_payload(&self, out: &mut Vec<u8>);
}

/// Immutable key representation of one instance: serialized key fields plus
/// the topic they belong to. Never mutated after extraction.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct InstanceKey {
    topic: TopicId,
    bytes: Box<[u8]>,
}

impl InstanceKey {
    /// Extract the key of `sample` under `topic`.
    pub fn from_sample<T: KeySpec + ?Sized>(topic: TopicId, sample: &T) -> Self {
        let mut bytes = Vec::new();
        sample.write_key(&mut bytes);
        Self {
            topic,
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Topic this key was extracted under.
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Serialized key fields.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceKey")
            .field("topic", &self.topic)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Immutable serialized form of a keyed sample: its key plus the full
/// payload. This is what flows to the transport boundary and what an interned
/// instance owns as its founding sample.
#[derive(Clone, Debug)]
pub struct Serdata {
    key: InstanceKey,
    payload: Box<[u8]>,
}

impl Serdata {
    /// Serialize `sample` under `topic`.
    pub fn from_sample<T: KeySpec + ?Sized>(topic: TopicId, sample: &T) -> Self {
        let key = InstanceKey::from_sample(topic, sample);
        let mut payload = Vec::new();
        sample.write_payload(&mut payload);
        Self {
            key,
            payload: payload.into_boxed_slice(),
        }
    }

    /// The instance key of this sample.
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// The serialized sample payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Source timestamp in nanoseconds since the Unix epoch. Negative values are
/// rejected by the timestamped write operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Timestamp(nanos)
    }

    /// Whether this timestamp is acceptable for a timestamped write.
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}
