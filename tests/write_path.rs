// Write-path validation suite: the externally observable contract of
// write / write_ts / write_ih / write_ih_ts / lookup_instance against the
// instance registry and the entity layer.
//
// Conventions:
// - `fixture()` builds participant -> topic -> publisher -> writer, the
//   smallest entity graph the write path validates against.
// - Assertions check both the error variant and its RetCode mapping, since
//   callers only see the latter.

use tokenmap::{
    ApiError, Entity, EntityKind, InstanceHandle, KeySpec, Participant, RetCode, Timestamp,
};

#[derive(Clone)]
struct RoundTrip {
    key: String,
    payload: Vec<u8>,
}

impl RoundTrip {
    fn new(key: &str, fill: u8) -> Self {
        Self {
            key: key.to_string(),
            payload: vec![fill; 32],
        }
    }
}

impl KeySpec for RoundTrip {
    fn write_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.key.as_bytes());
    }
    fn write_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.key.as_bytes());
        out.extend_from_slice(&self.payload);
    }
}

struct Fixture {
    dp: Participant,
    topic: Entity,
    publisher: Entity,
    writer: Entity,
}

fn fixture() -> Fixture {
    let dp = Participant::new();
    let topic = dp.create_topic("RoundTrip");
    let publisher = dp.create_publisher();
    let writer = dp.create_writer(topic).expect("writer");
    Fixture {
        dp,
        topic,
        publisher,
        writer,
    }
}

#[test]
fn write_basic() {
    let f = fixture();
    let handle = f.dp.write(f.writer, Some(&RoundTrip::new("a", b'a'))).unwrap();
    assert!(!handle.is_nil());
}

#[test]
fn write_ts_basic() {
    let f = fixture();
    f.dp.write_ts(f.writer, Some(&RoundTrip::new("a", b'a')), Timestamp::now())
        .unwrap();
}

#[test]
fn write_ih_basic() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    let written = f.dp.write(f.writer, Some(&data)).unwrap();

    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();
    assert_eq!(handle, written);

    f.dp.write_ih(f.writer, Some(&RoundTrip::new("a", b'b')), handle)
        .unwrap();
}

#[test]
fn write_ih_ts_basic() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    f.dp.write_ts(f.writer, Some(&data), Timestamp::now()).unwrap();

    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();
    f.dp.write_ih_ts(
        f.writer,
        Some(&RoundTrip::new("a", b'b')),
        handle,
        Timestamp::now(),
    )
    .unwrap();
}

/// A handle that identifies no entity is a plain bad parameter, for every
/// write variant.
#[test]
fn nil_writer_is_rejected() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    let handle = {
        f.dp.write(f.writer, Some(&data)).unwrap();
        f.dp.lookup_instance(f.writer, Some(&data)).unwrap()
    };

    let err = f.dp.write(Entity::nil(), Some(&data)).unwrap_err();
    assert_eq!(err, ApiError::UnknownEntity);
    assert_eq!(err.ret_code(), RetCode::BadParameter);

    let err = f.dp.write_ih(Entity::nil(), Some(&data), handle).unwrap_err();
    assert_eq!(err.ret_code(), RetCode::BadParameter);

    let err = f
        .dp
        .write_ih_ts(Entity::nil(), Some(&data), handle, Timestamp::now())
        .unwrap_err();
    assert_eq!(err.ret_code(), RetCode::BadParameter);
}

/// The NIL instance handle never names an instance.
#[test]
fn nil_instance_handle_is_rejected() {
    let f = fixture();
    let data = RoundTrip::new("a", b'b');

    let err = f.dp.write_ih(f.writer, Some(&data), InstanceHandle::NIL).unwrap_err();
    assert_eq!(err, ApiError::BadHandle);
    assert_eq!(err.ret_code(), RetCode::BadParameter);

    let err = f
        .dp
        .write_ih_ts(f.writer, Some(&data), InstanceHandle::NIL, Timestamp::now())
        .unwrap_err();
    assert_eq!(err, ApiError::BadHandle);
}

/// A handle whose instance has since left the registry is rejected the same
/// way as NIL.
#[test]
fn stale_instance_handle_is_rejected() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    let handle = f.dp.register_instance(f.writer, Some(&data)).unwrap();
    // Releasing the only reference removes the entry from the registry.
    f.dp.unregister_instance(f.writer, handle).unwrap();

    let err = f.dp.write_ih(f.writer, Some(&data), handle).unwrap_err();
    assert_eq!(err, ApiError::BadHandle);
    assert_eq!(err.ret_code(), RetCode::BadParameter);
}

/// Writing through an entity of the wrong kind is an illegal operation, not a
/// bad parameter.
#[test]
fn wrong_entity_kind_is_illegal_operation() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    f.dp.write(f.writer, Some(&data)).unwrap();
    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();

    let err = f.dp.write(f.publisher, Some(&data)).unwrap_err();
    assert_eq!(
        err,
        ApiError::WrongEntityKind {
            actual: EntityKind::Publisher
        }
    );
    assert_eq!(err.ret_code(), RetCode::IllegalOperation);

    let err = f.dp.write_ih(f.publisher, Some(&data), handle).unwrap_err();
    assert_eq!(err.ret_code(), RetCode::IllegalOperation);

    let err = f
        .dp
        .write_ih_ts(f.publisher, Some(&data), handle, Timestamp::now())
        .unwrap_err();
    assert_eq!(err.ret_code(), RetCode::IllegalOperation);
}

/// A handle interned under one topic does not validate against a writer of a
/// different topic: the keys differ, so this is a wrong-instance rejection.
#[test]
fn handle_from_foreign_topic_is_rejected() {
    let f = fixture();
    let data = RoundTrip::new("Keyvalue1", b'a');
    f.dp.write(f.writer, Some(&data)).unwrap();
    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();

    let other_topic = f.dp.create_topic("SimpleTypes");
    let writer2 = f.dp.create_writer(other_topic).unwrap();
    // Same key bytes, different topic.
    let foreign = RoundTrip::new("Keyvalue1", b'z');

    let err = f.dp.write_ih(writer2, Some(&foreign), handle).unwrap_err();
    assert_eq!(err, ApiError::WrongInstance);
    assert_eq!(err.ret_code(), RetCode::BadParameter);

    let err = f
        .dp
        .write_ih_ts(writer2, Some(&foreign), handle, Timestamp::now())
        .unwrap_err();
    assert_eq!(err, ApiError::WrongInstance);
}

/// A known handle with a sample of a different key value is equally wrong.
#[test]
fn handle_for_different_key_value_is_rejected() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    f.dp.write(f.writer, Some(&data)).unwrap();
    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();

    let err = f
        .dp
        .write_ih(f.writer, Some(&RoundTrip::new("b", b'a')), handle)
        .unwrap_err();
    assert_eq!(err, ApiError::WrongInstance);
}

/// Deleting the writer and then writing on it directly reports
/// AlreadyDeleted; reaching it through a previously captured instance handle
/// reports BadParameter. The asymmetry is part of the contract.
#[test]
fn closed_writer_asymmetry() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    f.dp.write(f.writer, Some(&data)).unwrap();
    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();

    f.dp.delete(f.writer).unwrap();

    let err = f.dp.write(f.writer, Some(&data)).unwrap_err();
    assert_eq!(err, ApiError::AlreadyDeleted);
    assert_eq!(err.ret_code(), RetCode::AlreadyDeleted);

    let err = f
        .dp
        .write_ih(f.writer, Some(&RoundTrip::new("a", b'b')), handle)
        .unwrap_err();
    assert_eq!(err, ApiError::StaleWriter);
    assert_eq!(err.ret_code(), RetCode::BadParameter);

    let err = f
        .dp
        .write_ih_ts(
            f.writer,
            Some(&RoundTrip::new("a", b'b')),
            handle,
            Timestamp::now(),
        )
        .unwrap_err();
    assert_eq!(err.ret_code(), RetCode::BadParameter);
}

/// Missing samples are rejected before anything else touches the registry.
#[test]
fn null_sample_is_rejected() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    f.dp.write(f.writer, Some(&data)).unwrap();
    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();
    let before = f.dp.token_map().len();

    let err = f.dp.write::<RoundTrip>(f.writer, None).unwrap_err();
    assert_eq!(err, ApiError::NullSample);
    assert_eq!(err.ret_code(), RetCode::BadParameter);

    let err = f.dp.write_ih::<RoundTrip>(f.writer, None, handle).unwrap_err();
    assert_eq!(err, ApiError::NullSample);

    let err = f
        .dp
        .write_ih_ts::<RoundTrip>(f.writer, None, handle, Timestamp::now())
        .unwrap_err();
    assert_eq!(err, ApiError::NullSample);

    let err = f.dp.lookup_instance::<RoundTrip>(f.writer, None).unwrap_err();
    assert_eq!(err, ApiError::NullSample);

    assert_eq!(f.dp.token_map().len(), before, "registry untouched");
}

/// Negative timestamps are rejected before any registry interaction, and the
/// failed call is a complete no-op.
#[test]
fn negative_timestamp_is_rejected() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    f.dp.write(f.writer, Some(&data)).unwrap();
    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();
    let before = f.dp.token_map().len();
    f.dp.take_published();

    let err = f
        .dp
        .write_ts(f.writer, Some(&RoundTrip::new("fresh", b'a')), Timestamp(-1))
        .unwrap_err();
    assert_eq!(err, ApiError::InvalidTimestamp);
    assert_eq!(err.ret_code(), RetCode::BadParameter);

    let err = f
        .dp
        .write_ih_ts(f.writer, Some(&data), handle, Timestamp(-1))
        .unwrap_err();
    assert_eq!(err, ApiError::InvalidTimestamp);

    assert_eq!(f.dp.token_map().len(), before, "no instance was created");
    assert!(f.dp.take_published().is_empty(), "nothing was handed off");
}

/// lookup_instance returns NIL for a never-written key and the interned
/// handle afterwards; it never creates.
#[test]
fn lookup_instance_peeks_without_creating() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');

    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();
    assert_eq!(handle, InstanceHandle::NIL);
    assert!(f.dp.token_map().is_empty());

    let written = f.dp.write(f.writer, Some(&data)).unwrap();
    let found = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();
    assert_eq!(found, written);
    assert_eq!(f.dp.token_map().len(), 1);
}

/// Readers may look up instances on their topic too.
#[test]
fn lookup_instance_works_for_readers() {
    let f = fixture();
    let reader = f.dp.create_reader(f.topic).unwrap();
    let data = RoundTrip::new("a", b'a');

    let written = f.dp.write(f.writer, Some(&data)).unwrap();
    let found = f.dp.lookup_instance(reader, Some(&data)).unwrap();
    assert_eq!(found, written);
}

/// Samples whose key is a very long string intern and validate like any
/// other; key storage is size-agnostic.
#[test]
fn long_string_keys_round_trip() {
    let f = fixture();
    let long_key = "This string is exactly so long that it would previously \
                    trigger a fixed-size key buffer; if key storage truncated \
                    it, the two samples below would collide or fail to match."
        .repeat(8);
    let data = RoundTrip::new(&long_key, b'1');
    let data2 = RoundTrip::new(&long_key, b'2');

    f.dp.write(f.writer, Some(&data)).unwrap();
    let handle = f.dp.lookup_instance(f.writer, Some(&data)).unwrap();
    assert!(!handle.is_nil());

    // Same key, different payload: validates against the stored key.
    f.dp.write_ih(f.writer, Some(&data2), handle).unwrap();

    // A one-character difference is a different instance.
    let mut other_key = long_key.clone();
    other_key.pop();
    let err = f
        .dp
        .write_ih(f.writer, Some(&RoundTrip::new(&other_key, b'3')), handle)
        .unwrap_err();
    assert_eq!(err, ApiError::WrongInstance);
}

/// register_instance interns without publishing; unregister_instance releases
/// the writer's reference and the entry disappears when nothing else holds it.
#[test]
fn register_and_unregister_instance() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');

    let handle = f.dp.register_instance(f.writer, Some(&data)).unwrap();
    assert!(!handle.is_nil());
    assert_eq!(f.dp.token_map().len(), 1);
    assert!(f.dp.take_published().is_empty(), "registration does not publish");

    // Idempotent per (writer, key).
    let again = f.dp.register_instance(f.writer, Some(&data)).unwrap();
    assert_eq!(again, handle);
    let entry = f.dp.token_map().find_by_id(handle).unwrap();
    assert_eq!(entry.refcount(), 1);

    f.dp.unregister_instance(f.writer, handle).unwrap();
    assert!(f.dp.token_map().is_empty());

    // The handle is gone; unregistering again is a bad handle.
    let err = f.dp.unregister_instance(f.writer, handle).unwrap_err();
    assert_eq!(err, ApiError::BadHandle);
}

/// Deleting any entity twice reports AlreadyDeleted, and deleted topics
/// cannot spawn writers.
#[test]
fn entity_deletion_is_terminal() {
    let f = fixture();
    f.dp.delete(f.publisher).unwrap();
    assert_eq!(f.dp.delete(f.publisher), Err(ApiError::AlreadyDeleted));

    f.dp.delete(f.topic).unwrap();
    assert_eq!(f.dp.create_writer(f.topic), Err(ApiError::AlreadyDeleted));
}

/// write_ih after a successful write publishes with the validated handle.
#[test]
fn publications_carry_the_validated_handle() {
    let f = fixture();
    let data = RoundTrip::new("a", b'a');
    let handle = f.dp.write(f.writer, Some(&data)).unwrap();
    f.dp.write_ih(f.writer, Some(&RoundTrip::new("a", b'b')), handle)
        .unwrap();

    let published = f.dp.take_published();
    assert_eq!(published.len(), 2);
    assert!(published.iter().all(|p| p.handle == handle));
    assert!(published.iter().all(|p| p.writer == f.writer));
}
