//! tokenmap: the instance-key registry ("token map") of a keyed
//! publish/subscribe middleware, plus the write-by-handle validation path
//! built on top of it.
//!
//! Internal design:
//!
//! Summary
//! - Goal: turn an application sample, identified by its type's declared key
//!   fields, into a stable, process-unique 64-bit instance handle and back,
//!   correctly under concurrent access, and validate every write-by-handle
//!   call against that mapping.
//! - Layers:
//!   - key: the capability boundary. `KeySpec` serializes a typed sample's
//!     key fields and payload into immutable buffers; `InstanceKey` is the
//!     topic-qualified byte key, `Serdata` the serialized sample.
//!   - token_map: the registry. `TokenMap` interns keys into refcounted
//!     `Instance` entries and maintains two coupled indices (key -> entry,
//!     id -> entry) behind one mutex. `InstanceRef` is the counted RAII
//!     handle: clone increments, drop decrements and removes at zero.
//!   - entity: alive -> deleted (terminal) bookkeeping for the handles the
//!     write path validates (topics, publishers, writers, readers), with
//!     tombstoned deletions so staleness stays observable.
//!   - participant: the glue. `Participant` owns one token map and one
//!     entity registry and implements `write`, `write_ts`, `write_ih`,
//!     `write_ih_ts`, `lookup_instance` and instance register/unregister,
//!     mapping validation failures to the caller-visible `RetCode`s.
//!
//! Constraints
//! - Every operation is synchronous and bounded; no I/O inside the registry.
//! - `find_or_create` is linearizable per key: concurrent equal-key calls
//!   observe one entry and one handle.
//! - Refcount increments are lock-free; the decrement that may reach zero
//!   runs inside the index critical section, together with removal from both
//!   indices, so an entry can never be observed half-destroyed and an id is
//!   never reissued for a different key.
//! - Validation precedes mutation: a failed write leaves the registry with
//!   unchanged cardinality and unchanged refcounts.
//!
//! Why this split?
//! - The registry places no obligations on application types beyond
//!   `KeySpec`, and no obligations on the entity layer beyond the
//!   {does-not-exist, alive-as-kind, deleted} vocabulary, so each layer's
//!   contract stays small enough to test in isolation.
//! - Entries are owned exclusively by the registry; callers hold counted
//!   `InstanceRef`s, never raw ownership, so removal-on-zero cannot race
//!   into a use-after-free.

mod entity;
mod error;
pub mod key;
mod participant;
pub mod token_map;
mod token_map_proptest;

// Public surface
pub use entity::{Entity, EntityKind};
pub use error::{ApiError, Result, RetCode};
pub use key::{InstanceKey, KeySpec, Serdata, Timestamp, TopicId};
pub use participant::{Participant, Publication};
pub use token_map::{Instance, InstanceHandle, InstanceRef, TokenMap};
