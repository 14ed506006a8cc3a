//! TokenMap: the instance-key registry.
//!
//! Interns each distinct [`InstanceKey`] into one reference-counted
//! [`Instance`] with a stable, process-unique 64-bit handle, and maintains
//! two coupled indices over the shared entries: key -> entry and id -> entry.
//! The registry is an explicit object owned by its participant, not ambient
//! state; clones share one underlying map.
//!
//! Concurrency discipline:
//! - Index mutation happens only inside one mutex, so `find_or_create` is
//!   linearizable per key: concurrent equal-key calls observe one entry.
//! - Refcount increments are lock-free; a holder of an [`InstanceRef`]
//!   guarantees the count is at least one, so an increment can never race the
//!   zero transition.
//! - The decrement that may reach zero is taken inside the index critical
//!   section together with removal from both indices, so no concurrent
//!   `find_or_create` can resurrect a half-destroyed entry under the same
//!   key, and an id is never reissued for a different key.

use crate::key::{InstanceKey, Serdata};
use core::hash::BuildHasher;
use hashbrown::{HashMap, HashTable};
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Stable 64-bit identifier of an interned instance.
///
/// Handles are assigned once, stay constant for the entry's lifetime and are
/// never reused for a different key while the registry lives. [`NIL`] is
/// reserved and never assigned.
///
/// [`NIL`]: InstanceHandle::NIL
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    /// The reserved nil handle; resolves to no instance.
    pub const NIL: InstanceHandle = InstanceHandle(0);

    /// Whether this is the reserved nil handle.
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Raw 64-bit value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// One interned instance: a distinct key value with its founding sample and
/// a refcount tracking how many holders keep it live.
pub struct Instance {
    handle: InstanceHandle,
    serdata: Arc<Serdata>,
    refc: AtomicU32,
}

impl Instance {
    /// The handle assigned at creation.
    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    /// The key that identifies this instance; never changes.
    pub fn key(&self) -> &InstanceKey {
        self.serdata.key()
    }

    /// The founding serialized sample, owned by the entry for its lifetime.
    pub fn serdata(&self) -> &Arc<Serdata> {
        &self.serdata
    }

    /// Current reference count. Only a momentary observation when other
    /// threads hold references.
    pub fn refcount(&self) -> u32 {
        self.refc.load(Ordering::Acquire)
    }
}

struct Indices {
    by_key: HashTable<Arc<Instance>>,
    by_id: HashMap<u64, Arc<Instance>>,
}

struct MapInner {
    hasher: RandomState,
    indices: Mutex<Indices>,
    next_id: AtomicU64,
}

impl MapInner {
    fn key_hash(&self, key: &InstanceKey) -> u64 {
        self.hasher.hash_one(key)
    }
}

impl Drop for MapInner {
    fn drop(&mut self) {
        // Callers must have released every reference they took; anything
        // still live here was leaked past the registry's lifetime.
        let live = self.indices.get_mut().by_id.len();
        if live != 0 {
            warn!(live, "token map dropped with live instances");
        }
    }
}

/// The registry. Cheap to clone; clones share one map.
#[derive(Clone)]
pub struct TokenMap {
    inner: Arc<MapInner>,
}

impl TokenMap {
    /// New, empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MapInner {
                hasher: RandomState::new(),
                indices: Mutex::new(Indices {
                    by_key: HashTable::new(),
                    by_id: HashMap::new(),
                }),
                // 0 is InstanceHandle::NIL.
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Intern the key of `serdata`: return a counted reference to the
    /// existing entry for an equal key, or create a fresh entry (refcount 1)
    /// and insert it into both indices.
    ///
    /// The returned reference is held on behalf of the caller; dropping it
    /// releases the reference.
    pub fn find_or_create(&self, serdata: &Arc<Serdata>) -> InstanceRef {
        let inner = &self.inner;
        let hash = inner.key_hash(serdata.key());
        let mut idx = inner.indices.lock();
        if let Some(entry) = idx.by_key.find(hash, |e| e.key() == serdata.key()) {
            // Under the lock the final decrement cannot run, so the entry
            // stays live across this increment.
            entry.refc.fetch_add(1, Ordering::Relaxed);
            trace!(iid = entry.handle.0, "reusing interned instance");
            return InstanceRef {
                map: inner.clone(),
                entry: entry.clone(),
            };
        }
        let handle = InstanceHandle(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Instance {
            handle,
            serdata: serdata.clone(),
            refc: AtomicU32::new(1),
        });
        idx.by_key
            .insert_unique(hash, entry.clone(), |e| inner.key_hash(e.key()));
        idx.by_id.insert(handle.0, entry.clone());
        trace!(iid = handle.0, "interned new instance");
        InstanceRef {
            map: inner.clone(),
            entry,
        }
    }

    /// Secondary-index lookup by handle. Does not change the refcount: the
    /// returned `Arc` only keeps the memory readable, not the entry interned.
    /// Unless the caller holds its own [`InstanceRef`] the instance may leave
    /// the registry while the `Arc` is held.
    pub fn find_by_id(&self, handle: InstanceHandle) -> Option<Arc<Instance>> {
        if handle.is_nil() {
            return None;
        }
        self.inner.indices.lock().by_id.get(&handle.raw()).cloned()
    }

    /// Primary-index peek: the handle for `key` if it is currently interned.
    /// Never creates and never changes any refcount.
    pub fn lookup(&self, key: &InstanceKey) -> Option<InstanceHandle> {
        let hash = self.inner.key_hash(key);
        let idx = self.inner.indices.lock();
        idx.by_key.find(hash, |e| e.key() == key).map(|e| e.handle)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.indices.lock().by_id.len()
    }

    /// Whether no entries are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TokenMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Counted RAII reference to an interned instance.
///
/// Clone increments the entry's refcount; drop decrements it and, at zero,
/// removes the entry from both indices in the same critical section.
pub struct InstanceRef {
    map: Arc<MapInner>,
    entry: Arc<Instance>,
}

impl InstanceRef {
    /// The referenced instance's handle.
    pub fn handle(&self) -> InstanceHandle {
        self.entry.handle()
    }

    /// The referenced instance's key.
    pub fn key(&self) -> &InstanceKey {
        self.entry.key()
    }

    /// The referenced instance's founding sample.
    pub fn serdata(&self) -> &Arc<Serdata> {
        self.entry.serdata()
    }
}

impl Clone for InstanceRef {
    fn clone(&self) -> Self {
        // Holding `self` proves the count is >= 1, so this cannot race the
        // zero transition; no lock needed.
        self.entry.refc.fetch_add(1, Ordering::Relaxed);
        Self {
            map: self.map.clone(),
            entry: self.entry.clone(),
        }
    }
}

impl Drop for InstanceRef {
    fn drop(&mut self) {
        // Fast path: while another reference certainly remains, decrement
        // lock-free.
        let mut c = self.entry.refc.load(Ordering::Relaxed);
        while c > 1 {
            match self.entry.refc.compare_exchange_weak(
                c,
                c - 1,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(cur) => c = cur,
            }
        }
        // Possibly the last reference: perform the decrement inside the index
        // critical section so the zero transition and dual-index removal are
        // one atomic step with respect to find_or_create.
        let mut idx = self.map.indices.lock();
        if self.entry.refc.fetch_sub(1, Ordering::AcqRel) == 1 {
            let hash = self.map.key_hash(self.entry.key());
            let iid = self.entry.handle();
            if let Ok(occupied) = idx.by_key.find_entry(hash, |e| e.handle() == iid) {
                occupied.remove();
            }
            idx.by_id.remove(&iid.raw());
            trace!(iid = iid.raw(), "removed instance at refcount zero");
        }
    }
}

impl PartialEq for InstanceRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Eq for InstanceRef {}

impl core::fmt::Debug for InstanceRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InstanceRef")
            .field("iid", &self.entry.handle())
            .field("key", self.entry.key())
            .finish()
    }
}
