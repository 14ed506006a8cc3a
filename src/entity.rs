//! Entity-layer boundary: opaque handles for topics, publishers, writers and
//! readers, with alive -> deleted (terminal) state tracking.
//!
//! The registry itself knows nothing about entities; the write path consults
//! this layer first so a call racing with deletion of its own writer is
//! rejected here and never touches the token map. Deleted records are
//! tombstoned rather than removed, so a stale handle still reports "deleted
//! as kind K" instead of "does not exist".

use crate::error::ApiError;
use crate::key::TopicId;
use crate::token_map::InstanceRef;
use hashbrown::HashMap;
use slotmap::{DefaultKey, SlotMap};

/// Kinds of entities the write path distinguishes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EntityKind {
    Topic,
    Publisher,
    Writer,
    Reader,
}

/// Opaque entity handle. `Entity::nil()` (also `Default`) never resolves.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Entity(DefaultKey);

impl Entity {
    /// A handle that resolves to no entity.
    pub fn nil() -> Self {
        Entity::default()
    }
}

/// Kind-specific payload of an entity record.
pub(crate) enum EntityBody {
    Topic {
        id: TopicId,
        #[allow(dead_code)]
        name: String,
    },
    Publisher,
    Writer {
        topic: TopicId,
        /// References to the instances this writer has registered, one per
        /// distinct instance. Dropped (unreferenced) on writer deletion.
        instances: HashMap<u64, InstanceRef>,
    },
    Reader {
        topic: TopicId,
    },
}

pub(crate) struct EntityRecord {
    pub deleted: bool,
    pub body: EntityBody,
}

impl EntityRecord {
    pub fn alive(body: EntityBody) -> Self {
        Self {
            deleted: false,
            body,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self.body {
            EntityBody::Topic { .. } => EntityKind::Topic,
            EntityBody::Publisher => EntityKind::Publisher,
            EntityBody::Writer { .. } => EntityKind::Writer,
            EntityBody::Reader { .. } => EntityKind::Reader,
        }
    }
}

/// Slot arena of entity records; generational keys keep handles from aliasing
/// across unrelated participants' entities.
pub(crate) struct EntityRegistry {
    slots: SlotMap<DefaultKey, EntityRecord>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
        }
    }

    pub fn insert(&mut self, record: EntityRecord) -> Entity {
        Entity(self.slots.insert(record))
    }

    pub fn get(&self, e: Entity) -> Option<&EntityRecord> {
        self.slots.get(e.0)
    }

    pub fn get_mut(&mut self, e: Entity) -> Option<&mut EntityRecord> {
        self.slots.get_mut(e.0)
    }

    /// Tombstone `e`. Returns the instance references a deleted writer was
    /// holding so the caller can drop them outside this registry's lock.
    pub fn delete(&mut self, e: Entity) -> Result<Vec<InstanceRef>, ApiError> {
        let record = self.slots.get_mut(e.0).ok_or(ApiError::UnknownEntity)?;
        if record.deleted {
            return Err(ApiError::AlreadyDeleted);
        }
        record.deleted = true;
        let refs = match &mut record.body {
            EntityBody::Writer { instances, .. } => instances.drain().map(|(_, r)| r).collect(),
            _ => Vec::new(),
        };
        Ok(refs)
    }
}
