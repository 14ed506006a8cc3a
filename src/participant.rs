//! Write-path resolver: translates `write`/`write_ih`/`lookup_instance`
//! calls into token-map operations and entity validation, mapping registry
//! outcomes to API-level status codes.
//!
//! All validation runs before any registry mutation; a failed call is a
//! complete no-op for the token map. Lock order is entity registry first,
//! token map second, never the reverse.

use crate::entity::{Entity, EntityBody, EntityKind, EntityRecord, EntityRegistry};
use crate::error::{ApiError, Result};
use crate::key::{InstanceKey, KeySpec, Serdata, Timestamp, TopicId};
use crate::token_map::{InstanceHandle, InstanceRef, TokenMap};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// An outgoing sample at the transport hand-off boundary: the serialized
/// data with its instance handle and source timestamp attached.
#[derive(Debug)]
pub struct Publication {
    pub writer: Entity,
    pub handle: InstanceHandle,
    pub serdata: Arc<Serdata>,
    pub timestamp: Timestamp,
}

/// How a deleted writer is reported, preserving the observed asymmetry:
/// reaching it directly yields `AlreadyDeleted`, reaching it through a
/// previously captured instance handle yields `BadParameter`.
#[derive(Copy, Clone)]
enum DeletedWriter {
    Direct,
    ViaHandle,
}

/// One domain participant: owns the instance registry and the entity records
/// the write path validates against.
pub struct Participant {
    tokens: TokenMap,
    entities: RwLock<EntityRegistry>,
    next_topic: AtomicU32,
    outbox: Mutex<Vec<Publication>>,
}

impl Participant {
    pub fn new() -> Self {
        Self {
            tokens: TokenMap::new(),
            entities: RwLock::new(EntityRegistry::new()),
            next_topic: AtomicU32::new(1),
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// The participant's instance registry.
    pub fn token_map(&self) -> &TokenMap {
        &self.tokens
    }

    pub fn create_topic(&self, name: &str) -> Entity {
        let id = TopicId(self.next_topic.fetch_add(1, Ordering::Relaxed));
        let entity = self.entities.write().insert(EntityRecord::alive(EntityBody::Topic {
            id,
            name: name.to_string(),
        }));
        debug!(?entity, name, "created topic");
        entity
    }

    pub fn create_publisher(&self) -> Entity {
        let entity = self
            .entities
            .write()
            .insert(EntityRecord::alive(EntityBody::Publisher));
        debug!(?entity, "created publisher");
        entity
    }

    pub fn create_writer(&self, topic: Entity) -> Result<Entity> {
        let mut entities = self.entities.write();
        let id = Self::resolve_topic(&entities, topic)?;
        let entity = entities.insert(EntityRecord::alive(EntityBody::Writer {
            topic: id,
            instances: HashMap::new(),
        }));
        debug!(?entity, ?topic, "created writer");
        Ok(entity)
    }

    pub fn create_reader(&self, topic: Entity) -> Result<Entity> {
        let mut entities = self.entities.write();
        let id = Self::resolve_topic(&entities, topic)?;
        let entity = entities.insert(EntityRecord::alive(EntityBody::Reader { topic: id }));
        debug!(?entity, ?topic, "created reader");
        Ok(entity)
    }

    /// Delete an entity; alive -> deleted is terminal. Deleting a writer
    /// releases every instance reference it held.
    pub fn delete(&self, entity: Entity) -> Result<()> {
        let refs = self.entities.write().delete(entity)?;
        debug!(?entity, released = refs.len(), "deleted entity");
        // Unreference outside the entity lock; this may remove entries.
        drop(refs);
        Ok(())
    }

    /// Write a sample, interning its key. Returns the instance handle the
    /// sample was attached to before hand-off.
    pub fn write<T: KeySpec>(&self, writer: Entity, sample: Option<&T>) -> Result<InstanceHandle> {
        self.write_ts(writer, sample, Timestamp::now())
    }

    /// `write` with an explicit source timestamp.
    pub fn write_ts<T: KeySpec>(
        &self,
        writer: Entity,
        sample: Option<&T>,
        timestamp: Timestamp,
    ) -> Result<InstanceHandle> {
        let topic = self.resolve_writer(writer, DeletedWriter::Direct)?;
        let sample = sample.ok_or(ApiError::NullSample)?;
        if !timestamp.is_valid() {
            return Err(ApiError::InvalidTimestamp);
        }
        let serdata = Arc::new(Serdata::from_sample(topic, sample));
        let iref = self.tokens.find_or_create(&serdata);
        let handle = iref.handle();
        self.stash_instance(writer, iref)?;
        self.publish(Publication {
            writer,
            handle,
            serdata,
            timestamp,
        });
        Ok(handle)
    }

    /// Write a sample for an already-known instance handle.
    pub fn write_ih<T: KeySpec>(
        &self,
        writer: Entity,
        sample: Option<&T>,
        handle: InstanceHandle,
    ) -> Result<()> {
        self.write_ih_ts(writer, sample, handle, Timestamp::now())
    }

    /// `write_ih` with an explicit source timestamp.
    pub fn write_ih_ts<T: KeySpec>(
        &self,
        writer: Entity,
        sample: Option<&T>,
        handle: InstanceHandle,
        timestamp: Timestamp,
    ) -> Result<()> {
        let topic = self.resolve_writer(writer, DeletedWriter::ViaHandle)?;
        let sample = sample.ok_or(ApiError::NullSample)?;
        // Timestamp is validated before any registry interaction.
        if !timestamp.is_valid() {
            return Err(ApiError::InvalidTimestamp);
        }
        let entry = self.tokens.find_by_id(handle).ok_or(ApiError::BadHandle)?;
        let serdata = Arc::new(Serdata::from_sample(topic, sample));
        if entry.key() != serdata.key() {
            return Err(ApiError::WrongInstance);
        }
        // The entry already exists; the registry is not mutated further.
        self.publish(Publication {
            writer,
            handle,
            serdata,
            timestamp,
        });
        Ok(())
    }

    /// Resolve the instance handle a sample's key is interned under, or
    /// [`InstanceHandle::NIL`] for a never-seen key. Never mutates the
    /// registry. Accepts writers and readers.
    pub fn lookup_instance<T: KeySpec>(
        &self,
        entity: Entity,
        sample: Option<&T>,
    ) -> Result<InstanceHandle> {
        let topic = {
            let entities = self.entities.read();
            let record = entities.get(entity).ok_or(ApiError::UnknownEntity)?;
            let topic = match &record.body {
                EntityBody::Writer { topic, .. } => *topic,
                EntityBody::Reader { topic } => *topic,
                _ => {
                    return Err(ApiError::WrongEntityKind {
                        actual: record.kind(),
                    })
                }
            };
            if record.deleted {
                return Err(ApiError::AlreadyDeleted);
            }
            topic
        };
        let sample = sample.ok_or(ApiError::NullSample)?;
        let key = InstanceKey::from_sample(topic, sample);
        Ok(self.tokens.lookup(&key).unwrap_or(InstanceHandle::NIL))
    }

    /// Intern a sample's key on behalf of `writer` without publishing.
    /// Idempotent per (writer, key).
    pub fn register_instance<T: KeySpec>(
        &self,
        writer: Entity,
        sample: Option<&T>,
    ) -> Result<InstanceHandle> {
        let topic = self.resolve_writer(writer, DeletedWriter::Direct)?;
        let sample = sample.ok_or(ApiError::NullSample)?;
        let serdata = Arc::new(Serdata::from_sample(topic, sample));
        let iref = self.tokens.find_or_create(&serdata);
        let handle = iref.handle();
        self.stash_instance(writer, iref)?;
        Ok(handle)
    }

    /// Release `writer`'s reference on an instance it registered. The entry
    /// disappears from the registry if this was the last reference anywhere.
    pub fn unregister_instance(&self, writer: Entity, handle: InstanceHandle) -> Result<()> {
        let iref = {
            let mut entities = self.entities.write();
            let record = entities.get_mut(writer).ok_or(ApiError::UnknownEntity)?;
            if record.kind() != EntityKind::Writer {
                return Err(ApiError::WrongEntityKind {
                    actual: record.kind(),
                });
            }
            if record.deleted {
                return Err(ApiError::StaleWriter);
            }
            match &mut record.body {
                EntityBody::Writer { instances, .. } => {
                    instances.remove(&handle.raw()).ok_or(ApiError::BadHandle)?
                }
                _ => return Err(ApiError::BadHandle),
            }
        };
        // Unreference outside the entity lock.
        drop(iref);
        Ok(())
    }

    /// Drain the samples handed off to the transport boundary so far.
    pub fn take_published(&self) -> Vec<Publication> {
        std::mem::take(&mut *self.outbox.lock())
    }

    fn publish(&self, publication: Publication) {
        self.outbox.lock().push(publication);
    }

    /// Entity-handle validation for the write path: `writer` must resolve to
    /// an alive entity of writer kind. Kind is checked before liveness so a
    /// deleted publisher still reports the kind error.
    fn resolve_writer(&self, writer: Entity, deleted: DeletedWriter) -> Result<TopicId> {
        let entities = self.entities.read();
        let record = entities.get(writer).ok_or(ApiError::UnknownEntity)?;
        let topic = match &record.body {
            EntityBody::Writer { topic, .. } => *topic,
            _ => {
                return Err(ApiError::WrongEntityKind {
                    actual: record.kind(),
                })
            }
        };
        if record.deleted {
            return Err(match deleted {
                DeletedWriter::Direct => ApiError::AlreadyDeleted,
                DeletedWriter::ViaHandle => ApiError::StaleWriter,
            });
        }
        Ok(topic)
    }

    fn resolve_topic(entities: &EntityRegistry, topic: Entity) -> Result<TopicId> {
        let record = entities.get(topic).ok_or(ApiError::UnknownEntity)?;
        let id = match &record.body {
            EntityBody::Topic { id, .. } => *id,
            _ => {
                return Err(ApiError::WrongEntityKind {
                    actual: record.kind(),
                })
            }
        };
        if record.deleted {
            return Err(ApiError::AlreadyDeleted);
        }
        Ok(id)
    }

    /// Record the writer's reference to an instance it produced. Re-checks
    /// liveness: a write racing with deletion of its own writer is rejected
    /// here and the fresh reference is released, leaving the registry as if
    /// the write never happened.
    fn stash_instance(&self, writer: Entity, iref: InstanceRef) -> Result<()> {
        let mut entities = self.entities.write();
        match entities.get_mut(writer) {
            Some(record) if !record.deleted => match &mut record.body {
                EntityBody::Writer { instances, .. } => {
                    instances.entry(iref.handle().raw()).or_insert(iref);
                    Ok(())
                }
                _ => Err(ApiError::WrongEntityKind {
                    actual: record.kind(),
                }),
            },
            // Deletion won the race; dropping `iref` undoes the reference.
            _ => Err(ApiError::AlreadyDeleted),
        }
    }
}

impl Default for Participant {
    fn default() -> Self {
        Self::new()
    }
}
