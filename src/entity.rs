//! Entity Registry (Component A): identity allocation and soft-delete
//! state for the entities that carry components, attributes and domain
//! memberships.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::clock::Timestamp;
use crate::error::{EngineError, Result};
use crate::ids::EntityId;

/// An entity is an anonymous identity; everything interesting about it
/// (what it *is*) lives in its components.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
    pub notes: String,
    pub content_types: HashSet<&'static str>,
}

impl Entity {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Owns entity identity and soft/hard delete state. Ids are never
/// reused: once hard-deleted, `EntityId` is permanently absent.
pub struct EntityRegistry {
    entities: RwLock<HashMap<EntityId, Entity>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl EntityRegistry {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            entities: RwLock::new(HashMap::with_capacity(initial_capacity)),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Allocates a fresh entity with no components. Called by the
    /// component store the first time a caller doesn't supply an
    /// existing entity to `create_component`.
    pub fn create(&self, now: Timestamp) -> EntityId {
        let id = EntityId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        let entity = Entity {
            id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            notes: String::new(),
            content_types: HashSet::new(),
        };
        self.entities.write().insert(id, entity);
        id
    }

    /// Default view: returns `NotFound` for soft- or hard-deleted
    /// entities, matching `objects` (not `objects_archive`).
    pub fn get(&self, id: EntityId) -> Result<Entity> {
        let guard = self.entities.read();
        match guard.get(&id) {
            Some(e) if !e.is_deleted() => Ok(e.clone()),
            _ => Err(EngineError::EntityNotFound(id)),
        }
    }

    /// Archive view: returns the entity whether or not it is soft-deleted.
    /// Still `NotFound` once hard-deleted.
    pub fn get_archived(&self, id: EntityId) -> Result<Entity> {
        self.entities
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::EntityNotFound(id))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities
            .read()
            .get(&id)
            .map(|e| !e.is_deleted())
            .unwrap_or(false)
    }

    pub fn exists_archived(&self, id: EntityId) -> bool {
        self.entities.read().contains_key(&id)
    }

    /// Soft-delete: sets `deleted_at`. Idempotent — deleting an already
    /// soft-deleted entity is a no-op that still succeeds.
    pub fn soft_delete(&self, id: EntityId, now: Timestamp) -> Result<()> {
        let mut guard = self.entities.write();
        let entity = guard.get_mut(&id).ok_or(EngineError::EntityNotFound(id))?;
        if entity.deleted_at.is_none() {
            entity.deleted_at = Some(now);
            entity.updated_at = now;
        }
        Ok(())
    }

    /// Reverses a soft-delete. Only valid from the archive view, matching
    /// `objects_archive.undelete()`.
    pub fn undelete(&self, id: EntityId, now: Timestamp) -> Result<()> {
        let mut guard = self.entities.write();
        let entity = guard.get_mut(&id).ok_or(EngineError::EntityNotFound(id))?;
        entity.deleted_at = None;
        entity.updated_at = now;
        Ok(())
    }

    /// Hard-delete: removes the entity permanently. `id` is never
    /// reassigned afterward.
    pub fn hard_delete(&self, id: EntityId) -> Result<()> {
        self.entities
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::EntityNotFound(id))
    }

    pub fn add_content_type(&self, id: EntityId, component_type: &'static str) -> Result<()> {
        let mut guard = self.entities.write();
        let entity = guard.get_mut(&id).ok_or(EngineError::EntityNotFound(id))?;
        entity.content_types.insert(component_type);
        Ok(())
    }

    pub fn remove_content_type(&self, id: EntityId, component_type: &'static str) -> Result<()> {
        let mut guard = self.entities.write();
        let entity = guard.get_mut(&id).ok_or(EngineError::EntityNotFound(id))?;
        entity.content_types.remove(component_type);
        Ok(())
    }

    pub fn set_notes(&self, id: EntityId, notes: impl Into<String>, now: Timestamp) -> Result<()> {
        let mut guard = self.entities.write();
        let entity = guard.get_mut(&id).ok_or(EngineError::EntityNotFound(id))?;
        entity.notes = notes.into();
        entity.updated_at = now;
        Ok(())
    }

    /// All live (non-deleted) entity ids, for bulk operations.
    pub fn live_ids(&self) -> Vec<EntityId> {
        self.entities
            .read()
            .values()
            .filter(|e| !e.is_deleted())
            .map(|e| e.id)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entities.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get() {
        let reg = EntityRegistry::new(8);
        let id = reg.create(0);
        let e = reg.get(id).unwrap();
        assert_eq!(e.id, id);
        assert!(!e.is_deleted());
    }

    #[test]
    fn soft_delete_hides_from_default_view() {
        let reg = EntityRegistry::new(8);
        let id = reg.create(0);
        reg.soft_delete(id, 1).unwrap();
        assert!(matches!(reg.get(id), Err(EngineError::EntityNotFound(_))));
        assert!(reg.get_archived(id).unwrap().is_deleted());
    }

    #[test]
    fn undelete_restores_default_view() {
        let reg = EntityRegistry::new(8);
        let id = reg.create(0);
        reg.soft_delete(id, 1).unwrap();
        reg.undelete(id, 2).unwrap();
        assert!(!reg.get(id).unwrap().is_deleted());
    }

    #[test]
    fn hard_delete_is_permanent() {
        let reg = EntityRegistry::new(8);
        let id = reg.create(0);
        reg.hard_delete(id).unwrap();
        assert!(matches!(reg.get_archived(id), Err(EngineError::EntityNotFound(_))));
        let id2 = reg.create(0);
        assert_ne!(id, id2, "ids must never be reused after a hard delete");
    }

    #[test]
    fn soft_delete_is_idempotent() {
        let reg = EntityRegistry::new(8);
        let id = reg.create(0);
        reg.soft_delete(id, 1).unwrap();
        reg.soft_delete(id, 2).unwrap();
        assert_eq!(reg.get_archived(id).unwrap().deleted_at, Some(1));
    }
}
