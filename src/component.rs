//! Component Store (Component B): binds typed component records to
//! entities, one per `(entity, component type)` pair, and the cascading
//! delete semantics linking a component's lifecycle to its entity's.

use std::any::Any;
use std::collections::HashMap;

use parking_lot::RwLock;

use crate::clock::Timestamp;
use crate::entity::EntityRegistry;
use crate::error::{EngineError, Result};
use crate::ids::EntityId;

/// Marker trait for a typed component payload. `TYPE_NAME` is the
/// runtime tag stored in `Entity::content_types` and returned by
/// `entity.components()`.
pub trait Component: Clone + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

#[derive(Debug, Clone)]
struct ComponentRecord<T> {
    entity_id: EntityId,
    payload: T,
    deleted: bool,
    created_at: Timestamp,
    updated_at: Timestamp,
}

/// A typed table of one component kind, keyed by entity id.
pub struct ComponentTable<T: Component> {
    records: RwLock<HashMap<EntityId, ComponentRecord<T>>>,
}

impl<T: Component> ComponentTable<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, entity_id: EntityId, payload: T, now: Timestamp) -> Result<()> {
        let mut guard = self.records.write();
        if guard.contains_key(&entity_id) {
            return Err(EngineError::UniqueViolation(format!(
                "entity {} already carries a component of type '{}'",
                entity_id,
                T::TYPE_NAME
            )));
        }
        guard.insert(
            entity_id,
            ComponentRecord {
                entity_id,
                payload,
                deleted: false,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    pub fn get(&self, entity_id: EntityId) -> Result<T> {
        let guard = self.records.read();
        match guard.get(&entity_id) {
            Some(r) if !r.deleted => Ok(r.payload.clone()),
            _ => Err(EngineError::ComponentNotFound {
                entity: entity_id,
                component_type: T::TYPE_NAME,
            }),
        }
    }

    pub fn get_archived(&self, entity_id: EntityId) -> Result<T> {
        self.records
            .read()
            .get(&entity_id)
            .map(|r| r.payload.clone())
            .ok_or(EngineError::ComponentNotFound {
                entity: entity_id,
                component_type: T::TYPE_NAME,
            })
    }

    pub fn set(&self, entity_id: EntityId, payload: T, now: Timestamp) -> Result<()> {
        let mut guard = self.records.write();
        let record = guard
            .get_mut(&entity_id)
            .ok_or(EngineError::ComponentNotFound {
                entity: entity_id,
                component_type: T::TYPE_NAME,
            })?;
        record.payload = payload;
        record.updated_at = now;
        Ok(())
    }

    pub fn contains_live(&self, entity_id: EntityId) -> bool {
        self.records
            .read()
            .get(&entity_id)
            .map(|r| !r.deleted)
            .unwrap_or(false)
    }
}

impl<T: Component> Default for ComponentTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe interface used for cascading delete across component
/// types whose concrete payload is not known at the call site.
trait ComponentTableErased: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn contains(&self, id: EntityId) -> bool;
    fn soft_delete(&self, id: EntityId, now: Timestamp) -> bool;
    fn undelete(&self, id: EntityId, now: Timestamp) -> bool;
    fn hard_delete(&self, id: EntityId) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Component> ComponentTableErased for ComponentTable<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn contains(&self, id: EntityId) -> bool {
        self.contains_live(id)
    }

    fn soft_delete(&self, id: EntityId, now: Timestamp) -> bool {
        let mut guard = self.records.write();
        if let Some(r) = guard.get_mut(&id) {
            if !r.deleted {
                r.deleted = true;
                r.updated_at = now;
            }
            true
        } else {
            false
        }
    }

    fn undelete(&self, id: EntityId, now: Timestamp) -> bool {
        let mut guard = self.records.write();
        if let Some(r) = guard.get_mut(&id) {
            r.deleted = false;
            r.updated_at = now;
            true
        } else {
            false
        }
    }

    fn hard_delete(&self, id: EntityId) -> bool {
        self.records.write().remove(&id).is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry of component tables, one per registered type, plus the
/// cascading delete logic tying component lifecycle to entity lifecycle
/// (see the hard/isolated truth table on `delete_component` below).
pub struct ComponentStore {
    tables: RwLock<HashMap<&'static str, Box<dyn ComponentTableErased>>>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a component type. Idempotent: calling twice for the
    /// same `T` is a no-op.
    pub fn register<T: Component>(&self) {
        self.tables
            .write()
            .entry(T::TYPE_NAME)
            .or_insert_with(|| Box::new(ComponentTable::<T>::new()));
    }

    fn table<T: Component>(&self) -> Option<()> {
        self.tables.read().get(T::TYPE_NAME).map(|_| ())
    }

    /// Allocates a new entity if `entity` is `None`, inserts the
    /// component row, and adds `T::TYPE_NAME` to the entity's
    /// `content_types`. Fails with `UniqueViolation` if an existing
    /// entity already carries a component of this type.
    pub fn create_component<T: Component>(
        &self,
        entities: &EntityRegistry,
        entity: Option<EntityId>,
        payload: T,
        now: Timestamp,
    ) -> Result<EntityId> {
        self.register::<T>();
        let entity_id = match entity {
            Some(id) => {
                entities.get(id)?;
                id
            }
            None => entities.create(now),
        };

        let guard = self.tables.read();
        let erased = guard.get(T::TYPE_NAME).expect("registered above");
        let table = erased
            .as_any()
            .downcast_ref::<ComponentTable<T>>()
            .expect("type tag matches downcast target");
        table.insert(entity_id, payload, now)?;
        drop(guard);

        entities.add_content_type(entity_id, T::TYPE_NAME)?;
        Ok(entity_id)
    }

    pub fn get<T: Component>(&self, entity_id: EntityId) -> Result<T> {
        let guard = self.tables.read();
        let erased = guard
            .get(T::TYPE_NAME)
            .ok_or(EngineError::ComponentNotFound {
                entity: entity_id,
                component_type: T::TYPE_NAME,
            })?;
        erased
            .as_any()
            .downcast_ref::<ComponentTable<T>>()
            .expect("type tag matches downcast target")
            .get(entity_id)
    }

    /// Hard/isolated truth table:
    ///
    /// | hard | isolated | effect |
    /// |------|----------|--------|
    /// | F | F | soft-delete entity, cascading to all its components |
    /// | F | T | soft-delete just this component |
    /// | T | F | hard-delete entity, cascading to all its components |
    /// | T | T | hard-delete just this component |
    pub fn delete_component<T: Component>(
        &self,
        entities: &EntityRegistry,
        entity_id: EntityId,
        hard: bool,
        isolated: bool,
        now: Timestamp,
    ) -> Result<()> {
        if self.table::<T>().is_none() {
            return Err(EngineError::ComponentNotFound {
                entity: entity_id,
                component_type: T::TYPE_NAME,
            });
        }

        if isolated {
            let guard = self.tables.read();
            let erased = guard.get(T::TYPE_NAME).expect("checked above");
            if hard {
                if erased.hard_delete(entity_id) {
                    drop(guard);
                    entities.remove_content_type(entity_id, T::TYPE_NAME)?;
                    Ok(())
                } else {
                    Err(EngineError::ComponentNotFound {
                        entity: entity_id,
                        component_type: T::TYPE_NAME,
                    })
                }
            } else if erased.soft_delete(entity_id, now) {
                Ok(())
            } else {
                Err(EngineError::ComponentNotFound {
                    entity: entity_id,
                    component_type: T::TYPE_NAME,
                })
            }
        } else if hard {
            self.cascade_hard_delete(entities, entity_id)
        } else {
            self.cascade_soft_delete(entities, entity_id, now)
        }
    }

    /// Soft-deletes the entity and every component it carries.
    pub fn cascade_soft_delete(
        &self,
        entities: &EntityRegistry,
        entity_id: EntityId,
        now: Timestamp,
    ) -> Result<()> {
        entities.soft_delete(entity_id, now)?;
        let guard = self.tables.read();
        for table in guard.values() {
            table.soft_delete(entity_id, now);
        }
        Ok(())
    }

    /// Reverses a soft-delete for the entity and every component it
    /// carries.
    pub fn cascade_undelete(
        &self,
        entities: &EntityRegistry,
        entity_id: EntityId,
        now: Timestamp,
    ) -> Result<()> {
        entities.undelete(entity_id, now)?;
        let guard = self.tables.read();
        for table in guard.values() {
            table.undelete(entity_id, now);
        }
        Ok(())
    }

    /// Hard-deletes the entity and removes every component row it
    /// carries.
    pub fn cascade_hard_delete(&self, entities: &EntityRegistry, entity_id: EntityId) -> Result<()> {
        let guard = self.tables.read();
        for table in guard.values() {
            table.hard_delete(entity_id);
        }
        drop(guard);
        entities.hard_delete(entity_id)
    }

    /// All component type names currently live on `entity_id`, i.e. the
    /// backing set for `entity.components()`.
    pub fn live_types(&self, entity_id: EntityId) -> Vec<&'static str> {
        self.tables
            .read()
            .values()
            .filter(|t| t.contains(entity_id))
            .map(|t| t.type_name())
            .collect()
    }
}

impl Default for ComponentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Person {
        slug: String,
    }
    impl Component for Person {
        const TYPE_NAME: &'static str = "Person";
    }

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        username: String,
    }
    impl Component for User {
        const TYPE_NAME: &'static str = "User";
    }

    #[test]
    fn create_component_allocates_entity() {
        let entities = EntityRegistry::new(8);
        let store = ComponentStore::new();
        let id = store
            .create_component(&entities, None, Person { slug: "jdoe".into() }, 0)
            .unwrap();
        assert_eq!(store.get::<Person>(id).unwrap().slug, "jdoe");
        assert_eq!(store.live_types(id), vec!["Person"]);
    }

    #[test]
    fn duplicate_component_type_rejected() {
        let entities = EntityRegistry::new(8);
        let store = ComponentStore::new();
        let id = store
            .create_component(&entities, None, Person { slug: "a".into() }, 0)
            .unwrap();
        let err = store.create_component(&entities, Some(id), Person { slug: "b".into() }, 0);
        assert!(matches!(err, Err(EngineError::UniqueViolation(_))));
    }

    #[test]
    fn cross_component_surgery() {
        // Cross-component surgery: deleting one component in isolation
        let entities = EntityRegistry::new(8);
        let store = ComponentStore::new();
        let id = store
            .create_component(&entities, None, Person { slug: "jdoe".into() }, 0)
            .unwrap();
        store
            .create_component(&entities, Some(id), User { username: "jdoe".into() }, 0)
            .unwrap();
        assert_eq!(store.live_types(id).len(), 2);

        store
            .delete_component::<User>(&entities, id, true, true, 1)
            .unwrap();
        assert_eq!(store.live_types(id).len(), 1);
        assert!(matches!(
            store.get::<User>(id),
            Err(EngineError::ComponentNotFound { .. })
        ));
        assert_eq!(store.get::<Person>(id).unwrap().slug, "jdoe");
    }

    #[test]
    fn hard_delete_non_isolated_cascades_to_entity() {
        let entities = EntityRegistry::new(8);
        let store = ComponentStore::new();
        let id = store
            .create_component(&entities, None, Person { slug: "a".into() }, 0)
            .unwrap();
        store.delete_component::<Person>(&entities, id, true, false, 1).unwrap();
        assert!(!entities.exists_archived(id));
        assert!(matches!(
            store.get::<Person>(id),
            Err(EngineError::ComponentNotFound { .. })
        ));
    }
}
