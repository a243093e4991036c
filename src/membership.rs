//! Membership Index (Component D): many-to-many joins between entities
//! and attributes, and between entities and domains.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::attribute::AttributeCatalog;
use crate::error::{EngineError, Result};
use crate::ids::{AttributeId, DomainId, EntityId};

#[derive(Default)]
struct Joins {
    entity_attrs: HashMap<EntityId, HashSet<AttributeId>>,
    entity_domains: HashMap<EntityId, HashSet<DomainId>>,
    domain_entities: HashMap<DomainId, HashSet<EntityId>>,
}

/// Entity↔attribute and entity↔domain membership, plus the
/// `DomainViolation` guard on attribute assignment.
pub struct MembershipIndex {
    joins: RwLock<Joins>,
}

impl MembershipIndex {
    pub fn new() -> Self {
        Self {
            joins: RwLock::new(Joins::default()),
        }
    }

    pub fn is_in_domain(&self, entity: EntityId, domain: DomainId) -> bool {
        self.joins
            .read()
            .entity_domains
            .get(&entity)
            .map(|set| set.contains(&domain))
            .unwrap_or(false)
    }

    pub fn domains_of(&self, entity: EntityId) -> HashSet<DomainId> {
        self.joins
            .read()
            .entity_domains
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn members_of(&self, domain: DomainId) -> HashSet<EntityId> {
        self.joins
            .read()
            .domain_entities
            .get(&domain)
            .cloned()
            .unwrap_or_default()
    }

    /// Raw membership edge add, with no cycle check — the Domain DAG
    /// (Component E) performs the cycle check before calling this.
    pub fn add_domain_membership(&self, entity: EntityId, domain: DomainId) {
        let mut guard = self.joins.write();
        guard.entity_domains.entry(entity).or_default().insert(domain);
        guard.domain_entities.entry(domain).or_default().insert(entity);
    }

    /// Removes the membership edge. Does not by itself remove the
    /// entity's attributes scoped to `domain` — see
    /// `remove_from_domain` for the cascading version callers should
    /// normally use.
    pub fn remove_domain_membership(&self, entity: EntityId, domain: DomainId) {
        let mut guard = self.joins.write();
        if let Some(set) = guard.entity_domains.get_mut(&entity) {
            set.remove(&domain);
        }
        if let Some(set) = guard.domain_entities.get_mut(&domain) {
            set.remove(&entity);
        }
    }

    pub fn has_attr(&self, entity: EntityId, attribute: AttributeId) -> bool {
        self.joins
            .read()
            .entity_attrs
            .get(&entity)
            .map(|set| set.contains(&attribute))
            .unwrap_or(false)
    }

    pub fn has_all_attrs(&self, entity: EntityId, attrs: &HashSet<AttributeId>) -> bool {
        if attrs.is_empty() {
            return true;
        }
        let guard = self.joins.read();
        match guard.entity_attrs.get(&entity) {
            Some(held) => attrs.is_subset(held),
            None => false,
        }
    }

    pub fn attrs_of(&self, entity: EntityId) -> HashSet<AttributeId> {
        self.joins
            .read()
            .entity_attrs
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn attrs_with_key(&self, entity: EntityId, key: &str, catalog: &AttributeCatalog) -> Vec<AttributeId> {
        self.attrs_of(entity)
            .into_iter()
            .filter(|id| catalog.get(*id).map(|a| a.key == key).unwrap_or(false))
            .collect()
    }

    /// Adds `attribute` to `entity`. Fails with `DomainViolation` unless
    /// `entity` is already a member of the attribute's domain.
    pub fn add_attr(&self, entity: EntityId, attribute: AttributeId, catalog: &AttributeCatalog) -> Result<()> {
        let attr = catalog.get(attribute)?;
        if !self.is_in_domain(entity, attr.domain) {
            return Err(EngineError::DomainViolation {
                entity,
                domain: attr.domain,
            });
        }
        self.joins
            .write()
            .entity_attrs
            .entry(entity)
            .or_default()
            .insert(attribute);
        Ok(())
    }

    pub fn remove_attr(&self, entity: EntityId, attribute: AttributeId) {
        if let Some(set) = self.joins.write().entity_attrs.get_mut(&entity) {
            set.remove(&attribute);
        }
    }

    /// The subset of `entity`'s attributes scoped to `domain` — the set
    /// `remove_from_domain` cascades removal over. Exposed so callers
    /// that need to react per-attribute (the propagator's `(b)` handler)
    /// can see what is about to be removed before it's gone.
    pub fn attrs_of_in_domain(&self, entity: EntityId, domain: DomainId, catalog: &AttributeCatalog) -> Vec<AttributeId> {
        self.attrs_of(entity)
            .into_iter()
            .filter(|id| catalog.get(*id).map(|a| a.domain == domain).unwrap_or(false))
            .collect()
    }

    /// Removes `entity` from `domain` and, cascading, every
    /// attribute the entity holds whose domain is `domain`.
    pub fn remove_from_domain(&self, entity: EntityId, domain: DomainId, catalog: &AttributeCatalog) {
        let attrs_in_domain = self.attrs_of_in_domain(entity, domain, catalog);
        for attr in attrs_in_domain {
            self.remove_attr(entity, attr);
        }
        self.remove_domain_membership(entity, domain);
    }
}

impl Default for MembershipIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EntityId;

    #[test]
    fn add_attr_outside_domain_is_violation() {
        let catalog = AttributeCatalog::new();
        let membership = MembershipIndex::new();
        let domain = DomainId(EntityId(1));
        let entity = EntityId(2);
        let attr = catalog.intern(domain, "role", "member");
        let err = membership.add_attr(entity, attr, &catalog);
        assert!(matches!(err, Err(EngineError::DomainViolation { .. })));
    }

    #[test]
    fn add_attr_inside_domain_succeeds() {
        let catalog = AttributeCatalog::new();
        let membership = MembershipIndex::new();
        let domain = DomainId(EntityId(1));
        let entity = EntityId(2);
        membership.add_domain_membership(entity, domain);
        let attr = catalog.intern(domain, "role", "member");
        membership.add_attr(entity, attr, &catalog).unwrap();
        assert!(membership.has_attr(entity, attr));
    }

    #[test]
    fn remove_from_domain_cascades_attrs() {
        let catalog = AttributeCatalog::new();
        let membership = MembershipIndex::new();
        let domain = DomainId(EntityId(1));
        let entity = EntityId(2);
        membership.add_domain_membership(entity, domain);
        let attr = catalog.intern(domain, "role", "member");
        membership.add_attr(entity, attr, &catalog).unwrap();

        membership.remove_from_domain(entity, domain, &catalog);
        assert!(!membership.is_in_domain(entity, domain));
        assert!(!membership.has_attr(entity, attr));
    }
}
