//! Policy Store (Component F): declarative rules of the form "entities
//! in D carrying all of S may exercise permissions P on entities in D
//! carrying all of T".

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::attribute::AttributeCatalog;
use crate::clock::Timestamp;
use crate::entity::EntityRegistry;
use crate::error::{EngineError, Result};
use crate::ids::{AttributeId, DomainId, EntityId, PermissionId, PolicyId};
use crate::membership::MembershipIndex;
use crate::permission::PermissionCatalog;

#[derive(Debug, Clone)]
pub struct Policy {
    pub id: PolicyId,
    pub domain: DomainId,
    pub label: String,
    pub source_attrs: HashSet<AttributeId>,
    pub target_attrs: HashSet<AttributeId>,
    pub allow_permissions: HashSet<PermissionId>,
    pub disabled: bool,
    /// `None` means the policy never expires.
    pub expires_at: Option<Timestamp>,
}

impl Policy {
    /// A policy routed through `has_perm` is live iff it is not
    /// disabled and (if it has an expiration) has not yet expired.
    pub fn is_active(&self, now: Timestamp) -> bool {
        !self.disabled && self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }

    /// `true` for a catch-all source clause: "every member of the
    /// domain".
    pub fn is_catch_all_source(&self) -> bool {
        self.source_attrs.is_empty()
    }

    pub fn is_catch_all_target(&self) -> bool {
        self.target_attrs.is_empty()
    }
}

/// Owns all policies, keyed uniquely by `(domain, label)`.
pub struct PolicyStore {
    by_id: RwLock<HashMap<PolicyId, Policy>>,
    by_label: RwLock<HashMap<(DomainId, String), PolicyId>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
            by_label: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn get(&self, id: PolicyId) -> Result<Policy> {
        self.by_id
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::PolicyNotFound(id))
    }

    pub fn all_ids(&self) -> Vec<PolicyId> {
        self.by_id.read().keys().copied().collect()
    }

    /// Parses `"k:v"` source/target attribute strings (auto-interning
    /// against `catalog`) and `"app.codename"` permission strings
    /// (resolved against `permissions`), then stores the policy.
    /// `label` must be unique within `domain`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_from_strs(
        &self,
        catalog: &AttributeCatalog,
        permissions: &PermissionCatalog,
        domain: DomainId,
        label: &str,
        source_attr_strs: &[&str],
        perm_strs: &[&str],
        target_attr_strs: &[&str],
    ) -> Result<PolicyId> {
        {
            let labels = self.by_label.read();
            if labels.contains_key(&(domain, label.to_string())) {
                return Err(EngineError::UniqueViolation(format!(
                    "policy label '{label}' already used in domain {domain}"
                )));
            }
        }

        let source_attrs = source_attr_strs
            .iter()
            .map(|s| intern_kv(catalog, domain, s))
            .collect();
        let target_attrs = target_attr_strs
            .iter()
            .map(|s| intern_kv(catalog, domain, s))
            .collect();
        let allow_permissions = perm_strs
            .iter()
            .map(|s| permissions.resolve(s))
            .collect::<Result<HashSet<_>>>()?;

        let id = PolicyId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        let policy = Policy {
            id,
            domain,
            label: label.to_string(),
            source_attrs,
            target_attrs,
            allow_permissions,
            disabled: false,
            expires_at: None,
        };
        self.by_label.write().insert((domain, label.to_string()), id);
        self.by_id.write().insert(id, policy);
        Ok(id)
    }

    pub fn set_disabled(&self, id: PolicyId, disabled: bool) -> Result<()> {
        let mut guard = self.by_id.write();
        let policy = guard.get_mut(&id).ok_or(EngineError::PolicyNotFound(id))?;
        policy.disabled = disabled;
        Ok(())
    }

    pub fn set_expires_at(&self, id: PolicyId, expires_at: Option<Timestamp>) -> Result<()> {
        let mut guard = self.by_id.write();
        let policy = guard.get_mut(&id).ok_or(EngineError::PolicyNotFound(id))?;
        policy.expires_at = expires_at;
        Ok(())
    }

    pub fn add_source_attr(&self, id: PolicyId, attr: AttributeId) -> Result<()> {
        let mut guard = self.by_id.write();
        let policy = guard.get_mut(&id).ok_or(EngineError::PolicyNotFound(id))?;
        policy.source_attrs.insert(attr);
        Ok(())
    }

    pub fn remove_source_attr(&self, id: PolicyId, attr: AttributeId) -> Result<()> {
        let mut guard = self.by_id.write();
        let policy = guard.get_mut(&id).ok_or(EngineError::PolicyNotFound(id))?;
        policy.source_attrs.remove(&attr);
        Ok(())
    }

    pub fn add_target_attr(&self, id: PolicyId, attr: AttributeId) -> Result<()> {
        let mut guard = self.by_id.write();
        let policy = guard.get_mut(&id).ok_or(EngineError::PolicyNotFound(id))?;
        policy.target_attrs.insert(attr);
        Ok(())
    }

    pub fn remove_target_attr(&self, id: PolicyId, attr: AttributeId) -> Result<()> {
        let mut guard = self.by_id.write();
        let policy = guard.get_mut(&id).ok_or(EngineError::PolicyNotFound(id))?;
        policy.target_attrs.remove(&attr);
        Ok(())
    }

    pub fn add_allow_permission(&self, id: PolicyId, perm: PermissionId) -> Result<()> {
        let mut guard = self.by_id.write();
        let policy = guard.get_mut(&id).ok_or(EngineError::PolicyNotFound(id))?;
        policy.allow_permissions.insert(perm);
        Ok(())
    }

    pub fn remove_allow_permission(&self, id: PolicyId, perm: PermissionId) -> Result<()> {
        let mut guard = self.by_id.write();
        let policy = guard.get_mut(&id).ok_or(EngineError::PolicyNotFound(id))?;
        policy.allow_permissions.remove(&perm);
        Ok(())
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn intern_kv(catalog: &AttributeCatalog, domain: DomainId, s: &str) -> AttributeId {
    let mut tokens = s.splitn(2, ':');
    let key = tokens.next().unwrap_or_default();
    let value = tokens.next().unwrap_or_default();
    catalog.intern(domain, key, value)
}

/// Entities in `policy.domain` carrying every one of `attrs` (ALL
/// conjunction; an empty set matches every domain member). This is the
/// shared core of `sources()`/`targets()`.
pub fn entities_matching(
    membership: &MembershipIndex,
    domain: DomainId,
    attrs: &HashSet<AttributeId>,
) -> HashSet<EntityId> {
    membership
        .members_of(domain)
        .into_iter()
        .filter(|e| membership.has_all_attrs(*e, attrs))
        .collect()
}

pub fn sources(policy: &Policy, membership: &MembershipIndex) -> HashSet<EntityId> {
    entities_matching(membership, policy.domain, &policy.source_attrs)
}

pub fn targets(policy: &Policy, membership: &MembershipIndex) -> HashSet<EntityId> {
    entities_matching(membership, policy.domain, &policy.target_attrs)
}

/// Live (non-deleted) subset of an entity set — soft-deleted entities
/// never produce entitlements.
pub fn filter_live(entities: &EntityRegistry, ids: HashSet<EntityId>) -> HashSet<EntityId> {
    ids.into_iter().filter(|id| entities.contains(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{self, Domain};
    use crate::component::ComponentStore;

    #[test]
    fn create_from_strs_interns_and_resolves() {
        let entities = EntityRegistry::new(8);
        let components = ComponentStore::new();
        let catalog = AttributeCatalog::new();
        let mut permissions = PermissionCatalog::new();
        permissions.register(crate::permission::PermissionRef {
            id: PermissionId(1),
            app_label: "testapp".into(),
            codename: "can_use_thing".into(),
            content_type: "Thing",
        });

        let domain_entity = components
            .create_component(&entities, None, Domain { slug: "D".into() }, 0)
            .unwrap();
        let domain = DomainId(domain_entity);

        let store = PolicyStore::new();
        let pid = store
            .create_from_strs(
                &catalog,
                &permissions,
                domain,
                "members_can_use_things",
                &["role:member"],
                &["testapp.can_use_thing"],
                &[],
            )
            .unwrap();

        let policy = store.get(pid).unwrap();
        assert_eq!(policy.source_attrs.len(), 1);
        assert_eq!(policy.allow_permissions.len(), 1);
        assert!(policy.is_catch_all_target());
    }

    #[test]
    fn duplicate_label_in_domain_rejected() {
        let entities = EntityRegistry::new(8);
        let components = ComponentStore::new();
        let catalog = AttributeCatalog::new();
        let permissions = PermissionCatalog::new();
        let domain_entity = components
            .create_component(&entities, None, Domain { slug: "D".into() }, 0)
            .unwrap();
        let domain = DomainId(domain_entity);

        let store = PolicyStore::new();
        store
            .create_from_strs(&catalog, &permissions, domain, "p", &[], &[], &[])
            .unwrap();
        let err = store.create_from_strs(&catalog, &permissions, domain, "p", &[], &[], &[]);
        assert!(matches!(err, Err(EngineError::UniqueViolation(_))));
    }

    #[test]
    fn sources_uses_all_conjunction() {
        let entities = EntityRegistry::new(8);
        let components = ComponentStore::new();
        let catalog = AttributeCatalog::new();
        let membership = MembershipIndex::new();

        let domain_entity = components
            .create_component(&entities, None, Domain { slug: "D".into() }, 0)
            .unwrap();
        let domain = DomainId(domain_entity);

        let u1 = entities.create(0);
        let u2 = entities.create(0);
        domain::add_to_domain(&components, &membership, u1, domain, true).unwrap();
        domain::add_to_domain(&components, &membership, u2, domain, true).unwrap();

        let member = catalog.intern(domain, "role", "member");
        let distinguished = catalog.intern(domain, "honor", "distinguished");
        membership.add_attr(u1, member, &catalog).unwrap();
        membership.add_attr(u1, distinguished, &catalog).unwrap();
        membership.add_attr(u2, member, &catalog).unwrap();

        let policy = Policy {
            id: PolicyId(1),
            domain,
            label: "narrow".into(),
            source_attrs: [member, distinguished].into_iter().collect(),
            target_attrs: HashSet::new(),
            allow_permissions: HashSet::new(),
            disabled: false,
            expires_at: None,
        };

        let matched = sources(&policy, &membership);
        assert!(matched.contains(&u1));
        assert!(!matched.contains(&u2));
    }
}
