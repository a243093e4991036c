//! `Store`: the crate's public entry point, wiring the Entity Registry
//! (A) through the Authorization Query (I) into one handle a host
//! constructs once and calls into directly — no signal dispatch, no
//! hidden control flow.
//!
//! Grounded on `ecsdb/src/db.rs`'s `Database` struct (owns every
//! registry, exposes the mutation API, commits through one sequencer)
//! and `packages/in-mem-db-core/src/database.rs`'s simpler
//! typed-collection style, which this crate follows in preference to
//! the former's unsafe byte-buffer design (see DESIGN.md).

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::attribute::{Attribute, AttributeCatalog};
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::component::{Component, ComponentStore};
use crate::config::EngineConfig;
use crate::domain::{self, Domain};
use crate::entitlement::EntitlementIndex;
use crate::entity::{Entity, EntityRegistry};
use crate::error::{EngineError, Result};
use crate::ids::{AttributeId, DomainId, EntityId, PermissionId, PolicyId};
use crate::membership::MembershipIndex;
use crate::permission::{PermissionCatalog, PermissionRef};
use crate::policy::{Policy, PolicyStore};
use crate::propagator::{self, PropagatorCtx};
use crate::authorization::Authorizer;
use crate::transaction::Sequencer;

/// Owns every subsystem (A–I) and the sequencer that serializes
/// mutations across them. Reads (`has_perm`, `cast`, membership tests)
/// take no lock beyond what each subsystem already holds internally;
/// `ArcSwap` keeps the entitlement index's read path lock-free.
pub struct Store {
    config: EngineConfig,
    clock: Box<dyn Clock>,
    sequencer: Sequencer,

    entities: EntityRegistry,
    components: ComponentStore,
    attributes: AttributeCatalog,
    membership: MembershipIndex,
    policies: PolicyStore,
    permissions: RwLock<PermissionCatalog>,
    entitlements: EntitlementIndex,

    // Domain slugs are globally unique, not just scoped to a parent
    // domain the way policy labels are.
    domain_slugs: RwLock<HashMap<String, DomainId>>,
}

impl Store {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Box<dyn Clock>) -> Self {
        let entities = EntityRegistry::new(config.initial_entity_capacity);
        let components = ComponentStore::new();
        components.register::<Domain>();
        Self {
            config,
            clock,
            sequencer: Sequencer::new(),
            entities,
            components,
            attributes: AttributeCatalog::new(),
            membership: MembershipIndex::new(),
            policies: PolicyStore::new(),
            permissions: RwLock::new(PermissionCatalog::new()),
            entitlements: EntitlementIndex::new(),
            domain_slugs: RwLock::new(HashMap::new()),
        }
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn ctx<'a>(&'a self, permissions: &'a PermissionCatalog) -> PropagatorCtx<'a> {
        PropagatorCtx {
            entities: &self.entities,
            components: &self.components,
            catalog: &self.attributes,
            membership: &self.membership,
            policies: &self.policies,
            permissions,
            entitlements: &self.entitlements,
        }
    }

    // ---- Entity Registry (A) / Component Store (B) ----------------

    /// Registers a component type. Idempotent; call before the first
    /// `create_component::<T>` for a payload type that isn't already
    /// implied by another call (e.g. `Domain`, registered by `new`).
    pub fn register_component_type<T: Component>(&self) {
        self.components.register::<T>();
    }

    pub fn create_component<T: Component>(&self, entity: Option<EntityId>, payload: T) -> Result<EntityId> {
        let now = self.now();
        let id = self
            .sequencer
            .transact(&self.entitlements, || self.components.create_component(&self.entities, entity, payload, now))?;
        debug!("created {} component on entity {}", T::TYPE_NAME, id);
        Ok(id)
    }

    pub fn cast<T: Component>(&self, entity: EntityId) -> Result<T> {
        self.components.get::<T>(entity)
    }

    pub fn entity(&self, id: EntityId) -> Result<Entity> {
        self.entities.get(id)
    }

    pub fn entity_archived(&self, id: EntityId) -> Result<Entity> {
        self.entities.get_archived(id)
    }

    /// `entity.components()`: every component type currently live on
    /// `entity`.
    pub fn components_of(&self, entity: EntityId) -> Vec<&'static str> {
        self.components.live_types(entity)
    }

    /// Implements the hard/isolated delete matrix for a
    /// component of concrete type `T`.
    pub fn delete_component<T: Component>(&self, entity: EntityId, hard: bool, isolated: bool) -> Result<()> {
        let now = self.now();
        self.sequencer.transact(&self.entitlements, || {
            self.components
                .delete_component::<T>(&self.entities, entity, hard, isolated, now)
        })?;
        debug!(
            "deleted {} component on entity {} (hard={}, isolated={})",
            T::TYPE_NAME,
            entity,
            hard,
            isolated
        );
        Ok(())
    }

    pub fn undelete_entity(&self, id: EntityId) -> Result<()> {
        let now = self.now();
        self.sequencer
            .transact(&self.entitlements, || self.components.cascade_undelete(&self.entities, id, now))?;
        debug!("undeleted entity {}", id);
        Ok(())
    }

    /// Bulk soft/hard delete over `ids`, applying the single-row
    /// semantics to every row inside one transaction (bulk
    /// `queryset.delete(hard)`).
    pub fn bulk_delete_entities(&self, ids: &[EntityId], hard: bool) -> Result<()> {
        let now = self.now();
        self.sequencer.transact(&self.entitlements, || {
            for &id in ids {
                if hard {
                    self.components.cascade_hard_delete(&self.entities, id)?;
                } else {
                    self.components.cascade_soft_delete(&self.entities, id, now)?;
                }
            }
            Ok(())
        })?;
        debug!("bulk {}-deleted {} entities", if hard { "hard" } else { "soft" }, ids.len());
        Ok(())
    }

    pub fn bulk_undelete_entities(&self, ids: &[EntityId]) -> Result<()> {
        let now = self.now();
        self.sequencer.transact(&self.entitlements, || {
            for &id in ids {
                self.components.cascade_undelete(&self.entities, id, now)?;
            }
            Ok(())
        })?;
        debug!("bulk undeleted {} entities", ids.len());
        Ok(())
    }

    // ---- Attribute Catalog (C) / Membership Index (D) --------------

    pub fn intern_attr(&self, domain: DomainId, key: &str, value: &str) -> AttributeId {
        self.attributes.intern(domain, key, value)
    }

    pub fn attribute(&self, id: AttributeId) -> Result<Attribute> {
        self.attributes.get(id)
    }

    pub fn has_attr(&self, entity: EntityId, attribute: AttributeId) -> bool {
        self.membership.has_attr(entity, attribute)
    }

    pub fn attrs_with_key(&self, entity: EntityId, key: &str) -> Vec<AttributeId> {
        self.membership.attrs_with_key(entity, key, &self.attributes)
    }

    pub fn is_in_domain(&self, entity: EntityId, domain: DomainId, recursive: bool) -> bool {
        domain::is_in_domain(&self.components, &self.membership, entity, domain, recursive)
    }

    /// Adds `attribute` to `entity` (`DomainViolation` unless `entity`
    /// already belongs to the attribute's domain), then runs the
    /// propagator's `(a)` handler if this is a genuinely new addition.
    pub fn add_attr(&self, entity: EntityId, attribute: AttributeId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            let was_new = !self.membership.has_attr(entity, attribute);
            self.membership.add_attr(entity, attribute, &self.attributes)?;
            if was_new {
                let permissions = self.permissions.read();
                propagator::on_attr_added(&self.ctx(&permissions), entity, attribute);
            }
            Ok(())
        })?;
        debug!("attr {} added to entity {}", attribute, entity);
        Ok(())
    }

    /// Convenience wrapper: interns `(domain, key, value)` and adds it
    /// to `entity` in one step.
    pub fn add_attr_kv(&self, entity: EntityId, domain: DomainId, key: &str, value: &str) -> Result<AttributeId> {
        let attribute = self.attributes.intern(domain, key, value);
        self.add_attr(entity, attribute)?;
        Ok(attribute)
    }

    /// Removes `attribute` from `entity`, then runs the propagator's
    /// `(b)` handler if the entity actually held it.
    pub fn remove_attr(&self, entity: EntityId, attribute: AttributeId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            let was_present = self.membership.has_attr(entity, attribute);
            self.membership.remove_attr(entity, attribute);
            if was_present {
                let permissions = self.permissions.read();
                propagator::on_attr_removed(&self.ctx(&permissions), entity, attribute);
            }
            Ok(())
        })?;
        debug!("attr {} removed from entity {}", attribute, entity);
        Ok(())
    }

    /// Adds `entity` to `domain`, subject to the Domain DAG's cycle
    /// check, then runs the propagator's `(c)` add handler
    /// if membership was actually newly established.
    pub fn add_to_domain(&self, entity: EntityId, domain: DomainId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            let was_member = self.membership.is_in_domain(entity, domain);
            domain::add_to_domain(&self.components, &self.membership, entity, domain, self.config.strict_cycles)?;
            if !was_member && self.membership.is_in_domain(entity, domain) {
                let permissions = self.permissions.read();
                propagator::on_domain_member_added(&self.ctx(&permissions), domain, entity);
            }
            Ok(())
        })?;
        debug!("entity {} added to domain {}", entity, domain);
        Ok(())
    }

    /// Removes `entity` from `domain`, cascading attribute removal, and
    /// runs the propagator's `(b)` handler for each cascaded attribute
    /// plus the `(c)` remove handler for the membership edge itself.
    pub fn remove_from_domain(&self, entity: EntityId, domain: DomainId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            if !self.membership.is_in_domain(entity, domain) {
                return Ok(());
            }
            let attrs = self.membership.attrs_of_in_domain(entity, domain, &self.attributes);
            self.membership.remove_from_domain(entity, domain, &self.attributes);

            let permissions = self.permissions.read();
            let ctx = self.ctx(&permissions);
            for attr in attrs {
                propagator::on_attr_removed(&ctx, entity, attr);
            }
            propagator::on_domain_member_removed(&ctx, domain, entity);
            Ok(())
        })?;
        debug!("entity {} removed from domain {}", entity, domain);
        Ok(())
    }

    // ---- Domain DAG (E) ---------------------------------------------

    /// Creates a new domain-bearing entity with the given globally
    /// unique slug.
    pub fn create_domain(&self, slug: &str) -> Result<DomainId> {
        let now = self.now();
        let id = self.sequencer.transact(&self.entitlements, || {
            let mut slugs = self.domain_slugs.write();
            if slugs.contains_key(slug) {
                return Err(EngineError::UniqueViolation(format!("domain slug '{slug}' already in use")));
            }
            let entity_id = self
                .components
                .create_component(&self.entities, None, Domain { slug: slug.to_string() }, now)?;
            let domain_id = DomainId(entity_id);
            slugs.insert(slug.to_string(), domain_id);
            Ok(domain_id)
        })?;
        debug!("created domain '{}' as {}", slug, id);
        Ok(id)
    }

    pub fn domain_by_slug(&self, slug: &str) -> Option<DomainId> {
        self.domain_slugs.read().get(slug).copied()
    }

    pub fn subdomains(&self, domain: DomainId) -> Vec<DomainId> {
        domain::subdomains(&self.components, &self.membership, domain)
    }

    pub fn superdomains(&self, entity: EntityId) -> Vec<DomainId> {
        domain::superdomains(&self.membership, entity)
    }

    pub fn has_subdomain_recursive(&self, domain: DomainId, candidate: DomainId) -> bool {
        domain::has_subdomain_recursive(&self.components, &self.membership, domain, candidate)
    }

    // ---- Policy Store (F) -------------------------------------------

    pub fn register_permission(&self, perm: PermissionRef) {
        self.permissions.write().register(perm);
    }

    /// Parses and stores a policy, then runs the propagator's `(f)`
    /// save handler — orphan-sweep (a no-op on a brand-new policy)
    /// followed by `create_entitlements()`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_policy(
        &self,
        domain: DomainId,
        label: &str,
        source_attr_strs: &[&str],
        perm_strs: &[&str],
        target_attr_strs: &[&str],
    ) -> Result<PolicyId> {
        let id = self.sequencer.transact(&self.entitlements, || {
            let permissions = self.permissions.read();
            let id = self.policies.create_from_strs(
                &self.attributes,
                &permissions,
                domain,
                label,
                source_attr_strs,
                perm_strs,
                target_attr_strs,
            )?;
            propagator::on_policy_saved(&self.ctx(&permissions), id);
            Ok(id)
        })?;
        debug!("created policy '{}' as {} in domain {}", label, id, domain);
        Ok(id)
    }

    pub fn policy(&self, id: PolicyId) -> Result<Policy> {
        self.policies.get(id)
    }

    /// Toggling `disabled` never touches the entitlement index — it
    /// changes what `has_perm` returns for rows already materialized.
    pub fn set_policy_disabled(&self, id: PolicyId, disabled: bool) -> Result<()> {
        self.policies.set_disabled(id, disabled)?;
        debug!("policy {} disabled={}", id, disabled);
        Ok(())
    }

    pub fn set_policy_expires_at(&self, id: PolicyId, expires_at: Option<Timestamp>) -> Result<()> {
        self.policies.set_expires_at(id, expires_at)?;
        debug!("policy {} expires_at={:?}", id, expires_at);
        Ok(())
    }

    /// Policy `source_attrs`/`target_attrs` changed: wipes
    /// and re-materializes wholesale.
    pub fn add_policy_source_attr(&self, id: PolicyId, attr: AttributeId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            self.policies.add_source_attr(id, attr)?;
            let permissions = self.permissions.read();
            propagator::on_policy_attrs_changed(&self.ctx(&permissions), id);
            Ok(())
        })?;
        debug!("policy {} gained source attr {}", id, attr);
        Ok(())
    }

    pub fn remove_policy_source_attr(&self, id: PolicyId, attr: AttributeId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            self.policies.remove_source_attr(id, attr)?;
            let permissions = self.permissions.read();
            propagator::on_policy_attrs_changed(&self.ctx(&permissions), id);
            Ok(())
        })?;
        debug!("policy {} lost source attr {}", id, attr);
        Ok(())
    }

    pub fn add_policy_target_attr(&self, id: PolicyId, attr: AttributeId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            self.policies.add_target_attr(id, attr)?;
            let permissions = self.permissions.read();
            propagator::on_policy_attrs_changed(&self.ctx(&permissions), id);
            Ok(())
        })?;
        debug!("policy {} gained target attr {}", id, attr);
        Ok(())
    }

    pub fn remove_policy_target_attr(&self, id: PolicyId, attr: AttributeId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            self.policies.remove_target_attr(id, attr)?;
            let permissions = self.permissions.read();
            propagator::on_policy_attrs_changed(&self.ctx(&permissions), id);
            Ok(())
        })?;
        debug!("policy {} lost target attr {}", id, attr);
        Ok(())
    }

    /// Policy `allow_permissions` add: clones existing
    /// `(source, target)` pairs onto the new permission rather than
    /// re-running full materialization.
    pub fn add_policy_allow_permission(&self, id: PolicyId, perm: PermissionId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            self.policies.add_allow_permission(id, perm)?;
            let permissions = self.permissions.read();
            propagator::on_policy_allow_permission_added(&self.ctx(&permissions), id, perm);
            Ok(())
        })?;
        debug!("policy {} gained allow_permission {}", id, perm);
        Ok(())
    }

    pub fn remove_policy_allow_permission(&self, id: PolicyId, perm: PermissionId) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            self.policies.remove_allow_permission(id, perm)?;
            let permissions = self.permissions.read();
            propagator::on_policy_allow_permission_removed(&self.ctx(&permissions), id, perm);
            Ok(())
        })?;
        debug!("policy {} lost allow_permission {}", id, perm);
        Ok(())
    }

    // ---- Entitlement Index (G) --------------------------------------

    pub fn entitlement_count(&self) -> usize {
        self.entitlements.len()
    }

    /// `queryset_of_policies.reset_entitlements()`: deletes and rebuilds
    /// every named policy's entitlements inside one transaction.
    pub fn reset_entitlements(&self, policy_ids: &[PolicyId]) -> Result<()> {
        self.sequencer.transact(&self.entitlements, || {
            let permissions = self.permissions.read();
            propagator::reset_entitlements(&self.ctx(&permissions), policy_ids);
            Ok(())
        })
    }

    // ---- Authorization Query (I) ------------------------------------

    pub fn has_perm(&self, subject: EntityId, perm_str: &str, target: EntityId) -> bool {
        let permissions = self.permissions.read();
        let auth = Authorizer {
            entities: &self.entities,
            permissions: &permissions,
            policies: &self.policies,
            entitlements: &self.entitlements,
        };
        auth.has_perm(subject, perm_str, target, self.now())
    }

    pub fn entitlements_for(&self, subject: EntityId) -> Vec<(PermissionId, EntityId)> {
        let permissions = self.permissions.read();
        let auth = Authorizer {
            entities: &self.entities,
            permissions: &permissions,
            policies: &self.policies,
            entitlements: &self.entitlements,
        };
        auth.entitlements_for(subject, self.now())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
