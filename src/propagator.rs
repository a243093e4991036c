//! Change Propagator (Component H): reacts to mutations in attributes,
//! domain membership, and policy composition, and keeps the entitlement
//! index (Component G) consistent via bounded incremental updates
//! rather than full rebuilds.
//!
//! Every mutation method on [`crate::store::Store`] calls directly into
//! one of these handlers inside its own transaction — there is no
//! signal dispatch or other invisible control flow.

use std::collections::HashSet;

use tracing::debug;

use crate::attribute::AttributeCatalog;
use crate::component::ComponentStore;
use crate::entitlement::{self, EntitlementIndex, EntitlementRow};
use crate::entity::EntityRegistry;
use crate::ids::{AttributeId, DomainId, EntityId, PermissionId, PolicyId};
use crate::membership::MembershipIndex;
use crate::permission::PermissionCatalog;
use crate::policy::{self, Policy, PolicyStore};

/// Bundles read access to every subsystem the propagator's handlers
/// need. Constructed fresh by the store for each mutation.
pub struct PropagatorCtx<'a> {
    pub entities: &'a EntityRegistry,
    pub components: &'a ComponentStore,
    pub catalog: &'a AttributeCatalog,
    pub membership: &'a MembershipIndex,
    pub policies: &'a PolicyStore,
    pub permissions: &'a PermissionCatalog,
    pub entitlements: &'a EntitlementIndex,
}

/// `_extrude_source`: reuse the policy's existing `(permission, target)`
/// pairs for a newly qualifying source, falling back to a full scan
/// against `targets() × allow_permissions` when the policy has no
/// entitlements yet.
fn extrude_source(ctx: &PropagatorCtx, policy: &Policy, source: EntityId) -> Vec<EntitlementRow> {
    let existing = ctx.entitlements.rows_for_policy(policy.id);
    if existing.is_empty() {
        let targets = policy::filter_live(ctx.entities, policy::targets(policy, ctx.membership));
        let mut rows = Vec::new();
        for target in targets {
            let Ok(target_entity) = ctx.entities.get(target) else {
                continue;
            };
            for &perm_id in &policy.allow_permissions {
                let Ok(perm) = ctx.permissions.get(perm_id) else {
                    continue;
                };
                if target_entity.content_types.contains(perm.content_type) {
                    rows.push(EntitlementRow {
                        policy: policy.id,
                        source,
                        permission: perm_id,
                        target,
                    });
                }
            }
        }
        rows
    } else {
        let distinct: HashSet<(PermissionId, EntityId)> =
            existing.iter().map(|r| (r.permission, r.target)).collect();
        distinct
            .into_iter()
            .map(|(permission, target)| EntitlementRow {
                policy: policy.id,
                source,
                permission,
                target,
            })
            .collect()
    }
}

/// `_extrude_target`: symmetric to [`extrude_source`]. The fallback
/// branch still enforces `permission.content_type ∈
/// target.content_types`, since that must hold for every entitlement
/// regardless of which code path produced it.
fn extrude_target(ctx: &PropagatorCtx, policy: &Policy, target: EntityId) -> Vec<EntitlementRow> {
    let Ok(target_entity) = ctx.entities.get(target) else {
        return Vec::new();
    };

    let references: Vec<(PermissionId, EntityId)> = ctx
        .entitlements
        .rows_for_policy(policy.id)
        .into_iter()
        .filter(|r| {
            ctx.permissions
                .get(r.permission)
                .map(|p| target_entity.content_types.contains(p.content_type))
                .unwrap_or(false)
        })
        .map(|r| (r.permission, r.source))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    if references.is_empty() {
        let sources = policy::filter_live(ctx.entities, policy::sources(policy, ctx.membership));
        let mut rows = Vec::new();
        for source in sources {
            for &perm_id in &policy.allow_permissions {
                let Ok(perm) = ctx.permissions.get(perm_id) else {
                    continue;
                };
                if target_entity.content_types.contains(perm.content_type) {
                    rows.push(EntitlementRow {
                        policy: policy.id,
                        source,
                        permission: perm_id,
                        target,
                    });
                }
            }
        }
        rows
    } else {
        references
            .into_iter()
            .map(|(permission, source)| EntitlementRow {
                policy: policy.id,
                source,
                permission,
                target,
            })
            .collect()
    }
}

/// (a) Entity ↔ attribute add. For every policy referencing `attr` as a
/// source or target attribute, check whether the rest of that axis's
/// attribute set is now satisfied by `entity`, and if so extrude.
pub fn on_attr_added(ctx: &PropagatorCtx, entity: EntityId, attr: AttributeId) {
    let mut new_rows = Vec::new();
    for policy_id in ctx.policies.all_ids() {
        let Ok(policy) = ctx.policies.get(policy_id) else {
            continue;
        };

        if policy.source_attrs.contains(&attr) {
            let other_attrs: HashSet<AttributeId> =
                policy.source_attrs.iter().copied().filter(|a| *a != attr).collect();
            if ctx.membership.has_all_attrs(entity, &other_attrs) {
                new_rows.extend(extrude_source(ctx, &policy, entity));
            }
        }

        if policy.target_attrs.contains(&attr) {
            let other_attrs: HashSet<AttributeId> =
                policy.target_attrs.iter().copied().filter(|a| *a != attr).collect();
            if ctx.membership.has_all_attrs(entity, &other_attrs) {
                new_rows.extend(extrude_target(ctx, &policy, entity));
            }
        }
    }
    let added = ctx.entitlements.insert_all(new_rows);
    debug!("attr {} added to entity {}: extruded {} entitlements", attr, entity, added);
}

/// (b) Entity ↔ attribute remove. Removing one conjunct attribute
/// invalidates the whole ALL-conjunction, so every entitlement of a
/// policy mentioning `attr` that touches `entity` is dropped outright;
/// no partial reconciliation is needed.
pub fn on_attr_removed(ctx: &PropagatorCtx, entity: EntityId, attr: AttributeId) {
    let affected: Vec<PolicyId> = ctx
        .policies
        .all_ids()
        .into_iter()
        .filter_map(|id| ctx.policies.get(id).ok())
        .filter(|p| p.source_attrs.contains(&attr) || p.target_attrs.contains(&attr))
        .map(|p| p.id)
        .collect();

    let removed = ctx
        .entitlements
        .remove_where(|row| affected.contains(&row.policy) && (row.source == entity || row.target == entity));
    debug!("attr {} removed from entity {}: dropped {} entitlements", attr, entity, removed);
}

/// (c) Domain ↔ entity add. Catch-all policies (empty source or target
/// attribute sets) immediately qualify any new domain member.
pub fn on_domain_member_added(ctx: &PropagatorCtx, domain: DomainId, entity: EntityId) {
    let mut new_rows = Vec::new();
    for policy_id in ctx.policies.all_ids() {
        let Ok(policy) = ctx.policies.get(policy_id) else {
            continue;
        };
        if policy.domain != domain {
            continue;
        }
        if policy.is_catch_all_source() {
            new_rows.extend(extrude_source(ctx, &policy, entity));
        }
        if policy.is_catch_all_target() {
            new_rows.extend(extrude_target(ctx, &policy, entity));
        }
    }
    let added = ctx.entitlements.insert_all(new_rows);
    debug!("entity {} joined domain {}: extruded {} entitlements from catch-all policies", entity, domain, added);
}

/// (c) Domain ↔ entity remove. Drops every entitlement of a
/// domain-scoped policy that touches the departing entity.
pub fn on_domain_member_removed(ctx: &PropagatorCtx, domain: DomainId, entity: EntityId) {
    let domain_policies: HashSet<PolicyId> = ctx
        .policies
        .all_ids()
        .into_iter()
        .filter_map(|id| ctx.policies.get(id).ok())
        .filter(|p| p.domain == domain)
        .map(|p| p.id)
        .collect();

    let removed = ctx.entitlements.remove_where(|row| {
        domain_policies.contains(&row.policy) && (row.source == entity || row.target == entity)
    });
    debug!("entity {} left domain {}: dropped {} entitlements", entity, domain, removed);
}

/// (d) Policy `source_attrs`/`target_attrs` changed: wipe and
/// re-materialize wholesale, since the conjunction shape itself changed.
pub fn on_policy_attrs_changed(ctx: &PropagatorCtx, policy_id: PolicyId) {
    let Ok(policy) = ctx.policies.get(policy_id) else {
        return;
    };
    ctx.entitlements.remove_policy(policy_id);
    let rows = entitlement::materialize(&policy, ctx.membership, ctx.entities, ctx.permissions);
    let added = ctx.entitlements.insert_all(rows);
    debug!("policy {} source/target attrs changed: re-materialized {} entitlements", policy_id, added);
}

/// (e) Policy `allow_permissions` add: clone each distinct
/// `(source, target)` pair already entitled under this policy whose
/// target qualifies for the new permission's content type.
pub fn on_policy_allow_permission_added(ctx: &PropagatorCtx, policy_id: PolicyId, perm: PermissionId) {
    let Ok(policy) = ctx.policies.get(policy_id) else {
        return;
    };
    let Ok(perm_ref) = ctx.permissions.get(perm) else {
        return;
    };

    let pairs: HashSet<(EntityId, EntityId)> = ctx
        .entitlements
        .rows_for_policy(policy_id)
        .into_iter()
        .filter(|r| {
            ctx.entities
                .get(r.target)
                .map(|t| t.content_types.contains(perm_ref.content_type))
                .unwrap_or(false)
        })
        .map(|r| (r.source, r.target))
        .collect();

    let rows = pairs
        .into_iter()
        .map(|(source, target)| EntitlementRow {
            policy: policy.id,
            source,
            permission: perm,
            target,
        })
        .collect::<Vec<_>>();

    let added = ctx.entitlements.insert_all(rows);
    debug!("policy {} gained permission {}: cloned {} entitlements onto existing pairs", policy_id, perm, added);
}

/// (e) Policy `allow_permissions` remove.
pub fn on_policy_allow_permission_removed(ctx: &PropagatorCtx, policy_id: PolicyId, perm: PermissionId) {
    let removed = ctx
        .entitlements
        .remove_where(|row| row.policy == policy_id && row.permission == perm);
    debug!("policy {} lost permission {}: dropped {} entitlements", policy_id, perm, removed);
}

/// (f) Policy saved / disabled toggled / expired: sweep orphaned
/// entitlements (rows no longer backed by the current source/target
/// sets) then re-materialize.
pub fn on_policy_saved(ctx: &PropagatorCtx, policy_id: PolicyId) {
    let Ok(policy) = ctx.policies.get(policy_id) else {
        return;
    };
    let valid: HashSet<EntitlementRow> =
        entitlement::materialize(&policy, ctx.membership, ctx.entities, ctx.permissions)
            .into_iter()
            .collect();

    let swept = ctx
        .entitlements
        .remove_where(|row| row.policy == policy_id && !valid.contains(row));
    let added = ctx.entitlements.insert_all(valid);
    debug!("policy {} saved: swept {} orphans, inserted {} entitlements", policy_id, swept, added);
}

/// `reset_entitlements`: deletes and rebuilds every named policy's
/// entitlements. Used for bulk surgery.
#[cfg(not(feature = "parallel"))]
pub fn reset_entitlements(ctx: &PropagatorCtx, policy_ids: &[PolicyId]) {
    debug!("resetting entitlements for {} policies", policy_ids.len());
    for &policy_id in policy_ids {
        ctx.entitlements.remove_policy(policy_id);
        if let Ok(policy) = ctx.policies.get(policy_id) {
            let rows = entitlement::materialize(&policy, ctx.membership, ctx.entities, ctx.permissions);
            ctx.entitlements.insert_all(rows);
        }
    }
}

/// Same contract as the serial version above, but the per-policy
/// materialization scan (read-only: sources/targets/permission lookups)
/// runs across a rayon thread pool. The deletes and the final batched
/// insert still happen on the calling thread — `EntitlementIndex`'s
/// `ArcSwap`-backed writes are not designed for concurrent writers, only
/// concurrent readers, so only the expensive read-side fan-out is
/// parallelized.
#[cfg(feature = "parallel")]
pub fn reset_entitlements(ctx: &PropagatorCtx, policy_ids: &[PolicyId]) {
    use rayon::prelude::*;

    debug!("resetting entitlements for {} policies (parallel scan)", policy_ids.len());
    for &policy_id in policy_ids {
        ctx.entitlements.remove_policy(policy_id);
    }

    let rows: Vec<EntitlementRow> = policy_ids
        .par_iter()
        .filter_map(|&policy_id| ctx.policies.get(policy_id).ok())
        .flat_map_iter(|policy| entitlement::materialize(&policy, ctx.membership, ctx.entities, ctx.permissions))
        .collect();

    let added = ctx.entitlements.insert_all(rows);
    debug!("parallel reset inserted {} entitlements", added);
}
