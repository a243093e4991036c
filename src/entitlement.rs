//! Entitlement Index (Component G): the materialized
//! `(source, permission, target, policy)` fact table. Never edited by
//! users; only the propagator writes to it.

use std::collections::{HashMap, HashSet};

use arc_swap::ArcSwap;

use crate::entity::EntityRegistry;
use crate::ids::{EntityId, PermissionId, PolicyId};
use crate::membership::MembershipIndex;
use crate::permission::PermissionCatalog;
use crate::policy::{self, Policy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntitlementRow {
    pub policy: PolicyId,
    pub source: EntityId,
    pub permission: PermissionId,
    pub target: EntityId,
}

/// Opaque point-in-time view of the entitlement index, handed out only
/// as a restore handle for [`crate::transaction::Sequencer`].
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    rows: HashSet<EntitlementRow>,
    // (source, permission, target) -> policies contributing that triple.
    by_triple: HashMap<(EntityId, PermissionId, EntityId), Vec<PolicyId>>,
}

impl Snapshot {
    fn insert(&mut self, row: EntitlementRow) -> bool {
        if !self.rows.insert(row) {
            return false;
        }
        self.by_triple
            .entry((row.source, row.permission, row.target))
            .or_default()
            .push(row.policy);
        true
    }

    fn remove(&mut self, row: &EntitlementRow) -> bool {
        if !self.rows.remove(row) {
            return false;
        }
        let key = (row.source, row.permission, row.target);
        if let Some(policies) = self.by_triple.get_mut(&key) {
            policies.retain(|p| *p != row.policy);
            if policies.is_empty() {
                self.by_triple.remove(&key);
            }
        }
        true
    }
}

/// Lock-free reads via `ArcSwap`; writes build a new snapshot from the
/// current one and swap it in under the caller's transaction.
pub struct EntitlementIndex {
    snapshot: ArcSwap<Snapshot>,
}

impl EntitlementIndex {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// Policies holding an entitlement on `(source, permission, target)`,
    /// for `has_perm` and `entitlements_for` to join against policy
    /// liveness.
    pub fn policies_for(&self, source: EntityId, permission: PermissionId, target: EntityId) -> Vec<PolicyId> {
        self.snapshot
            .load()
            .by_triple
            .get(&(source, permission, target))
            .cloned()
            .unwrap_or_default()
    }

    pub fn rows_for_source(&self, source: EntityId) -> Vec<EntitlementRow> {
        self.snapshot
            .load()
            .rows
            .iter()
            .filter(|r| r.source == source)
            .copied()
            .collect()
    }

    pub fn rows_for_policy(&self, policy: PolicyId) -> Vec<EntitlementRow> {
        self.snapshot
            .load()
            .rows
            .iter()
            .filter(|r| r.policy == policy)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts every row not already present (conflict-safe, batched).
    /// Returns the number of rows actually added.
    pub fn insert_all(&self, rows: impl IntoIterator<Item = EntitlementRow>) -> usize {
        let mut next = (**self.snapshot.load()).clone();
        let mut added = 0;
        for row in rows {
            if next.insert(row) {
                added += 1;
            }
        }
        if added > 0 {
            self.snapshot.store(std::sync::Arc::new(next));
        }
        added
    }

    /// Removes every row for which `predicate` returns `true`. Returns
    /// the number of rows removed.
    pub fn remove_where(&self, predicate: impl Fn(&EntitlementRow) -> bool) -> usize {
        let current = self.snapshot.load();
        let to_remove: Vec<EntitlementRow> = current.rows.iter().filter(|r| predicate(r)).copied().collect();
        if to_remove.is_empty() {
            return 0;
        }
        let mut next = (**current).clone();
        drop(current);
        for row in &to_remove {
            next.remove(row);
        }
        self.snapshot.store(std::sync::Arc::new(next));
        to_remove.len()
    }

    pub fn remove_policy(&self, policy: PolicyId) -> usize {
        self.remove_where(|r| r.policy == policy)
    }

    /// Captures the current snapshot, for [`crate::transaction::Sequencer`]
    /// to restore if the mutation it is guarding fails partway through.
    pub fn snapshot_handle(&self) -> std::sync::Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Restores a previously captured snapshot, discarding any rows
    /// inserted or removed since it was taken.
    pub fn restore(&self, handle: std::sync::Arc<Snapshot>) {
        self.snapshot.store(handle);
    }
}

impl Default for EntitlementIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Full materialization of one policy: for each source × target ×
/// permission with `permission.content_type ∈ target.content_types`,
/// produce a candidate entitlement row. Soft-deleted sources/targets are
/// excluded.
pub fn materialize(
    policy: &Policy,
    membership: &MembershipIndex,
    entities: &EntityRegistry,
    permissions: &PermissionCatalog,
) -> Vec<EntitlementRow> {
    let sources = policy::filter_live(entities, policy::sources(policy, membership));
    let targets = policy::filter_live(entities, policy::targets(policy, membership));

    let mut rows = Vec::new();
    for &target in &targets {
        let Ok(target_entity) = entities.get(target) else {
            continue;
        };
        for &perm_id in &policy.allow_permissions {
            let Ok(perm) = permissions.get(perm_id) else {
                continue;
            };
            if !target_entity.content_types.contains(perm.content_type) {
                continue;
            }
            for &source in &sources {
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
}
