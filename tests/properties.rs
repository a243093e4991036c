//! Property-based checks for the universal invariants: the
//! domain DAG never admits a cycle, soft-delete/undelete round-trips
//! leave the store in the same observable state, the entitlement index
//! is sound and complete against the policies it materializes from, and
//! `has_perm` moves monotonically with the attribute/domain mutations
//! that drive it.

use std::collections::HashSet;

use entitlement_engine::{AttributeId, Component, DomainId, EngineConfig, EntityId, PermissionId, PolicyId, Store};
use proptest::prelude::*;

const PERM: &str = "testapp.can_use_thing";

#[derive(Debug, Clone, PartialEq)]
struct Widget;
impl Component for Widget {
    const TYPE_NAME: &'static str = "Widget";
}

/// Builds a random chain of `add_to_domain` attempts over a small fixed
/// pool of domains and asserts the DAG invariant — no domain is ever its
/// own subdomain — holds no matter which attempts succeeded.
fn assert_acyclic(store: &Store, domains: &[entitlement_engine::DomainId]) {
    for &d in domains {
        for &other in domains {
            if other == d {
                continue;
            }
            if store.has_subdomain_recursive(d, other) {
                assert!(
                    !store.has_subdomain_recursive(other, d),
                    "domains {:?} and {:?} must not mutually contain each other",
                    d,
                    other
                );
            }
        }
    }
}

proptest! {
    #[test]
    fn domain_dag_never_cycles(edges in proptest::collection::vec((0usize..5, 0usize..5), 0..20)) {
        let store = Store::new(EngineConfig::default());
        let domains: Vec<_> = (0..5).map(|i| store.create_domain(&format!("d{i}")).unwrap()).collect();

        for (from, to) in edges {
            if from == to {
                continue;
            }
            // Best-effort: a cycle-inducing edge is rejected by the
            // engine and simply doesn't get added.
            let _ = store.add_to_domain(domains[from].into(), domains[to]);
        }

        assert_acyclic(&store, &domains);
    }

    #[test]
    fn soft_delete_undelete_round_trips(n in 1usize..20) {
        let store = Store::new(EngineConfig::default());
        store.register_component_type::<Widget>();

        let ids: Vec<_> = (0..n).map(|_| store.create_component(None, Widget).unwrap()).collect();
        for &id in &ids {
            store.delete_component::<Widget>(id, false, false).unwrap();
            store.delete_component::<Widget>(id, false, false).unwrap(); // idempotent
            prop_assert!(store.entity(id).is_err());
            prop_assert!(store.entity_archived(id).unwrap().is_deleted());

            store.undelete_entity(id).unwrap();
            let restored = store.entity(id).unwrap();
            prop_assert!(!restored.is_deleted());
            prop_assert!(restored.deleted_at.is_none());
        }
    }
}

/// A policy with two required source attrs and one required target
/// attr, over a small fixed pool of candidate entities, used as a
/// shadow model for the entitlement index: the policy's conjunctions
/// are always re-derived from public queries (`is_in_domain`,
/// `has_attr`, `policy().disabled`), independently of `has_perm`, so
/// comparing the two against each other actually exercises the
/// propagator rather than restating its own bookkeeping.
struct Universe {
    store: Store,
    domain: DomainId,
    pool: Vec<EntityId>,
    src_a: AttributeId,
    src_b: AttributeId,
    tgt_a: AttributeId,
    policy: PolicyId,
}

const POOL_SIZE: usize = 4;

impl Universe {
    fn new() -> Self {
        let store = Store::new(EngineConfig::default());
        store.register_component_type::<Widget>();
        store.register_permission(entitlement_engine::PermissionRef {
            id: PermissionId(1),
            app_label: "testapp".into(),
            codename: "can_use_thing".into(),
            content_type: "Widget",
        });

        let domain = store.create_domain("D").unwrap();
        let pool: Vec<_> = (0..POOL_SIZE).map(|_| store.create_component(None, Widget).unwrap()).collect();

        let src_a = store.intern_attr(domain, "tag", "a");
        let src_b = store.intern_attr(domain, "tag", "b");
        let tgt_a = store.intern_attr(domain, "access", "exclusive");

        let policy = store
            .create_policy(domain, "p", &["tag:a", "tag:b"], &[PERM], &["access:exclusive"])
            .unwrap();

        Universe { store, domain, pool, src_a, src_b, tgt_a, policy }
    }

    /// Conjunction the policy demands, recomputed from scratch every
    /// time from public queries rather than cached state.
    fn expects(&self, s: EntityId, t: EntityId) -> bool {
        self.store.is_in_domain(s, self.domain, false)
            && self.store.is_in_domain(t, self.domain, false)
            && self.store.has_attr(s, self.src_a)
            && self.store.has_attr(s, self.src_b)
            && self.store.has_attr(t, self.tgt_a)
            && !self.store.policy(self.policy).unwrap().disabled
    }

    fn assert_consistent(&self) {
        for &s in &self.pool {
            for &t in &self.pool {
                if s == t {
                    continue;
                }
                assert_eq!(
                    self.store.has_perm(s, PERM, t),
                    self.expects(s, t),
                    "has_perm({s:?}, {PERM}, {t:?}) disagrees with the policy's own conjunctions"
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Join(usize),
    Leave(usize),
    AddSrcA(usize),
    RemSrcA(usize),
    AddSrcB(usize),
    RemSrcB(usize),
    AddTgt(usize),
    RemTgt(usize),
    ToggleDisabled,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0..POOL_SIZE).prop_map(Action::Join),
        (0..POOL_SIZE).prop_map(Action::Leave),
        (0..POOL_SIZE).prop_map(Action::AddSrcA),
        (0..POOL_SIZE).prop_map(Action::RemSrcA),
        (0..POOL_SIZE).prop_map(Action::AddSrcB),
        (0..POOL_SIZE).prop_map(Action::RemSrcB),
        (0..POOL_SIZE).prop_map(Action::AddTgt),
        (0..POOL_SIZE).prop_map(Action::RemTgt),
        Just(Action::ToggleDisabled),
    ]
}

impl Universe {
    fn apply(&self, action: Action) {
        let e = |i: usize| self.pool[i];
        match action {
            Action::Join(i) => {
                let _ = self.store.add_to_domain(e(i), self.domain);
            }
            Action::Leave(i) => {
                let _ = self.store.remove_from_domain(e(i), self.domain);
            }
            Action::AddSrcA(i) => {
                let _ = self.store.add_attr(e(i), self.src_a);
            }
            Action::RemSrcA(i) => {
                let _ = self.store.remove_attr(e(i), self.src_a);
            }
            Action::AddSrcB(i) => {
                let _ = self.store.add_attr(e(i), self.src_b);
            }
            Action::RemSrcB(i) => {
                let _ = self.store.remove_attr(e(i), self.src_b);
            }
            Action::AddTgt(i) => {
                let _ = self.store.add_attr(e(i), self.tgt_a);
            }
            Action::RemTgt(i) => {
                let _ = self.store.remove_attr(e(i), self.tgt_a);
            }
            Action::ToggleDisabled => {
                let disabled = self.store.policy(self.policy).unwrap().disabled;
                self.store.set_policy_disabled(self.policy, !disabled).unwrap();
            }
        }
    }
}

proptest! {
    /// Entitlement soundness: every `(permission, target)` pair
    /// `entitlements_for` surfaces for a subject is one the policy's own
    /// conjunctions (domain membership, source/target attrs, not
    /// disabled) actually license — no row in the materialized index
    /// outlives the conditions that justified it.
    #[test]
    fn entitlement_soundness(actions in proptest::collection::vec(action_strategy(), 0..60)) {
        let u = Universe::new();
        for action in actions {
            u.apply(action);
            u.assert_consistent();
            for &s in &u.pool {
                for (perm, t) in u.store.entitlements_for(s) {
                    prop_assert_eq!(perm, PermissionId(1));
                    prop_assert!(
                        u.expects(s, t),
                        "entitlements_for surfaced ({s:?}, {t:?}) without the policy's conjunctions holding"
                    );
                }
            }
        }
    }

    /// Entitlement completeness: whenever the policy's conjunctions
    /// hold for a pair `(s, t)`, a matching entitlement actually exists
    /// — the forward-chaining propagator never silently drops a pair it
    /// owes an entitlement.
    #[test]
    fn entitlement_completeness(actions in proptest::collection::vec(action_strategy(), 0..60)) {
        let u = Universe::new();
        for action in actions {
            u.apply(action);
            u.assert_consistent();
            for &s in &u.pool {
                let owed: HashSet<EntityId> = u
                    .pool
                    .iter()
                    .copied()
                    .filter(|&t| t != s && u.expects(s, t))
                    .collect();
                let surfaced: HashSet<EntityId> =
                    u.store.entitlements_for(s).into_iter().map(|(_, t)| t).collect();
                for t in owed {
                    prop_assert!(
                        surfaced.contains(&t),
                        "policy conjunctions hold for ({s:?}, {t:?}) but no entitlement surfaced"
                    );
                }
            }
        }
    }

    /// Permission monotonicity on add: once every conjunct a policy
    /// demands has been added, `has_perm` becomes `true` and stays
    /// `true` under further unrelated additions, until something that
    /// conjunction depends on is taken away.
    #[test]
    fn permission_monotonicity_on_add(extra_noise in proptest::collection::vec(action_strategy(), 0..10)) {
        let u = Universe::new();
        let s = u.pool[0];
        let t = u.pool[1];

        u.store.add_to_domain(s, u.domain).unwrap();
        u.store.add_to_domain(t, u.domain).unwrap();
        prop_assert!(!u.store.has_perm(s, PERM, t));

        u.store.add_attr(s, u.src_a).unwrap();
        prop_assert!(!u.store.has_perm(s, PERM, t), "one of two source conjuncts is not enough");

        u.store.add_attr(s, u.src_b).unwrap();
        prop_assert!(!u.store.has_perm(s, PERM, t), "target still lacks its attribute");

        u.store.add_attr(t, u.tgt_a).unwrap();
        prop_assert!(u.store.has_perm(s, PERM, t), "every conjunct now holds");

        // Unrelated mutations on other pool members must never flip
        // (s, t) back to false.
        for action in extra_noise {
            match action {
                Action::Join(i) | Action::Leave(i) | Action::AddSrcA(i) | Action::RemSrcA(i)
                | Action::AddSrcB(i) | Action::RemSrcB(i) | Action::AddTgt(i) | Action::RemTgt(i)
                    if i == 0 || i == 1 =>
                {
                    continue;
                }
                Action::ToggleDisabled => continue,
                other => u.apply(other),
            }
            prop_assert!(u.store.has_perm(s, PERM, t), "unrelated mutation must not revoke an established grant");
        }

        u.store.remove_attr(s, u.src_a).unwrap();
        prop_assert!(!u.store.has_perm(s, PERM, t), "removing one conjunct source attr revokes access");
    }
}
