//! Authorization Query (Component I): the O(1) `has_perm` check against
//! the materialized entitlement index. Never raises — any lookup
//! failure collapses to `false`.

use crate::clock::Timestamp;
use crate::entitlement::EntitlementIndex;
use crate::entity::EntityRegistry;
use crate::ids::{EntityId, PermissionId};
use crate::permission::{self, PermissionCatalog};
use crate::policy::PolicyStore;

pub struct Authorizer<'a> {
    pub entities: &'a EntityRegistry,
    pub permissions: &'a PermissionCatalog,
    pub policies: &'a PolicyStore,
    pub entitlements: &'a EntitlementIndex,
}

impl<'a> Authorizer<'a> {
    /// `true` iff an entitlement exists matching `subject`, `target`,
    /// and `perm_str`'s `(app_label, codename)`, with the backing policy
    /// not disabled/expired and neither entity soft-deleted.
    pub fn has_perm(&self, subject: EntityId, perm_str: &str, target: EntityId, now: Timestamp) -> bool {
        let Ok((app_label, codename)) = permission::split_perm_str(perm_str) else {
            return false;
        };

        let Some(permission_id) = self.resolve_permission(app_label, codename) else {
            return false;
        };

        if !self.entities.contains(subject) || !self.entities.contains(target) {
            return false;
        }

        self.entitlements
            .policies_for(subject, permission_id, target)
            .into_iter()
            .any(|policy_id| {
                self.policies
                    .get(policy_id)
                    .map(|p| p.is_active(now))
                    .unwrap_or(false)
            })
    }

    /// Every `(permission, target)` pair `subject` is currently entitled
    /// to, through any active policy.
    pub fn entitlements_for(&self, subject: EntityId, now: Timestamp) -> Vec<(PermissionId, EntityId)> {
        if !self.entities.contains(subject) {
            return Vec::new();
        }
        self.entitlements
            .rows_for_source(subject)
            .into_iter()
            .filter(|row| {
                self.policies
                    .get(row.policy)
                    .map(|p| p.is_active(now))
                    .unwrap_or(false)
                    && self.entities.contains(row.target)
            })
            .map(|row| (row.permission, row.target))
            .collect()
    }

    fn resolve_permission(&self, app_label: &str, codename: &str) -> Option<PermissionId> {
        self.permissions.resolve(&format!("{app_label}.{codename}")).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeCatalog;
    use crate::component::ComponentStore;
    use crate::domain::Domain;
    use crate::entitlement::EntitlementRow;
    use crate::ids::PermissionId;
    use crate::permission::PermissionRef;
    use crate::policy::PolicyStore;

    #[test]
    fn has_perm_false_for_unknown_permission_string() {
        let entities = EntityRegistry::new(8);
        let permissions = PermissionCatalog::new();
        let policies = PolicyStore::new();
        let entitlements = EntitlementIndex::new();
        let auth = Authorizer {
            entities: &entities,
            permissions: &permissions,
            policies: &policies,
            entitlements: &entitlements,
        };
        let a = entities.create(0);
        let b = entities.create(0);
        assert!(!auth.has_perm(a, "nonsense", b, 0));
    }

    #[test]
    fn has_perm_respects_policy_disabled() {
        let entities = EntityRegistry::new(8);
        let components = ComponentStore::new();
        let catalog = AttributeCatalog::new();
        let mut permissions = PermissionCatalog::new();
        permissions.register(PermissionRef {
            id: PermissionId(1),
            app_label: "testapp".into(),
            codename: "can_use_thing".into(),
            content_type: "Thing",
        });
        let policies = PolicyStore::new();
        let entitlements = EntitlementIndex::new();

        let domain_entity = components
            .create_component(&entities, None, Domain { slug: "D".into() }, 0)
            .unwrap();
        let domain = crate::ids::DomainId(domain_entity);

        let u = entities.create(0);
        let t = entities.create(0);
        entities.add_content_type(t, "Thing").unwrap();

        let pid = policies
            .create_from_strs(&catalog, &permissions, domain, "p", &[], &["testapp.can_use_thing"], &[])
            .unwrap();
        entitlements.insert_all([EntitlementRow {
            policy: pid,
            source: u,
            permission: PermissionId(1),
            target: t,
        }]);

        let auth = Authorizer {
            entities: &entities,
            permissions: &permissions,
            policies: &policies,
            entitlements: &entitlements,
        };
        assert!(auth.has_perm(u, "testapp.can_use_thing", t, 0));

        policies.set_disabled(pid, true).unwrap();
        assert!(!auth.has_perm(u, "testapp.can_use_thing", t, 0));

        policies.set_disabled(pid, false).unwrap();
        assert!(auth.has_perm(u, "testapp.can_use_thing", t, 0));

        policies.set_expires_at(pid, Some(5)).unwrap();
        assert!(auth.has_perm(u, "testapp.can_use_thing", t, 4));
        assert!(!auth.has_perm(u, "testapp.can_use_thing", t, 5));
    }
}
