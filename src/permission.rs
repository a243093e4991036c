//! Host permission catalog: the engine never mints permissions, only
//! resolves strings like `"app.codename"` against a catalog the host
//! supplies.

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::ids::PermissionId;

/// A permission as the host's authorization catalog describes it:
/// `app_label.codename`, scoped to the component type (`content_type`)
/// it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionRef {
    pub id: PermissionId,
    pub app_label: String,
    pub codename: String,
    pub content_type: &'static str,
}

/// Read-only view over the host's permission table. The engine resolves
/// `"app.codename"` strings against this when building policies and
/// when answering `has_perm`.
pub struct PermissionCatalog {
    by_id: HashMap<PermissionId, PermissionRef>,
    by_label: HashMap<(String, String), PermissionId>,
}

impl PermissionCatalog {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_label: HashMap::new(),
        }
    }

    /// Registers a permission the host's authorization table defines.
    /// Typically called once at startup for every row of the host's
    /// `(id, codename, content_type.app_label, content_type.model)`
    /// table.
    pub fn register(&mut self, perm: PermissionRef) {
        self.by_label
            .insert((perm.app_label.clone(), perm.codename.clone()), perm.id);
        self.by_id.insert(perm.id, perm);
    }

    pub fn get(&self, id: PermissionId) -> Result<&PermissionRef> {
        self.by_id.get(&id).ok_or_else(|| {
            EngineError::IntegrityViolation(format!("permission {} not in host catalog", id))
        })
    }

    /// Parses and resolves an `"app_label.codename"` string.
    pub fn resolve(&self, perm_str: &str) -> Result<PermissionId> {
        let (app_label, codename) = split_perm_str(perm_str)?;
        self.by_label
            .get(&(app_label.to_string(), codename.to_string()))
            .copied()
            .ok_or_else(|| EngineError::IntegrityViolation(format!("unknown permission '{perm_str}'")))
    }
}

impl Default for PermissionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `"app_label.codename"` into its two parts.
pub fn split_perm_str(s: &str) -> Result<(&str, &str)> {
    s.split_once('.')
        .ok_or_else(|| EngineError::IntegrityViolation(format!("malformed permission string '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_round_trips_registered_permission() {
        let mut catalog = PermissionCatalog::new();
        catalog.register(PermissionRef {
            id: PermissionId(1),
            app_label: "testapp".into(),
            codename: "can_use_thing".into(),
            content_type: "Thing",
        });
        let id = catalog.resolve("testapp.can_use_thing").unwrap();
        assert_eq!(id, PermissionId(1));
    }

    #[test]
    fn resolve_rejects_malformed_string() {
        let catalog = PermissionCatalog::new();
        assert!(catalog.resolve("not-a-permission").is_err());
    }
}
