//! Typed identifiers used throughout the store.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(EntityId);
id_type!(AttributeId);
id_type!(PolicyId);
id_type!(PermissionId);

/// A domain is itself an entity; this wrapper marks an
/// `EntityId` that is known to be carrying a `Domain` component without
/// introducing a disjoint id space.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(pub EntityId);

impl fmt::Debug for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainId({})", (self.0).0)
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", (self.0).0)
    }
}

impl From<EntityId> for DomainId {
    fn from(id: EntityId) -> Self {
        DomainId(id)
    }
}

impl From<DomainId> for EntityId {
    fn from(id: DomainId) -> Self {
        id.0
    }
}
