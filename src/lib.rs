//! Attribute-based authorization engine over an entity/component data
//! model.
//!
//! A population of entities accumulates typed components, domain
//! memberships and attributes; declarative policies describe which
//! attribute-holding entities in a domain may exercise which
//! permissions on which other attribute-holding entities. A forward-
//! chaining propagator keeps a materialized `(source, permission,
//! target, policy)` index in sync with every such mutation so that the
//! authorization question itself — "may `subject` do `permission` on
//! `target`?" — is an O(1) lookup.
//!
//! [`Store`] is the crate's entry point: one instance per host process,
//! owning every subsystem below and exposing the mutation and query API
//! a host calls into directly.
//!
//! ```
//! use entitlement_engine::{Component, EngineConfig, PermissionRef, Store};
//!
//! #[derive(Debug, Clone)]
//! struct Thing;
//! impl Component for Thing {
//!     const TYPE_NAME: &'static str = "Thing";
//! }
//!
//! let store = Store::new(EngineConfig::default());
//! store.register_component_type::<Thing>();
//! store.register_permission(PermissionRef {
//!     id: entitlement_engine::PermissionId(1),
//!     app_label: "testapp".into(),
//!     codename: "can_use_thing".into(),
//!     content_type: "Thing",
//! });
//!
//! let domain = store.create_domain("acme").unwrap();
//! store
//!     .create_policy(domain, "members_can_use_things", &["role:member"], &["testapp.can_use_thing"], &[])
//!     .unwrap();
//!
//! let alice = store.create_component(None, Thing).unwrap();
//! let widget = store.create_component(None, Thing).unwrap();
//! store.add_to_domain(alice, domain).unwrap();
//! store.add_to_domain(widget, domain).unwrap();
//! assert!(!store.has_perm(alice, "testapp.can_use_thing", widget));
//!
//! store.add_attr_kv(alice, domain, "role", "member").unwrap();
//! assert!(store.has_perm(alice, "testapp.can_use_thing", widget));
//! ```

pub mod attribute;
pub mod authorization;
pub mod clock;
pub mod component;
pub mod config;
pub mod domain;
pub mod entitlement;
pub mod entity;
pub mod error;
pub mod ids;
pub mod membership;
pub mod permission;
pub mod policy;
pub mod propagator;
pub mod store;
pub mod transaction;

pub use attribute::Attribute;
pub use authorization::Authorizer;
pub use clock::{Clock, FakeClock, SystemClock, Timestamp};
pub use component::Component;
pub use config::EngineConfig;
pub use domain::Domain;
pub use entitlement::EntitlementRow;
pub use entity::Entity;
pub use error::{EngineError, Result};
pub use ids::{AttributeId, DomainId, EntityId, PermissionId, PolicyId};
pub use permission::PermissionRef;
pub use policy::Policy;
pub use store::Store;
