//! Error taxonomy for the authorization engine.

use thiserror::Error;

use crate::ids::{AttributeId, DomainId, EntityId, PolicyId};

/// Errors raised by mutating operations. `Authorizer::has_perm` never
/// returns this type; failures there collapse to `false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// An entity, component, attribute or policy lookup found nothing.
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("entity {entity} carries no component of type '{component_type}'")]
    ComponentNotFound {
        entity: EntityId,
        component_type: &'static str,
    },

    #[error("attribute {0} not found")]
    AttributeNotFound(AttributeId),

    #[error("policy {0} not found")]
    PolicyNotFound(PolicyId),

    /// `add_attr` on an entity not a member of the attribute's domain.
    #[error("entity {entity} is not a member of domain {domain}, cannot hold attributes scoped to it")]
    DomainViolation { entity: EntityId, domain: DomainId },

    /// Adding a domain membership would create a cycle in the domain DAG.
    #[error("adding {member} as a member of domain {domain} would create a cycle")]
    CycleViolation { domain: DomainId, member: EntityId },

    /// A uniqueness constraint (component-per-entity, policy label,
    /// attribute triple) was violated.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A storage-level invariant was broken; this indicates a bug in the
    /// engine rather than misuse by a caller.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
