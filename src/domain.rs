//! Domain DAG (Component E): a domain is a component (it owns an
//! entity) plus a unique slug and a set of member entities. Domains may
//! contain other domains, yielding a DAG with cycle prevention.

use tracing::warn;

use crate::component::{Component, ComponentStore};
use crate::error::{EngineError, Result};
use crate::ids::{DomainId, EntityId};
use crate::membership::MembershipIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub slug: String,
}

impl Component for Domain {
    const TYPE_NAME: &'static str = "Domain";
}

fn is_domain(components: &ComponentStore, entity: EntityId) -> bool {
    components.get::<Domain>(entity).is_ok()
}

/// Direct child domains: members of `domain` that are themselves
/// domains.
pub fn subdomains(components: &ComponentStore, membership: &MembershipIndex, domain: DomainId) -> Vec<DomainId> {
    membership
        .members_of(domain)
        .into_iter()
        .filter(|e| is_domain(components, *e))
        .map(DomainId)
        .collect()
}

/// Direct parent domains of `entity`.
pub fn superdomains(membership: &MembershipIndex, entity: EntityId) -> Vec<DomainId> {
    membership.domains_of(entity).into_iter().collect()
}

/// Reflexive transitive closure: does `domain`'s subdomain tree contain
/// `candidate` (or is `domain` itself `candidate`)?
pub fn has_subdomain_recursive(
    components: &ComponentStore,
    membership: &MembershipIndex,
    domain: DomainId,
    candidate: DomainId,
) -> bool {
    if domain == candidate {
        return true;
    }
    subdomains(components, membership, domain)
        .into_iter()
        .any(|sub| has_subdomain_recursive(components, membership, sub, candidate))
}

/// Is `entity` a (possibly transitive) member of `domain`?
pub fn is_in_domain(
    components: &ComponentStore,
    membership: &MembershipIndex,
    entity: EntityId,
    domain: DomainId,
    recursive: bool,
) -> bool {
    if membership.is_in_domain(entity, domain) {
        return true;
    }
    if !recursive {
        return false;
    }
    membership
        .domains_of(entity)
        .into_iter()
        .any(|d| has_subdomain_recursive(components, membership, d, domain))
}

/// Adds `entity` as a member of `domain`, rejecting (or, in lenient
/// mode, filtering) additions that would create a cycle in the domain
/// DAG.
///
/// Self-membership (`domain.0 == entity`) is always rejected as a
/// degenerate cycle. When `entity` is itself a domain, the addition is
/// rejected if `entity` already (reflexively, transitively) contains
/// `domain` as a subdomain.
pub fn add_to_domain(
    components: &ComponentStore,
    membership: &MembershipIndex,
    entity: EntityId,
    domain: DomainId,
    strict_cycles: bool,
) -> Result<()> {
    let would_cycle = domain.0 == entity
        || (is_domain(components, entity)
            && has_subdomain_recursive(components, membership, DomainId(entity), domain));

    if would_cycle {
        let violation = EngineError::CycleViolation {
            domain,
            member: entity,
        };
        return if strict_cycles {
            Err(violation)
        } else {
            warn!("dropping membership of {} in domain {} that would create a cycle", entity, domain);
            Ok(())
        };
    }

    membership.add_domain_membership(entity, domain);
    Ok(())
}
