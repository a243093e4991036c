//! Attribute Catalog (Component C): interns `(domain, key, value)`
//! triples as attributes.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::ids::{AttributeId, DomainId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub id: AttributeId,
    pub domain: DomainId,
    pub key: String,
    pub value: String,
}

/// Interns attribute triples. `intern` is idempotent: identical triples
/// always yield the same id.
pub struct AttributeCatalog {
    by_triple: RwLock<HashMap<(DomainId, String, String), AttributeId>>,
    by_id: RwLock<HashMap<AttributeId, Attribute>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl AttributeCatalog {
    pub fn new() -> Self {
        Self {
            by_triple: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn intern(&self, domain: DomainId, key: &str, value: &str) -> AttributeId {
        let triple = (domain, key.to_string(), value.to_string());
        if let Some(id) = self.by_triple.read().get(&triple) {
            return *id;
        }

        let mut triples = self.by_triple.write();
        // Re-check under the write lock in case of a race between the
        // read above and acquiring this lock.
        if let Some(id) = triples.get(&triple) {
            return *id;
        }

        let id = AttributeId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        triples.insert(triple.clone(), id);
        self.by_id.write().insert(
            id,
            Attribute {
                id,
                domain,
                key: triple.1,
                value: triple.2,
            },
        );
        id
    }

    pub fn get(&self, id: AttributeId) -> Result<Attribute> {
        self.by_id
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::AttributeNotFound(id))
    }
}

impl Default for AttributeCatalog {
    fn default() -> Self {
        Self::new()
    }
}
