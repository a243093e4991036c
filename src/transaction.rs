//! Mutation atomicity: a single logical writer serialized through one
//! sequencer, with the entitlement index's delta rolled back if the
//! triggering mutation fails partway through.
//!
//! Grounded on `packages/in-mem-db-core/src/transaction/transaction.rs`'s
//! stage/commit/abort shape, adapted from byte-buffer staging to a
//! snapshot/restore over the one collection (the entitlement index)
//! that every propagator handler writes to. The entity, component,
//! attribute and membership stores are check-then-write: every mutating
//! method validates its precondition before touching any collection, so
//! there is no partial state to unwind on their error paths. The one
//! thing a mutation can leave half-applied is the entitlement-index
//! delta, which is exactly what this type guards.

use parking_lot::Mutex;

use crate::entitlement::EntitlementIndex;
use crate::error::Result;

/// The store's single logical sequencer: all mutations flow through
/// it. Reads never take this lock; only `Transaction::run` does.
#[derive(Default)]
pub struct Sequencer {
    lock: Mutex<()>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `body` with the sequencer held, rolling the entitlement
    /// index back to its pre-mutation snapshot if `body` returns `Err`.
    pub fn transact<T>(&self, entitlements: &EntitlementIndex, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock();
        let before = entitlements.snapshot_handle();
        match body() {
            Ok(value) => Ok(value),
            Err(err) => {
                entitlements.restore(before);
                Err(err)
            }
        }
    }
}
