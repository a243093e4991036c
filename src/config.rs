//! Engine configuration.

/// Tunables for a [`crate::store::Store`]. Constructed directly by the
/// host; the engine never reads environment variables or files.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whether adding a domain membership that would create a cycle is a
    /// hard error (`true`) or silently filtered with a logged warning
    /// (`false`). Default: strict.
    pub strict_cycles: bool,

    /// Sizing hint for the entity registry's backing map.
    pub initial_entity_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_cycles: true,
            initial_entity_capacity: 64,
        }
    }
}
