//! Engine configuration.

/// Configuration for topology reconciliation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum length for consumer names synthesized from hypervisor
    /// ids or taken from reports (default: 250).
    pub max_consumer_name_len: usize,
    /// When true, a report whose hypervisor id is unknown may still be
    /// merged into an existing consumer by hardware-identity fact
    /// (default: true).
    pub match_hardware_identity: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_consumer_name_len: 250,
            match_hardware_identity: true,
        }
    }
}
