//! Engine error types.
//!
//! Per-host outcomes (identity conflict, unknown hypervisor with
//! creation disallowed) are data in the check-in result's failed
//! bucket, not errors; only structural problems surface here.

use tether_core::TetherError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed check-in report: {0}")]
    MalformedReport(String),
}

impl From<EngineError> for TetherError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::MalformedReport(msg) => TetherError::MalformedReport(msg),
        }
    }
}
