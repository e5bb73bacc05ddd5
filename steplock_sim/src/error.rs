//! Harness errors.

use steplock_core::{BoundaryError, SnapshotError};
use thiserror::Error;

/// Why a scenario stopped before its assertions could pass.
#[derive(Debug, Error)]
pub enum ScenarioFailure {
    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Replicas diverged at step {step}: {digests:?}")]
    Divergence { step: u64, digests: Vec<String> },

    #[error("Boundary rejected a call: {0}")]
    Boundary(#[from] BoundaryError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Producer task failed: {0}")]
    Join(String),
}

/// Fails with an assertion error unless `condition` holds.
pub fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Result<(), ScenarioFailure> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioFailure::Assertion(reason()))
    }
}
