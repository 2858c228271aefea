//! Reconciler errors.

use syncgrid_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("schema catalog unavailable for {sync_target}: {message}")]
    CatalogUnavailable { sync_target: String, message: String },

    #[error("gave up on {sync_target} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { sync_target: String, attempts: u32 },
}

impl ReconcileError {
    /// Worth retrying with backoff rather than waiting for the next change.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::State(e) => e.is_transient(),
            ReconcileError::CatalogUnavailable { .. } => true,
            ReconcileError::ConflictRetriesExhausted { .. } => true,
        }
    }
}
