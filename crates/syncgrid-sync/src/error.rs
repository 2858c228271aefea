//! Object controller errors.

use syncgrid_state::StateError;
use thiserror::Error;

use crate::machine::TransitionError;
use crate::state::AnnotationError;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("sync target not found: {0}")]
    SyncTargetNotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The object is quarantined for this sync target until the value is fixed.
    #[error("object {object} quarantined: {source}")]
    Quarantined {
        object: String,
        #[source]
        source: AnnotationError,
    },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("gave up on {0} after repeated conflicting writes")]
    ConflictRetriesExhausted(String),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::ObjectNotFound(_) | SyncError::SyncTargetNotFound(_))
    }
}
