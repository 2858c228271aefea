//! Discovery errors.

use syncgrid_state::{CatalogError, StateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("sync target not found: {0}")]
    SyncTargetNotFound(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
