//! Resolver errors.

use syncgrid_core::ExportReference;
use syncgrid_state::CatalogError;
use thiserror::Error;

/// A per-export failure. The export's resources are skipped; the rest of
/// the resolution still succeeds.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("export {export} could not be resolved: {source}")]
    UnresolvedExport {
        export: ExportReference,
        #[source]
        source: CatalogError,
    },
}

impl ResolveError {
    pub fn export(&self) -> &ExportReference {
        match self {
            ResolveError::UnresolvedExport { export, .. } => export,
        }
    }

    /// The catalog could not be read; the reference itself may be fine.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::UnresolvedExport { source, .. } => match source {
                CatalogError::State(e) => e.is_transient(),
                _ => false,
            },
        }
    }
}
