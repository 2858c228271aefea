//! Read-only view of API exports and their latest resource schemas.

use thiserror::Error;
use tracing::debug;

use syncgrid_core::ExportReference;

use crate::error::StateError;
use crate::store::StateStore;
use crate::types::{ApiExport, ResourceSchema};

/// Errors from catalog lookups.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("export not found: {0}")]
    ExportNotFound(ExportReference),

    #[error("schema {schema} referenced by export {export} not found")]
    SchemaNotFound {
        export: ExportReference,
        schema: String,
    },

    #[error("catalog storage error: {0}")]
    State(#[from] StateError),
}

impl CatalogError {
    /// The export reference is unresolvable, not a storage hiccup.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::ExportNotFound(_) | CatalogError::SchemaNotFound { .. }
        )
    }
}

/// Schemas of an export, in the export's declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestSchemas {
    pub export: ExportReference,
    pub identity_hash: String,
    pub schemas: Vec<ResourceSchema>,
}

/// Catalog lookups shared read-only by every resolver.
pub trait SchemaCatalog: Send + Sync {
    /// Fetch the latest schema set of an export.
    fn get_latest_schemas(&self, export: &ExportReference) -> Result<LatestSchemas, CatalogError>;

    /// Find the export owning an identity hash.
    fn find_export_by_identity(&self, identity_hash: &str) -> Result<Option<ApiExport>, CatalogError>;
}

impl SchemaCatalog for StateStore {
    fn get_latest_schemas(&self, export: &ExportReference) -> Result<LatestSchemas, CatalogError> {
        let api_export = self
            .get_api_export(&export.workspace, &export.export_name)?
            .ok_or_else(|| CatalogError::ExportNotFound(export.clone()))?;

        let mut schemas = Vec::with_capacity(api_export.latest_resource_schemas.len());
        for schema_name in &api_export.latest_resource_schemas {
            let schema = self
                .get_resource_schema(&api_export.workspace, schema_name)?
                .ok_or_else(|| CatalogError::SchemaNotFound {
                    export: export.clone(),
                    schema: schema_name.clone(),
                })?;
            schemas.push(schema);
        }

        debug!(%export, schemas = schemas.len(), "resolved latest schemas");
        Ok(LatestSchemas {
            export: export.clone(),
            identity_hash: api_export.identity_hash,
            schemas,
        })
    }

    fn find_export_by_identity(&self, identity_hash: &str) -> Result<Option<ApiExport>, CatalogError> {
        if identity_hash.is_empty() {
            return Ok(None);
        }
        Ok(self
            .list_api_exports()?
            .into_iter()
            .find(|e| e.identity_hash == identity_hash))
    }
}
