//! The compatibility resolver.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use syncgrid_core::GroupResource;
use syncgrid_state::{
    CompatibilityState, ResourceToSync, SchemaCatalog, SyncTarget, SyncerHeartbeat,
};

use crate::error::ResolveError;

/// Output of one resolver run.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Desired `synced_resources`, unique by (group, resource), sorted by
    /// (resource, group).
    pub resources: Vec<ResourceToSync>,
    /// Exports whose resources were skipped.
    pub unresolved: Vec<ResolveError>,
}

impl Resolution {
    /// Whether any export failed only because the catalog was unreadable.
    pub fn has_transient_errors(&self) -> bool {
        self.unresolved.iter().any(ResolveError::is_transient)
    }

    /// Exports that are genuinely missing from the catalog.
    pub fn misconfigured(&self) -> impl Iterator<Item = &ResolveError> {
        self.unresolved.iter().filter(|e| !e.is_transient())
    }
}

/// Compute the resources a sync target should attempt and their
/// compatibility with what its syncer last reported.
///
/// A heartbeat carrying a different UID belongs to a previous registration
/// of the same name and is ignored.
pub fn resolve(
    target: &SyncTarget,
    catalog: &dyn SchemaCatalog,
    heartbeat: Option<&SyncerHeartbeat>,
) -> Resolution {
    let key = target.table_key();
    let heartbeat = heartbeat.filter(|hb| {
        let matches = hb.uid == target.uid;
        if !matches {
            debug!(sync_target = %key, heartbeat_uid = %hb.uid, "ignoring heartbeat from stale registration");
        }
        matches
    });

    let mut resolution = Resolution::default();
    let mut candidates: BTreeMap<GroupResource, ResourceToSync> = BTreeMap::new();

    for export in target.effective_exports() {
        let latest = match catalog.get_latest_schemas(&export) {
            Ok(latest) => latest,
            Err(source) => {
                warn!(sync_target = %key, %export, error = %source, "skipping unresolved export");
                resolution
                    .unresolved
                    .push(ResolveError::UnresolvedExport { export, source });
                continue;
            }
        };

        for schema in &latest.schemas {
            let gr = schema.group_resource();
            if candidates.contains_key(&gr) {
                debug!(sync_target = %key, resource = %gr, %export, "resource already provided by an earlier export");
                continue;
            }

            let versions = schema.served_versions();
            if versions.is_empty() {
                warn!(sync_target = %key, resource = %gr, schema = %schema.name, "schema serves no versions");
                continue;
            }

            let state = compatibility(&gr, &versions, schema.updated_at, heartbeat);
            // Built-in types are not owned by any export identity.
            let identity_hash = if gr.is_core() {
                String::new()
            } else {
                latest.identity_hash.clone()
            };

            candidates.insert(
                gr.clone(),
                ResourceToSync {
                    group_resource: gr,
                    versions,
                    identity_hash,
                    state,
                },
            );
        }
    }

    let mut resources: Vec<ResourceToSync> = candidates.into_values().collect();
    resources.sort_by(|a, b| {
        (&a.group_resource.resource, &a.group_resource.group)
            .cmp(&(&b.group_resource.resource, &b.group_resource.group))
    });
    resolution.resources = resources;
    resolution
}

/// Decide one tuple's state against the syncer's capability snapshot.
///
/// The snapshot is the syncer's full downstream API surface at
/// `observed_at`, so a resource missing from it is incompatible, while a
/// schema changed after the snapshot has not been evaluated yet.
pub fn compatibility(
    gr: &GroupResource,
    versions: &[String],
    schema_updated_at: DateTime<Utc>,
    heartbeat: Option<&SyncerHeartbeat>,
) -> CompatibilityState {
    let Some(heartbeat) = heartbeat else {
        return CompatibilityState::Pending;
    };
    if schema_updated_at > heartbeat.observed_at {
        return CompatibilityState::Pending;
    }
    match heartbeat.versions_for(gr) {
        Some(understood) if versions.iter().any(|v| understood.contains(v)) => {
            CompatibilityState::Accepted
        }
        _ => CompatibilityState::Incompatible,
    }
}
