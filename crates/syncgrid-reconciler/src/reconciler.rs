//! One reconciliation pass over a sync target's status.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use syncgrid_core::config::ReconcilerSettings;
use syncgrid_core::GroupResource;
use syncgrid_state::{
    Condition, ConditionStatus, ConditionType, ResourceToSync, SchemaCatalog, StateStore, SyncTarget,
    SyncTargetStatus, SyncerHeartbeat, VirtualWorkspace,
};

use crate::error::ReconcileError;

/// What a pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The sync target no longer exists.
    Missing,
    /// Status already matched the desired state; nothing was written.
    Unchanged,
    /// Status was written at this resource version.
    Updated { resource_version: u64 },
}

/// How the export references fared in one pass.
#[derive(Debug)]
enum ExportsPass {
    Resolved,
    Missing(Vec<String>),
    /// Catalog reads failed transiently; resources were left as persisted.
    Unavailable(String),
}

struct Desired {
    /// `None` when the persisted status already matches.
    status: Option<SyncTargetStatus>,
    exports: ExportsPass,
}

/// Single writer of `SyncTarget.status`.
pub struct StatusReconciler {
    store: StateStore,
    catalog: Arc<dyn SchemaCatalog>,
    settings: ReconcilerSettings,
    /// Consecutive passes with unresolvable exports, per sync target.
    unresolved_passes: Mutex<HashMap<String, u32>>,
}

impl StatusReconciler {
    pub fn new(store: StateStore, settings: ReconcilerSettings) -> Self {
        let catalog = Arc::new(store.clone());
        Self::with_catalog(store, catalog, settings)
    }

    /// Resolve schemas through `catalog` instead of the store.
    pub fn with_catalog(store: StateStore, catalog: Arc<dyn SchemaCatalog>, settings: ReconcilerSettings) -> Self {
        Self {
            store,
            catalog,
            settings,
            unresolved_passes: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Reconcile one sync target at the current time.
    pub fn reconcile(&self, key: &str) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconcile_at(key, Utc::now())
    }

    /// Reconcile one sync target as of `now`.
    ///
    /// A conflicting concurrent write causes a fresh read and a full
    /// recomputation, up to `max_conflict_retries` times. The call counts
    /// as one escalation attempt however many recomputations it took.
    ///
    /// When the catalog is unavailable, heartbeat-derived fields are still
    /// written before [`ReconcileError::CatalogUnavailable`] is returned.
    pub fn reconcile_at(&self, key: &str, now: DateTime<Utc>) -> Result<ReconcileOutcome, ReconcileError> {
        let attempts = self.settings.max_conflict_retries + 1;
        let prior_passes = self.unresolved_passes(key);

        for attempt in 1..=attempts {
            let Some(target) = self.store.get_sync_target(key)? else {
                self.forget(key);
                debug!(sync_target = %key, "sync target gone");
                return Ok(ReconcileOutcome::Missing);
            };

            let desired = self.desired_status(&target, now, prior_passes)?;
            let outcome = match desired.status {
                None => ReconcileOutcome::Unchanged,
                Some(status) => {
                    let mut next = target.clone();
                    next.status = status;
                    match self.store.update_sync_target(&next) {
                        Ok(updated) => {
                            debug!(sync_target = %key, rv = updated.resource_version, "status written");
                            ReconcileOutcome::Updated {
                                resource_version: updated.resource_version,
                            }
                        }
                        Err(e) if e.is_conflict() => {
                            debug!(sync_target = %key, attempt, error = %e, "status write conflicted, recomputing");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            };
            return self.finish_pass(key, desired.exports, outcome);
        }

        Err(ReconcileError::ConflictRetriesExhausted {
            sync_target: key.to_string(),
            attempts,
        })
    }

    /// The status this target should have, given `prior_passes` earlier
    /// calls that found unresolvable exports.
    fn desired_status(
        &self,
        target: &SyncTarget,
        now: DateTime<Utc>,
        prior_passes: u32,
    ) -> Result<Desired, ReconcileError> {
        let key = target.table_key();
        let heartbeat = self
            .store
            .get_heartbeat(&key)?
            .filter(|hb| hb.uid == target.uid);

        let mut status = target.status.clone();

        let resolution = syncgrid_compat::resolve(target, self.catalog.as_ref(), heartbeat.as_ref());
        let exports = if resolution.has_transient_errors() {
            let message = resolution
                .unresolved
                .iter()
                .filter(|e| e.is_transient())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            warn!(sync_target = %key, %message, "catalog unavailable, keeping synced resources");
            ExportsPass::Unavailable(message)
        } else {
            if synced_resources_differ(&status.synced_resources, &resolution.resources) {
                log_resource_changes(&key, &status.synced_resources, &resolution.resources);
                status.synced_resources = resolution.resources.clone();
            }

            let missing: Vec<String> = resolution.misconfigured().map(|e| e.export().to_string()).collect();
            self.apply_exports_condition(&key, &mut status, &missing, prior_passes + 1, now);
            if missing.is_empty() {
                ExportsPass::Resolved
            } else {
                ExportsPass::Missing(missing)
            }
        };

        apply_heartbeat(&mut status, heartbeat.as_ref());
        let verdict = syncgrid_health::evaluate(
            status.last_syncer_heartbeat_time,
            now,
            self.settings.heartbeat_threshold,
        );
        syncgrid_health::apply_heartbeat_conditions(
            &mut status,
            &key,
            verdict,
            self.settings.heartbeat_threshold,
            heartbeat.is_some(),
            now,
        );

        let url = virtual_workspace_url(&self.settings.external_url, target);
        let published = status.virtual_workspaces.len() == 1
            && status.virtual_workspaces[0].url.ends_with(&format!("/{}", target.uid));
        if !published {
            info!(sync_target = %key, %url, "publishing virtual workspace");
            status.virtual_workspaces = vec![VirtualWorkspace { url }];
        }

        let status = if status == target.status { None } else { Some(status) };
        Ok(Desired { status, exports })
    }

    /// Set `APIExportsResolved`, escalating once `passes` reaches the
    /// configured number of attempts.
    fn apply_exports_condition(
        &self,
        key: &str,
        status: &mut SyncTargetStatus,
        missing: &[String],
        passes: u32,
        now: DateTime<Utc>,
    ) {
        if missing.is_empty() {
            status.set_condition(Condition::new(
                ConditionType::ApiExportsResolved,
                ConditionStatus::True,
                now,
            ));
            return;
        }

        if passes < self.settings.escalation_attempts {
            debug!(sync_target = %key, passes, exports = ?missing, "exports still unresolved");
            return;
        }

        let message = format!("exports not found: {}", missing.join(", "));
        let escalated = status.set_condition(
            Condition::new(ConditionType::ApiExportsResolved, ConditionStatus::False, now)
                .with_reason("APIExportNotFound", message),
        );
        if escalated {
            warn!(sync_target = %key, exports = ?missing, "unresolved exports escalated to condition");
        }
    }

    /// Record the pass outcome. Runs once per `reconcile_at` call.
    fn finish_pass(
        &self,
        key: &str,
        exports: ExportsPass,
        outcome: ReconcileOutcome,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut passes = self
            .unresolved_passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match exports {
            ExportsPass::Resolved => {
                passes.remove(key);
                Ok(outcome)
            }
            ExportsPass::Missing(_) => {
                *passes.entry(key.to_string()).or_insert(0) += 1;
                Ok(outcome)
            }
            ExportsPass::Unavailable(message) => Err(ReconcileError::CatalogUnavailable {
                sync_target: key.to_string(),
                message,
            }),
        }
    }

    fn unresolved_passes(&self, key: &str) -> u32 {
        self.unresolved_passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn forget(&self, key: &str) {
        self.unresolved_passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Copy the heartbeat receipt time and capacity figures into the status.
fn apply_heartbeat(status: &mut SyncTargetStatus, heartbeat: Option<&SyncerHeartbeat>) {
    let Some(hb) = heartbeat else {
        return;
    };
    let newer = status
        .last_syncer_heartbeat_time
        .is_none_or(|last| hb.received_at > last);
    if newer {
        status.last_syncer_heartbeat_time = Some(hb.received_at);
        status.capacity = hb.capacity.clone();
        status.allocatable = hb.allocatable.clone();
    }
}

/// `<external_url>/services/syncer/<workspace>/<name>/<uid>`
pub fn virtual_workspace_url(external_url: &str, target: &SyncTarget) -> String {
    format!(
        "{}/services/syncer/{}/{}/{}",
        external_url.trim_end_matches('/'),
        target.workspace,
        target.name,
        target.uid
    )
}

/// Compare two resource lists by (group, resource) key. Ordering alone is
/// not a difference.
pub fn synced_resources_differ(current: &[ResourceToSync], desired: &[ResourceToSync]) -> bool {
    if current.len() != desired.len() {
        return true;
    }
    let current: BTreeMap<&GroupResource, &ResourceToSync> =
        current.iter().map(|r| (&r.group_resource, r)).collect();
    desired
        .iter()
        .any(|r| current.get(&r.group_resource) != Some(&r))
}

fn log_resource_changes(key: &str, current: &[ResourceToSync], desired: &[ResourceToSync]) {
    let before: BTreeMap<&GroupResource, &ResourceToSync> =
        current.iter().map(|r| (&r.group_resource, r)).collect();
    for r in desired {
        match before.get(&r.group_resource) {
            None => debug!(sync_target = %key, resource = %r.group_resource, state = %r.state, "resource added"),
            Some(old) if old.state != r.state => {
                info!(sync_target = %key, resource = %r.group_resource, from = %old.state, to = %r.state, "compatibility changed")
            }
            _ => {}
        }
    }
    for r in current {
        if !desired.iter().any(|d| d.group_resource == r.group_resource) {
            debug!(sync_target = %key, resource = %r.group_resource, "resource removed");
        }
    }
}
