//! Object sync controller — the store-backed side of the state machine.
//!
//! Every mutator re-reads the sync target and the object, decodes the
//! current state, applies one transition or key edit, and writes the
//! object back with compare-and-swap. A conflict restarts from the read,
//! so finalizer lists and deletion markers are never judged on stale data.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use syncgrid_core::keys::{join_finalizers, parse_finalizers, SyncTargetKeys};
use syncgrid_state::{ObjectQuarantine, StateStore, SyncTarget, UpstreamObject};

use crate::error::{SyncError, SyncResult};
use crate::machine::{self, TransitionError};
use crate::patch;
use crate::state::{decode, encode, AnnotationError, SyncState};

/// Result of a level-triggered pass over one (object, sync target) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOutcome {
    Unchanged,
    /// A malformed value was found; the pair is skipped until fixed.
    Quarantined,
    /// A previously quarantined pair is valid again.
    Released,
    /// The sync target is evicting; deletion was requested.
    EvictionRequested,
}

/// Counters from one sweep over all objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub objects: usize,
    pub quarantined: usize,
    pub released: usize,
    pub evicted: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct ObjectSyncController {
    store: StateStore,
    max_conflict_retries: u32,
}

impl ObjectSyncController {
    pub fn new(store: StateStore, max_conflict_retries: u32) -> Self {
        Self {
            store,
            max_conflict_retries,
        }
    }

    /// Current state of an object on a sync target. Read-only: a malformed
    /// value is reported but not quarantined here.
    pub fn state(&self, object_key: &str, target_key: &str) -> SyncResult<SyncState> {
        let target = self.load_target(target_key)?;
        let object = self.load_object(object_key)?;
        decode(&object, &SyncTargetKeys::for_uid(&target.uid)).map_err(|source| SyncError::Quarantined {
            object: object_key.to_string(),
            source,
        })
    }

    // ── Transitions ────────────────────────────────────────────────

    /// Place an object on a sync target (`Unassigned → AssignedPending`).
    pub fn place(&self, object_key: &str, target_key: &str) -> SyncResult<SyncState> {
        let now = Utc::now();
        self.mutate(object_key, target_key, "place", |target, object, keys, current| {
            let gr = object.group_resource();
            let compatibility = target.status.synced_resource(&gr).map(|r| r.state);
            let next = machine::place(
                current,
                &target.table_key(),
                &gr,
                compatibility,
                target.is_schedulable(now),
            )?;
            Ok(apply(object, keys, current, &next))
        })
    }

    /// Hand an assigned object to the syncer (`AssignedPending → Syncing`).
    pub fn start_sync(&self, object_key: &str, target_key: &str) -> SyncResult<SyncState> {
        self.mutate(object_key, target_key, "start_sync", |_, object, keys, current| {
            let next = machine::start_sync(current)?;
            Ok(apply(object, keys, current, &next))
        })
    }

    /// Record an upstream deletion request (`Syncing → Deleting`).
    pub fn request_deletion(&self, object_key: &str, target_key: &str, at: DateTime<Utc>) -> SyncResult<SyncState> {
        self.mutate(object_key, target_key, "request_deletion", |_, object, keys, current| {
            let next = machine::request_deletion(current, at, current_finalizers(object, keys))?;
            Ok(apply(object, keys, current, &next))
        })
    }

    /// Clear the state label once the finalizer list is empty
    /// (`Deleting → Removed`).
    pub fn complete_removal(&self, object_key: &str, target_key: &str) -> SyncResult<SyncState> {
        let state = self.mutate(object_key, target_key, "complete_removal", |_, object, keys, current| {
            let next = machine::complete_removal(current)?;
            Ok(apply(object, keys, current, &next))
        })?;
        info!(object = %object_key, sync_target = %target_key, "object removed from sync target");
        Ok(state)
    }

    // ── Cooperative keys ───────────────────────────────────────────

    pub fn add_finalizer(&self, object_key: &str, target_key: &str, finalizer: &str) -> SyncResult<SyncState> {
        validate_finalizer(finalizer)?;
        self.mutate(object_key, target_key, "add_finalizer", |_, object, keys, _| {
            let mut finalizers = current_finalizers(object, keys);
            if finalizers.iter().any(|f| f == finalizer) {
                return Ok(false);
            }
            finalizers.push(finalizer.to_string());
            object
                .annotations
                .insert(keys.finalizers.clone(), join_finalizers(&finalizers));
            Ok(true)
        })
    }

    pub fn remove_finalizer(&self, object_key: &str, target_key: &str, finalizer: &str) -> SyncResult<SyncState> {
        self.mutate(object_key, target_key, "remove_finalizer", |_, object, keys, _| {
            let mut finalizers = current_finalizers(object, keys);
            let before = finalizers.len();
            finalizers.retain(|f| f != finalizer);
            if finalizers.len() == before {
                return Ok(false);
            }
            if finalizers.is_empty() {
                object.annotations.remove(&keys.finalizers);
            } else {
                object
                    .annotations
                    .insert(keys.finalizers.clone(), join_finalizers(&finalizers));
            }
            Ok(true)
        })
    }

    /// Store the syncer's last observed downstream status.
    pub fn report_downstream_status(
        &self,
        object_key: &str,
        target_key: &str,
        status: &serde_json::Value,
    ) -> SyncResult<SyncState> {
        let encoded = serde_json::to_string(status).map_err(|e| SyncError::Invalid(e.to_string()))?;
        self.mutate(object_key, target_key, "report_downstream_status", |_, object, keys, current| {
            if !current.is_assigned() {
                return Err(TransitionError::Illegal {
                    from: current.name(),
                    transition: "report status for",
                }
                .into());
            }
            Ok(set_annotation(object, &keys.status, Some(&encoded)))
        })
    }

    /// Set (or with `None`, clear) the JSON Patch applied before syncing down.
    pub fn set_spec_diff(&self, object_key: &str, target_key: &str, json_patch: Option<&str>) -> SyncResult<SyncState> {
        let normalized = match json_patch {
            Some(raw) => {
                let ops = patch::parse(raw).map_err(SyncError::Invalid)?;
                Some(serde_json::to_string(&ops).map_err(|e| SyncError::Invalid(e.to_string()))?)
            }
            None => None,
        };
        self.mutate(object_key, target_key, "set_spec_diff", |_, object, keys, _| {
            Ok(set_annotation(object, &keys.spec_diff, normalized.as_deref()))
        })
    }

    // ── Level-triggered reconciliation ─────────────────────────────

    /// Validate one (object, sync target) pair, maintain its quarantine
    /// record, and request deletion if the sync target is evicting.
    pub fn reconcile_object(&self, object_key: &str, target_key: &str, now: DateTime<Utc>) -> SyncResult<ObjectOutcome> {
        let target = self.load_target(target_key)?;
        let object = self.load_object(object_key)?;
        let keys = SyncTargetKeys::for_uid(&target.uid);

        let state = match decode(&object, &keys) {
            Ok(state) => state,
            Err(e) => {
                self.record_quarantine(&object, &target, &e)?;
                return Ok(ObjectOutcome::Quarantined);
            }
        };

        let released = self.store.delete_quarantine(object_key, &target.uid)?;
        if released {
            info!(object = %object_key, sync_target = %target_key, "quarantine lifted");
        }

        if target.is_evicting(now) && matches!(state, SyncState::AssignedPending | SyncState::Syncing) {
            self.request_deletion(object_key, target_key, now)?;
            info!(object = %object_key, sync_target = %target_key, "eviction requested deletion");
            return Ok(ObjectOutcome::EvictionRequested);
        }

        Ok(if released {
            ObjectOutcome::Released
        } else {
            ObjectOutcome::Unchanged
        })
    }

    /// Reconcile every object carrying keys of any sync target. A failure
    /// on one object is counted and logged, never fatal to the sweep.
    pub fn reconcile_all(&self, now: DateTime<Utc>) -> SyncResult<SweepSummary> {
        let targets = self.store.list_sync_targets()?;
        let objects = self.store.list_objects()?;

        let mut summary = SweepSummary::default();
        let mut live = HashSet::new();

        for target in &targets {
            let keys = SyncTargetKeys::for_uid(&target.uid);
            let target_key = target.table_key();

            for object in objects.iter().filter(|o| carries_keys(o, &keys)) {
                let object_key = object.table_key();
                live.insert(syncgrid_state::quarantine_key(&object_key, &target.uid));
                summary.objects += 1;

                match self.reconcile_object(&object_key, &target_key, now) {
                    Ok(ObjectOutcome::Quarantined) => summary.quarantined += 1,
                    Ok(ObjectOutcome::Released) => summary.released += 1,
                    Ok(ObjectOutcome::EvictionRequested) => summary.evicted += 1,
                    Ok(ObjectOutcome::Unchanged) => {}
                    Err(e) if e.is_not_found() => {
                        debug!(object = %object_key, sync_target = %target_key, "vanished during sweep");
                    }
                    Err(e) => {
                        summary.errors += 1;
                        warn!(object = %object_key, sync_target = %target_key, error = %e, "object reconcile failed");
                    }
                }
            }
        }

        // Records whose object or sync target is gone, or whose keys were
        // removed altogether.
        for record in self.store.list_quarantine()? {
            if !live.contains(&record.table_key()) {
                if self.store.delete_quarantine(&record.object_key, &record.sync_target_uid)? {
                    summary.released += 1;
                }
            }
        }

        debug!(
            objects = summary.objects,
            quarantined = summary.quarantined,
            evicted = summary.evicted,
            errors = summary.errors,
            "object sweep complete"
        );
        Ok(summary)
    }

    /// Sweep on every store change and on `poll_interval` until shutdown.
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut changes = self.store.subscribe();
        info!(poll_ms = poll_interval.as_millis() as u64, "object sync controller started");

        loop {
            changes.borrow_and_update();
            if let Err(e) = self.reconcile_all(Utc::now()) {
                error!(error = %e, "object sweep failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                res = changes.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("object sync controller stopped");
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Read-modify-CAS-write loop. `edit` returns whether it changed the
    /// object; the resulting state is decoded from what was written.
    fn mutate<F>(&self, object_key: &str, target_key: &str, op: &'static str, mut edit: F) -> SyncResult<SyncState>
    where
        F: FnMut(&SyncTarget, &mut UpstreamObject, &SyncTargetKeys, &SyncState) -> SyncResult<bool>,
    {
        let attempts = self.max_conflict_retries + 1;

        for attempt in 1..=attempts {
            let target = self.load_target(target_key)?;
            let mut object = self.load_object(object_key)?;
            let keys = SyncTargetKeys::for_uid(&target.uid);

            let current = match decode(&object, &keys) {
                Ok(state) => state,
                Err(e) => {
                    self.record_quarantine(&object, &target, &e)?;
                    return Err(SyncError::Quarantined {
                        object: object_key.to_string(),
                        source: e,
                    });
                }
            };

            let changed = match edit(&target, &mut object, &keys, &current) {
                Ok(changed) => changed,
                Err(SyncError::Transition(e)) if e.is_protocol_violation() => {
                    error!(
                        invariant = "sync-state-protocol",
                        object = %object_key,
                        sync_target = %target_key,
                        op,
                        state = %current,
                        error = %e,
                        "rejected illegal transition"
                    );
                    return Err(e.into());
                }
                Err(e) => return Err(e),
            };
            if !changed {
                return Ok(current);
            }

            match self.store.update_object(&object) {
                Ok(updated) => {
                    let next = decode(&updated, &keys).map_err(|e| SyncError::Quarantined {
                        object: object_key.to_string(),
                        source: e,
                    })?;
                    debug!(object = %object_key, sync_target = %target_key, op, from = %current, to = %next, "object updated");
                    return Ok(next);
                }
                Err(e) if e.is_conflict() => {
                    debug!(object = %object_key, attempt, op, "object write conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::ConflictRetriesExhausted(object_key.to_string()))
    }

    fn load_target(&self, key: &str) -> SyncResult<SyncTarget> {
        self.store
            .get_sync_target(key)?
            .ok_or_else(|| SyncError::SyncTargetNotFound(key.to_string()))
    }

    fn load_object(&self, key: &str) -> SyncResult<UpstreamObject> {
        self.store
            .get_object(key)?
            .ok_or_else(|| SyncError::ObjectNotFound(key.to_string()))
    }

    /// Write a quarantine record unless an identical one exists.
    fn record_quarantine(&self, object: &UpstreamObject, target: &SyncTarget, err: &AnnotationError) -> SyncResult<()> {
        let object_key = object.table_key();
        let message = err.to_string();
        if let Some(existing) = self.store.get_quarantine(&object_key, &target.uid)? {
            if existing.resource_version == object.resource_version && existing.message == message {
                return Ok(());
            }
        }

        warn!(object = %object_key, sync_target = %target.table_key(), reason = err.reason(), error = %err, "quarantining object");
        self.store.put_quarantine(&ObjectQuarantine {
            object_key,
            sync_target_uid: target.uid.clone(),
            reason: err.reason().to_string(),
            message,
            resource_version: object.resource_version,
            recorded_at: Utc::now(),
        })?;
        Ok(())
    }
}

/// Encode `next` if it differs from `current`.
fn apply(object: &mut UpstreamObject, keys: &SyncTargetKeys, current: &SyncState, next: &SyncState) -> bool {
    if next == current {
        return false;
    }
    encode(object, keys, next);
    true
}

fn current_finalizers(object: &UpstreamObject, keys: &SyncTargetKeys) -> Vec<String> {
    object
        .annotations
        .get(&keys.finalizers)
        .map(|raw| parse_finalizers(raw))
        .unwrap_or_default()
}

/// Set or remove an annotation. Returns true if the value changed.
fn set_annotation(object: &mut UpstreamObject, key: &str, value: Option<&str>) -> bool {
    match value {
        Some(v) if object.annotations.get(key).map(String::as_str) == Some(v) => false,
        Some(v) => {
            object.annotations.insert(key.to_string(), v.to_string());
            true
        }
        None => object.annotations.remove(key).is_some(),
    }
}

fn validate_finalizer(finalizer: &str) -> SyncResult<()> {
    if finalizer.is_empty() || finalizer.contains(',') || finalizer.chars().any(char::is_whitespace) {
        return Err(SyncError::Invalid(format!(
            "finalizer {finalizer:?} must be non-empty without commas or whitespace"
        )));
    }
    Ok(())
}

fn carries_keys(object: &UpstreamObject, keys: &SyncTargetKeys) -> bool {
    object.labels.contains_key(&keys.state_label)
        || keys
            .annotations()
            .iter()
            .any(|k| object.annotations.contains_key(*k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use syncgrid_core::keys::STATE_SYNC;
    use syncgrid_core::GroupResource;
    use syncgrid_state::*;

    const TARGET: &str = "root:compute/east";

    fn resource(group: &str, name: &str, state: CompatibilityState) -> ResourceToSync {
        ResourceToSync {
            group_resource: GroupResource::new(group, name),
            versions: vec!["v1".to_string()],
            identity_hash: String::new(),
            state,
        }
    }

    /// A target accepting services but not cowboys, and one services object.
    fn setup() -> (StateStore, ObjectSyncController, SyncTarget, String) {
        let store = StateStore::open_in_memory().unwrap();
        let mut target = store
            .create_sync_target("root:compute", "east", SyncTargetSpec::default())
            .unwrap();
        target.status.synced_resources = vec![
            resource("wildwest.dev", "cowboys", CompatibilityState::Incompatible),
            resource("", "services", CompatibilityState::Accepted),
        ];
        let target = store.update_sync_target(&target).unwrap();

        let object = store
            .create_object(&UpstreamObject::new("root:app", &GroupResource::core("services"), "default", "web"))
            .unwrap();
        let controller = ObjectSyncController::new(store.clone(), 5);
        (store, controller, target, object.table_key())
    }

    fn object(store: &StateStore, key: &str) -> UpstreamObject {
        store.get_object(key).unwrap().unwrap()
    }

    fn syncing(controller: &ObjectSyncController, key: &str) {
        controller.place(key, TARGET).unwrap();
        controller.start_sync(key, TARGET).unwrap();
    }

    /// Edit the stored object behind the controller's back.
    fn concurrent_label(store: &StateStore, key: &str, value: &str) {
        let mut current = object(store, key);
        current.labels.insert("team".to_string(), value.to_string());
        store.update_object(&current).unwrap();
    }

    #[test]
    fn conflicting_write_reapplies_edit_on_fresh_read() {
        let (store, controller, _, key) = setup();
        let mut calls = 0;

        let state = controller
            .mutate(&key, TARGET, "annotate", |_, object, _, _| {
                calls += 1;
                if calls == 1 {
                    concurrent_label(&store, &key, "blue");
                }
                object.annotations.insert("example.com/note".to_string(), "seen".to_string());
                Ok(true)
            })
            .unwrap();

        assert_eq!(state, SyncState::Unassigned);
        assert_eq!(calls, 2);
        let current = object(&store, &key);
        assert_eq!(current.labels["team"], "blue");
        assert_eq!(current.annotations["example.com/note"], "seen");
    }

    #[test]
    fn endless_conflicts_exhaust_retries() {
        let (store, _, _, key) = setup();
        let controller = ObjectSyncController::new(store.clone(), 2);
        let mut calls = 0;

        let err = controller
            .mutate(&key, TARGET, "annotate", |_, object, _, _| {
                calls += 1;
                concurrent_label(&store, &key, &calls.to_string());
                object.annotations.insert("example.com/note".to_string(), "seen".to_string());
                Ok(true)
            })
            .unwrap_err();

        assert!(matches!(err, SyncError::ConflictRetriesExhausted(ref k) if k == &key));
        assert_eq!(calls, 3);
        let current = object(&store, &key);
        assert_eq!(current.labels["team"], "3");
        assert!(!current.annotations.contains_key("example.com/note"));
    }

    #[test]
    fn finalizer_holds_object_in_deleting() {
        let (store, controller, target, key) = setup();
        let keys = SyncTargetKeys::for_uid(&target.uid);

        assert_eq!(controller.place(&key, TARGET).unwrap(), SyncState::AssignedPending);
        assert_eq!(object(&store, &key).labels[&keys.state_label], "");

        assert_eq!(controller.start_sync(&key, TARGET).unwrap(), SyncState::Syncing);
        assert_eq!(object(&store, &key).labels[&keys.state_label], STATE_SYNC);

        controller.add_finalizer(&key, TARGET, "example.com/cleanup").unwrap();
        let deleted_at = Utc::now();
        let state = controller.request_deletion(&key, TARGET, deleted_at).unwrap();
        assert!(matches!(
            &state,
            SyncState::Deleting { finalizers, .. } if finalizers == &vec!["example.com/cleanup".to_string()]
        ));

        // Blocked: nothing changes.
        let rv = object(&store, &key).resource_version;
        let err = controller.complete_removal(&key, TARGET).unwrap_err();
        assert!(matches!(err, SyncError::Transition(TransitionError::FinalizersPending(_))));
        let blocked = object(&store, &key);
        assert_eq!(blocked.resource_version, rv);
        assert_eq!(blocked.labels[&keys.state_label], STATE_SYNC);
        assert!(blocked.annotations.contains_key(&keys.deletion));

        let state = controller.remove_finalizer(&key, TARGET, "example.com/cleanup").unwrap();
        assert!(matches!(&state, SyncState::Deleting { finalizers, .. } if finalizers.is_empty()));

        assert_eq!(controller.complete_removal(&key, TARGET).unwrap(), SyncState::Unassigned);
        let removed = object(&store, &key);
        assert!(!removed.labels.contains_key(&keys.state_label));
        assert!(keys.annotations().iter().all(|k| !removed.annotations.contains_key(*k)));
    }

    #[test]
    fn late_finalizer_blocks_removal_again() {
        let (_, controller, _, key) = setup();
        syncing(&controller, &key);
        controller.request_deletion(&key, TARGET, Utc::now()).unwrap();

        // Another controller adds back-pressure after deletion was requested.
        controller.add_finalizer(&key, TARGET, "other.io/hold").unwrap();
        assert!(controller.complete_removal(&key, TARGET).is_err());
        controller.remove_finalizer(&key, TARGET, "other.io/hold").unwrap();
        assert!(controller.complete_removal(&key, TARGET).is_ok());
    }

    #[test]
    fn removal_without_deletion_request_is_rejected() {
        let (store, controller, target, key) = setup();
        syncing(&controller, &key);
        let err = controller.complete_removal(&key, TARGET).unwrap_err();
        assert!(matches!(err, SyncError::Transition(TransitionError::Illegal { .. })));
        let keys = SyncTargetKeys::for_uid(&target.uid);
        assert_eq!(object(&store, &key).labels[&keys.state_label], STATE_SYNC);
    }

    #[test]
    fn placement_rejected_for_incompatible_or_unknown_resources() {
        let (store, controller, _, _) = setup();
        let cowboy = store
            .create_object(&UpstreamObject::new("root:app", &GroupResource::new("wildwest.dev", "cowboys"), "default", "joe"))
            .unwrap();
        let err = controller.place(&cowboy.table_key(), TARGET).unwrap_err();
        assert!(matches!(err, SyncError::Transition(TransitionError::NotAccepted { .. })));

        let secret = store
            .create_object(&UpstreamObject::new("root:app", &GroupResource::core("secrets"), "default", "s"))
            .unwrap();
        assert!(controller.place(&secret.table_key(), TARGET).is_err());
        assert!(object(&store, &secret.table_key()).labels.is_empty());
    }

    #[test]
    fn placement_rejected_on_unschedulable_or_evicting_target() {
        let (store, controller, _, key) = setup();
        let mut target = store.get_sync_target(TARGET).unwrap().unwrap();
        target.spec.unschedulable = true;
        let mut target = store.update_sync_target(&target).unwrap();
        assert!(matches!(
            controller.place(&key, TARGET).unwrap_err(),
            SyncError::Transition(TransitionError::Unschedulable(_))
        ));

        target.spec.unschedulable = false;
        target.spec.evict_after = Some(Utc::now() - ChronoDuration::minutes(1));
        store.update_sync_target(&target).unwrap();
        assert!(controller.place(&key, TARGET).is_err());
    }

    #[test]
    fn eviction_requests_deletion() {
        let (store, controller, _, key) = setup();
        syncing(&controller, &key);

        let mut target = store.get_sync_target(TARGET).unwrap().unwrap();
        let evict_at = Utc::now() + ChronoDuration::minutes(5);
        target.spec.evict_after = Some(evict_at);
        store.update_sync_target(&target).unwrap();

        assert_eq!(controller.reconcile_object(&key, TARGET, Utc::now()).unwrap(), ObjectOutcome::Unchanged);
        let later = evict_at + ChronoDuration::seconds(1);
        assert_eq!(
            controller.reconcile_object(&key, TARGET, later).unwrap(),
            ObjectOutcome::EvictionRequested
        );
        // Already deleting.
        assert_eq!(controller.reconcile_object(&key, TARGET, later).unwrap(), ObjectOutcome::Unchanged);
    }

    #[test]
    fn malformed_annotation_quarantines_only_that_object() {
        let (store, controller, target, key) = setup();
        let keys = SyncTargetKeys::for_uid(&target.uid);
        syncing(&controller, &key);

        let healthy = store
            .create_object(&UpstreamObject::new("root:app", &GroupResource::core("services"), "default", "api"))
            .unwrap();
        syncing(&controller, &healthy.table_key());

        let mut broken = object(&store, &key);
        broken.annotations.insert(keys.deletion.clone(), "not-a-time".to_string());
        store.update_object(&broken).unwrap();

        let summary = controller.reconcile_all(Utc::now()).unwrap();
        assert_eq!(summary.objects, 2);
        assert_eq!(summary.quarantined, 1);
        assert_eq!(summary.errors, 0);

        let record = store.get_quarantine(&key, &target.uid).unwrap().unwrap();
        assert_eq!(record.reason, "MalformedDeletionTimestamp");
        assert!(matches!(
            controller.start_sync(&key, TARGET).unwrap_err(),
            SyncError::Quarantined { .. }
        ));
        // The other object is unaffected.
        assert!(controller.request_deletion(&healthy.table_key(), TARGET, Utc::now()).is_ok());

        // A second sweep does not rewrite the record.
        let rev = store.revision();
        controller.reconcile_all(Utc::now()).unwrap();
        assert_eq!(store.revision(), rev);

        let mut fixed = object(&store, &key);
        fixed.annotations.insert(keys.deletion.clone(), "2024-05-01T10:00:00Z".to_string());
        store.update_object(&fixed).unwrap();
        assert_eq!(controller.reconcile_object(&key, TARGET, Utc::now()).unwrap(), ObjectOutcome::Released);
        assert!(store.get_quarantine(&key, &target.uid).unwrap().is_none());
    }

    #[test]
    fn downstream_status_requires_assignment() {
        let (store, controller, target, key) = setup();
        let keys = SyncTargetKeys::for_uid(&target.uid);
        let status = serde_json::json!({"readyReplicas": 2});

        assert!(controller.report_downstream_status(&key, TARGET, &status).is_err());

        syncing(&controller, &key);
        controller.report_downstream_status(&key, TARGET, &status).unwrap();
        let stored = object(&store, &key);
        let parsed: serde_json::Value = serde_json::from_str(&stored.annotations[&keys.status]).unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn spec_diff_is_validated_and_clearable() {
        let (store, controller, target, key) = setup();
        let keys = SyncTargetKeys::for_uid(&target.uid);

        assert!(matches!(
            controller.set_spec_diff(&key, TARGET, Some(r#"{"op":"add"}"#)).unwrap_err(),
            SyncError::Invalid(_)
        ));

        controller
            .set_spec_diff(&key, TARGET, Some(r#"[{"op":"replace","path":"/spec/replicas","value":1}]"#))
            .unwrap();
        assert!(object(&store, &key).annotations.contains_key(&keys.spec_diff));

        controller.set_spec_diff(&key, TARGET, None).unwrap();
        assert!(!object(&store, &key).annotations.contains_key(&keys.spec_diff));
    }

    #[test]
    fn finalizer_names_are_validated_and_deduplicated() {
        let (store, controller, target, key) = setup();
        let keys = SyncTargetKeys::for_uid(&target.uid);
        assert!(controller.add_finalizer(&key, TARGET, "a,b").is_err());
        assert!(controller.add_finalizer(&key, TARGET, "").is_err());

        controller.add_finalizer(&key, TARGET, "a.io/x").unwrap();
        let rv = object(&store, &key).resource_version;
        controller.add_finalizer(&key, TARGET, "a.io/x").unwrap();
        assert_eq!(object(&store, &key).resource_version, rv);
        assert_eq!(object(&store, &key).annotations[&keys.finalizers], "a.io/x");
    }

    #[test]
    fn targets_do_not_share_state() {
        let (store, controller, _, key) = setup();
        let mut west = store
            .create_sync_target("root:compute", "west", SyncTargetSpec::default())
            .unwrap();
        west.status.synced_resources = vec![resource("", "services", CompatibilityState::Accepted)];
        store.update_sync_target(&west).unwrap();

        syncing(&controller, &key);
        controller.place(&key, "root:compute/west").unwrap();
        controller.request_deletion(&key, TARGET, Utc::now()).unwrap();

        let obj = object(&store, &key);
        let west_keys = SyncTargetKeys::for_uid(&west.uid);
        assert_eq!(obj.labels[&west_keys.state_label], "");
        assert!(!obj.annotations.contains_key(&west_keys.deletion));
    }

    #[test]
    fn missing_object_or_target() {
        let (_, controller, _, key) = setup();
        assert!(controller.place("nope", TARGET).unwrap_err().is_not_found());
        assert!(controller.place(&key, "root:compute/nope").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn run_loop_applies_eviction() {
        let (store, controller, _, key) = setup();
        syncing(&controller, &key);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run(Duration::from_millis(20), shutdown_rx).await })
        };

        let mut target = store.get_sync_target(TARGET).unwrap().unwrap();
        target.spec.evict_after = Some(Utc::now() - ChronoDuration::seconds(1));
        store.update_sync_target(&target).unwrap();

        let mut deleting = false;
        for _ in 0..100 {
            let keys = SyncTargetKeys::for_uid(&target.uid);
            if object(&store, &key).annotations.contains_key(&keys.deletion) {
                deleting = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(deleting);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }
}
