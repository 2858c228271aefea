//! Status controller — one background reconcile loop per sync target.
//!
//! A supervisor lists sync targets whenever the store changes (or on the
//! poll tick) and keeps exactly one task per target running. Each task is
//! level-triggered: it reconciles, then waits for the next store change,
//! the poll interval, or its backoff delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use syncgrid_state::StateStore;

use crate::backoff::Backoff;
use crate::reconciler::{ReconcileOutcome, StatusReconciler};

/// Per-target loop state.
struct LoopSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Runs the status reconciler for every registered sync target.
pub struct StatusController {
    store: StateStore,
    reconciler: Arc<StatusReconciler>,
    /// Active loops: sync target key → slot.
    loops: Arc<RwLock<HashMap<String, LoopSlot>>>,
}

impl StatusController {
    pub fn new(store: StateStore, reconciler: StatusReconciler) -> Self {
        Self {
            store,
            reconciler: Arc::new(reconciler),
            loops: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Supervise per-target loops until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let poll_interval = self.reconciler.settings().poll_interval;
        let mut changes = self.store.subscribe();
        info!(poll_ms = poll_interval.as_millis() as u64, "status controller started");

        loop {
            changes.borrow_and_update();
            if let Err(e) = self.sync_loops().await {
                error!(error = %e, "failed to list sync targets");
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

        self.stop_all().await;
        info!("status controller stopped");
    }

    /// Start loops for new targets and stop loops for deleted ones.
    pub async fn sync_loops(&self) -> Result<(), syncgrid_state::StateError> {
        let keys: Vec<String> = self
            .store
            .list_sync_targets()?
            .iter()
            .map(|t| t.table_key())
            .collect();

        let stale: Vec<String> = {
            let loops = self.loops.read().await;
            loops.keys().filter(|k| !keys.contains(k)).cloned().collect()
        };
        for key in stale {
            self.stop_loop(&key).await;
        }

        for key in keys {
            if !self.is_running(&key).await {
                self.start_loop(&key).await;
            }
        }
        Ok(())
    }

    /// Start (or restart) the loop for one sync target.
    pub async fn start_loop(&self, key: &str) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let key_owned = key.to_string();
        let store = self.store.clone();
        let reconciler = self.reconciler.clone();

        let handle = tokio::spawn(async move {
            run_target_loop(&key_owned, store, reconciler, shutdown_rx).await;
        });

        let mut loops = self.loops.write().await;
        if let Some(old) = loops.insert(key.to_string(), LoopSlot { handle, shutdown_tx }) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        debug!(sync_target = %key, "status loop started");
    }

    pub async fn stop_loop(&self, key: &str) {
        let mut loops = self.loops.write().await;
        if let Some(slot) = loops.remove(key) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(sync_target = %key, "status loop stopped");
        }
    }

    /// Stop all loops (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut loops = self.loops.write().await;
        for (key, slot) in loops.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(sync_target = %key, "status loop stopped");
        }
    }

    pub async fn active_loops(&self) -> Vec<String> {
        let loops = self.loops.read().await;
        loops.keys().cloned().collect()
    }

    pub async fn is_running(&self, key: &str) -> bool {
        let loops = self.loops.read().await;
        loops.get(key).is_some_and(|slot| !slot.handle.is_finished())
    }
}

/// The reconcile loop for a single sync target.
async fn run_target_loop(
    key: &str,
    store: StateStore,
    reconciler: Arc<StatusReconciler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let settings = reconciler.settings().clone();
    let mut backoff = Backoff::new(settings.backoff_base, settings.backoff_max);
    let mut changes = store.subscribe();

    loop {
        changes.borrow_and_update();

        let wait: Duration = match reconciler.reconcile(key) {
            Ok(ReconcileOutcome::Missing) => break,
            Ok(_) => {
                backoff.reset();
                settings.poll_interval
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.next_delay();
                debug!(sync_target = %key, error = %e, retry_ms = delay.as_millis() as u64, failures = backoff.failures(), "reconcile failed, backing off");
                delay
            }
            Err(e) => {
                warn!(sync_target = %key, error = %e, "reconcile failed");
                settings.poll_interval
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            res = changes.changed(), if backoff.failures() == 0 => {
                if res.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!(sync_target = %key, "status loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use syncgrid_core::config::ReconcilerSettings;
    use syncgrid_core::GroupResource;
    use syncgrid_state::*;

    fn fast_settings() -> ReconcilerSettings {
        ReconcilerSettings {
            poll_interval: Duration::from_millis(20),
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn seed(store: &StateStore) {
        store
            .put_resource_schema(&ResourceSchema {
                workspace: "ws".to_string(),
                name: "test.services.core".to_string(),
                group: String::new(),
                names: SchemaNames {
                    plural: "services".to_string(),
                    singular: "service".to_string(),
                    kind: "Service".to_string(),
                },
                scope: ResourceScope::Namespaced,
                versions: vec![SchemaVersion {
                    name: "v1".to_string(),
                    served: true,
                    storage: true,
                    status_subresource: true,
                }],
                updated_at: Utc::now() - chrono::Duration::hours(1),
            })
            .unwrap();
        store
            .put_api_export(&ApiExport {
                workspace: "ws".to_string(),
                name: "kubernetes".to_string(),
                identity_hash: String::new(),
                latest_resource_schemas: vec!["test.services.core".to_string()],
            })
            .unwrap();
    }

    async fn wait_for<F: Fn(&StateStore) -> bool>(store: &StateStore, check: F) -> bool {
        for _ in 0..100 {
            if check(store) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn controller_tracks_targets_and_converges() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store);
        let controller = Arc::new(StatusController::new(
            store.clone(),
            StatusReconciler::new(store.clone(), fast_settings()),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run(shutdown_rx).await })
        };

        let target = store.create_sync_target("ws", "east", SyncTargetSpec::default()).unwrap();
        assert!(wait_for(&store, |s| {
            s.get_sync_target("ws/east")
                .unwrap()
                .is_some_and(|t| t.status.synced_resources.len() == 1)
        })
        .await);
        assert!(controller.is_running("ws/east").await);

        store
            .put_heartbeat(&SyncerHeartbeat {
                sync_target: "ws/east".to_string(),
                uid: target.uid.clone(),
                observed_at: Utc::now(),
                received_at: Utc::now(),
                resources: vec![ReportedResource {
                    group_resource: GroupResource::core("services"),
                    versions: vec!["v1".to_string()],
                }],
                capacity: Default::default(),
                allocatable: Default::default(),
            })
            .unwrap();
        assert!(wait_for(&store, |s| {
            s.get_sync_target("ws/east").unwrap().is_some_and(|t| {
                t.status.synced_resources[0].state == CompatibilityState::Accepted
                    && t.status.is_condition_true(ConditionType::HeartbeatHealthy)
            })
        })
        .await);

        store.delete_sync_target("ws/east").unwrap();
        let mut stopped = false;
        for _ in 0..100 {
            if !controller.is_running("ws/east").await {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
        assert!(controller.active_loops().await.is_empty());
    }

    #[tokio::test]
    async fn stop_all_clears_loops() {
        let store = StateStore::open_in_memory().unwrap();
        let controller = StatusController::new(
            store.clone(),
            StatusReconciler::new(store.clone(), fast_settings()),
        );
        store.create_sync_target("ws", "a", SyncTargetSpec::default()).unwrap();
        store.create_sync_target("ws", "b", SyncTargetSpec::default()).unwrap();

        controller.sync_loops().await.unwrap();
        assert_eq!(controller.active_loops().await.len(), 2);

        controller.stop_all().await;
        assert!(controller.active_loops().await.is_empty());
    }
}
