//! StateStore — redb-backed state persistence for SyncGrid.
//!
//! Provides typed operations over sync targets, API exports, resource
//! schemas, syncer heartbeats, upstream objects, and quarantine records.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).
//!
//! Sync targets and upstream objects are versioned: `create_*` assigns
//! resource version 1 and `update_*` only commits when the caller's
//! version matches the stored one, bumping it by one.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Records whose writes are compare-and-swap on a resource version.
trait Versioned: Serialize + DeserializeOwned + Clone {
    fn key(&self) -> String;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

impl Versioned for SyncTarget {
    fn key(&self) -> String {
        self.table_key()
    }
    fn version(&self) -> u64 {
        self.resource_version
    }
    fn set_version(&mut self, version: u64) {
        self.resource_version = version;
    }
}

impl Versioned for UpstreamObject {
    fn key(&self) -> String {
        self.table_key()
    }
    fn version(&self) -> u64 {
        self.resource_version
    }
    fn set_version(&mut self, version: u64) {
        self.resource_version = version;
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Revision counter bumped after every committed write.
    changes: Arc<watch::Sender<u64>>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            db: Arc::new(db),
            changes: Arc::new(changes),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [SYNC_TARGETS, API_EXPORTS, RESOURCE_SCHEMAS, HEARTBEATS, OBJECTS, QUARANTINE] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Change notification ────────────────────────────────────────

    /// Subscribe to committed writes. The value is a monotonically
    /// increasing revision; only "something changed" is meaningful.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    fn notify(&self) {
        self.changes.send_modify(|rev| *rev += 1);
    }

    // ── Generic JSON helpers ───────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.notify();
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// List values whose key starts with `prefix` (all values for "").
    fn list_json<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn remove_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if existed {
            self.notify();
        }
        Ok(existed)
    }

    /// Insert a versioned record that must not exist yet. Returns it at
    /// resource version 1.
    fn create_versioned<T: Versioned>(&self, def: JsonTable, record: &T) -> StateResult<T> {
        let key = record.key();
        let mut created = record.clone();
        created.set_version(1);
        let bytes = serde_json::to_vec(&created).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.notify();
        Ok(created)
    }

    /// Compare-and-swap write. Commits only if the stored resource version
    /// equals `record`'s, and returns the record at the bumped version.
    fn update_versioned<T: Versioned>(&self, def: JsonTable, record: &T) -> StateResult<T> {
        let key = record.key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current: T = {
                let guard = table
                    .get(key.as_str())
                    .map_err(map_err!(Read))?
                    .ok_or_else(|| StateError::NotFound(key.clone()))?;
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            };
            if current.version() != record.version() {
                return Err(StateError::Conflict {
                    key,
                    expected: record.version(),
                    actual: current.version(),
                });
            }

            let mut next = record.clone();
            next.set_version(current.version() + 1);
            let bytes = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
            updated = next;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.notify();
        Ok(updated)
    }

    // ── Sync targets ───────────────────────────────────────────────

    /// Register a new sync target. Assigns a fresh UID.
    pub fn create_sync_target(
        &self,
        workspace: &str,
        name: &str,
        spec: SyncTargetSpec,
    ) -> StateResult<SyncTarget> {
        let target = SyncTarget {
            workspace: workspace.to_string(),
            name: name.to_string(),
            uid: uuid::Uuid::new_v4().to_string(),
            resource_version: 0,
            spec,
            status: SyncTargetStatus::default(),
            created_at: Utc::now(),
        };
        let created = self.create_versioned(SYNC_TARGETS, &target)?;
        debug!(key = %created.table_key(), uid = %created.uid, "sync target registered");
        Ok(created)
    }

    /// Get a sync target by `{workspace}/{name}` key.
    pub fn get_sync_target(&self, key: &str) -> StateResult<Option<SyncTarget>> {
        self.get_json(SYNC_TARGETS, key)
    }

    /// List all sync targets.
    pub fn list_sync_targets(&self) -> StateResult<Vec<SyncTarget>> {
        self.list_json(SYNC_TARGETS, "")
    }

    /// List sync targets of one workspace.
    pub fn list_sync_targets_in(&self, workspace: &str) -> StateResult<Vec<SyncTarget>> {
        self.list_json(SYNC_TARGETS, &format!("{workspace}/"))
    }

    /// Compare-and-swap update of a sync target (spec or status).
    pub fn update_sync_target(&self, target: &SyncTarget) -> StateResult<SyncTarget> {
        let updated = self.update_versioned(SYNC_TARGETS, target)?;
        debug!(key = %updated.table_key(), rv = updated.resource_version, "sync target updated");
        Ok(updated)
    }

    /// Delete a sync target and its heartbeat. Returns true if it existed.
    pub fn delete_sync_target(&self, key: &str) -> StateResult<bool> {
        let existed = self.remove_key(SYNC_TARGETS, key)?;
        self.remove_key(HEARTBEATS, key)?;
        debug!(%key, existed, "sync target deleted");
        Ok(existed)
    }

    // ── Schema catalog ─────────────────────────────────────────────

    /// Insert or update an API export.
    pub fn put_api_export(&self, export: &ApiExport) -> StateResult<()> {
        self.put_json(API_EXPORTS, &export.table_key(), export)
    }

    pub fn get_api_export(&self, workspace: &str, name: &str) -> StateResult<Option<ApiExport>> {
        self.get_json(API_EXPORTS, &format!("{workspace}/{name}"))
    }

    pub fn list_api_exports(&self) -> StateResult<Vec<ApiExport>> {
        self.list_json(API_EXPORTS, "")
    }

    /// Insert or update a resource schema after validating it.
    pub fn put_resource_schema(&self, schema: &ResourceSchema) -> StateResult<()> {
        schema.validate().map_err(StateError::Invalid)?;
        self.put_json(RESOURCE_SCHEMAS, &schema.table_key(), schema)
    }

    pub fn get_resource_schema(&self, workspace: &str, name: &str) -> StateResult<Option<ResourceSchema>> {
        self.get_json(RESOURCE_SCHEMAS, &format!("{workspace}/{name}"))
    }

    // ── Heartbeats ─────────────────────────────────────────────────

    /// Record the latest heartbeat of a syncer, replacing the previous one.
    pub fn put_heartbeat(&self, heartbeat: &SyncerHeartbeat) -> StateResult<()> {
        self.put_json(HEARTBEATS, &heartbeat.sync_target, heartbeat)
    }

    pub fn get_heartbeat(&self, sync_target_key: &str) -> StateResult<Option<SyncerHeartbeat>> {
        self.get_json(HEARTBEATS, sync_target_key)
    }

    // ── Upstream objects ───────────────────────────────────────────

    /// Insert a new upstream object at resource version 1.
    pub fn create_object(&self, object: &UpstreamObject) -> StateResult<UpstreamObject> {
        self.create_versioned(OBJECTS, object)
    }

    pub fn get_object(&self, key: &str) -> StateResult<Option<UpstreamObject>> {
        self.get_json(OBJECTS, key)
    }

    pub fn list_objects(&self) -> StateResult<Vec<UpstreamObject>> {
        self.list_json(OBJECTS, "")
    }

    /// List objects of one workspace.
    pub fn list_objects_in(&self, workspace: &str) -> StateResult<Vec<UpstreamObject>> {
        self.list_json(OBJECTS, &format!("{workspace}|"))
    }

    /// Compare-and-swap update of an object's labels and annotations.
    pub fn update_object(&self, object: &UpstreamObject) -> StateResult<UpstreamObject> {
        self.update_versioned(OBJECTS, object)
    }

    pub fn delete_object(&self, key: &str) -> StateResult<bool> {
        self.remove_key(OBJECTS, key)
    }

    // ── Quarantine ─────────────────────────────────────────────────

    pub fn put_quarantine(&self, record: &ObjectQuarantine) -> StateResult<()> {
        self.put_json(QUARANTINE, &record.table_key(), record)
    }

    pub fn get_quarantine(&self, object_key: &str, sync_target_uid: &str) -> StateResult<Option<ObjectQuarantine>> {
        self.get_json(QUARANTINE, &quarantine_key(object_key, sync_target_uid))
    }

    pub fn list_quarantine(&self) -> StateResult<Vec<ObjectQuarantine>> {
        self.list_json(QUARANTINE, "")
    }

    pub fn delete_quarantine(&self, object_key: &str, sync_target_uid: &str) -> StateResult<bool> {
        self.remove_key(QUARANTINE, &quarantine_key(object_key, sync_target_uid))
    }
}
