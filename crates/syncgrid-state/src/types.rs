//! Domain types for the SyncGrid state store.
//!
//! These types represent the persisted state of sync targets, the schema
//! catalog, syncer heartbeats, and upstream objects. All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use syncgrid_core::{ExportReference, GroupResource, DEFAULT_EXPORT_NAME};

// ── Sync target ───────────────────────────────────────────────────

/// A downstream execution cluster registered with the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncTarget {
    pub workspace: String,
    pub name: String,
    /// Assigned on registration, never reused.
    pub uid: String,
    /// Bumped on every committed write; used for compare-and-swap.
    pub resource_version: u64,
    pub spec: SyncTargetSpec,
    #[serde(default)]
    pub status: SyncTargetStatus,
    pub created_at: DateTime<Utc>,
}

/// Desired state of a sync target, owned by its administrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncTargetSpec {
    /// No new workloads are placed while set.
    #[serde(default)]
    pub unschedulable: bool,
    /// After this instant, workloads are evicted and no new ones placed.
    #[serde(default)]
    pub evict_after: Option<DateTime<Utc>>,
    /// Exports whose schemas this target is evaluated against, in
    /// precedence order.
    #[serde(default)]
    pub supported_api_exports: Vec<ExportReference>,
    /// Free-form grouping labels.
    #[serde(default)]
    pub cells: BTreeMap<String, String>,
}

/// Observed state of a sync target. Only the control plane writes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncTargetStatus {
    #[serde(default)]
    pub capacity: BTreeMap<String, String>,
    #[serde(default)]
    pub allocatable: BTreeMap<String, String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub last_syncer_heartbeat_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub synced_resources: Vec<ResourceToSync>,
    #[serde(default)]
    pub virtual_workspaces: Vec<VirtualWorkspace>,
}

/// One (group, resource) the sync target is evaluated against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceToSync {
    #[serde(flatten)]
    pub group_resource: GroupResource,
    /// Versions ordered by precedence. Never empty.
    pub versions: Vec<String>,
    /// Identity of the owning export; empty for core types.
    #[serde(default)]
    pub identity_hash: String,
    #[serde(default)]
    pub state: CompatibilityState,
}

/// Whether a resource schema can be synced by a sync target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompatibilityState {
    /// The syncer has not evaluated this schema yet.
    #[default]
    Pending,
    Accepted,
    Incompatible,
}

impl fmt::Display for CompatibilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompatibilityState::Pending => "Pending",
            CompatibilityState::Accepted => "Accepted",
            CompatibilityState::Incompatible => "Incompatible",
        };
        f.write_str(s)
    }
}

/// Published syncer virtual workspace URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualWorkspace {
    pub url: String,
}

// ── Conditions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    SyncerReady,
    #[serde(rename = "APIImporterReady")]
    ApiImporterReady,
    HeartbeatHealthy,
    #[serde(rename = "APIExportsResolved")]
    ApiExportsResolved,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionType::SyncerReady => "SyncerReady",
            ConditionType::ApiImporterReady => "APIImporterReady",
            ConditionType::HeartbeatHealthy => "HeartbeatHealthy",
            ConditionType::ApiExportsResolved => "APIExportsResolved",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(condition_type: ConditionType, status: ConditionStatus, now: DateTime<Utc>) -> Self {
        Self {
            condition_type,
            status,
            reason: None,
            message: None,
            last_transition_time: now,
        }
    }

    pub fn with_reason(mut self, reason: &str, message: impl Into<String>) -> Self {
        self.reason = Some(reason.to_string());
        self.message = Some(message.into());
        self
    }
}

impl SyncTargetStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn is_condition_true(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Insert or update a condition. Returns true if anything changed.
    ///
    /// `last_transition_time` only moves when the status flips.
    pub fn set_condition(&mut self, condition: Condition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) if existing.status == condition.status => {
                if existing.reason == condition.reason && existing.message == condition.message {
                    return false;
                }
                existing.reason = condition.reason;
                existing.message = condition.message;
                true
            }
            Some(existing) => {
                *existing = condition;
                true
            }
            None => {
                self.conditions.push(condition);
                self.conditions.sort_by_key(|c| c.condition_type);
                true
            }
        }
    }

    /// Drop a condition. Returns true if it was present.
    pub fn remove_condition(&mut self, condition_type: ConditionType) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.condition_type != condition_type);
        before != self.conditions.len()
    }

    pub fn synced_resource(&self, gr: &GroupResource) -> Option<&ResourceToSync> {
        self.synced_resources.iter().find(|r| &r.group_resource == gr)
    }
}

impl SyncTarget {
    /// Build the composite key for the sync targets table.
    pub fn table_key(&self) -> String {
        sync_target_key(&self.workspace, &self.name)
    }

    /// Export references with empty workspaces resolved, falling back to
    /// the local `kubernetes` export when none are configured.
    pub fn effective_exports(&self) -> Vec<ExportReference> {
        if self.spec.supported_api_exports.is_empty() {
            return vec![ExportReference::new(&self.workspace, DEFAULT_EXPORT_NAME)];
        }
        self.spec
            .supported_api_exports
            .iter()
            .map(|r| r.resolve_in(&self.workspace))
            .collect()
    }

    /// Whether eviction has started at `now`.
    pub fn is_evicting(&self, now: DateTime<Utc>) -> bool {
        self.spec.evict_after.is_some_and(|t| now >= t)
    }

    /// Whether new workloads may be placed at `now`.
    pub fn is_schedulable(&self, now: DateTime<Utc>) -> bool {
        !self.spec.unschedulable && !self.is_evicting(now)
    }
}

/// Build a sync target key from workspace and name.
pub fn sync_target_key(workspace: &str, name: &str) -> String {
    format!("{workspace}/{name}")
}

// ── Schema catalog ────────────────────────────────────────────────

/// A named bundle of resource schemas offered by a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiExport {
    pub workspace: String,
    pub name: String,
    /// Stable identity of the export, shared by its resource types.
    pub identity_hash: String,
    /// Schema names, in the export's declared order.
    pub latest_resource_schemas: Vec<String>,
}

impl ApiExport {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.workspace, self.name)
    }

    pub fn reference(&self) -> ExportReference {
        ExportReference::new(&self.workspace, &self.name)
    }
}

/// Versioned shape definition for one kind of resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSchema {
    pub workspace: String,
    /// `<prefix>.<plural>.<group>`, with `core` for the core group.
    pub name: String,
    #[serde(default)]
    pub group: String,
    pub names: SchemaNames,
    pub scope: ResourceScope,
    /// Versions ordered by precedence.
    pub versions: Vec<SchemaVersion>,
    /// Last time the schema content changed.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaNames {
    pub plural: String,
    pub singular: String,
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceScope {
    Namespaced,
    Cluster,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaVersion {
    pub name: String,
    #[serde(default = "default_true")]
    pub served: bool,
    #[serde(default)]
    pub storage: bool,
    #[serde(default)]
    pub status_subresource: bool,
}

fn default_true() -> bool {
    true
}

impl ResourceSchema {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.workspace, self.name)
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(&self.group, &self.names.plural)
    }

    /// Names of served versions, in precedence order.
    pub fn served_versions(&self) -> Vec<String> {
        self.versions
            .iter()
            .filter(|v| v.served)
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn version(&self, name: &str) -> Option<&SchemaVersion> {
        self.versions.iter().find(|v| v.name == name)
    }

    /// Check that the name agrees with group and plural, and that at least
    /// one version is served.
    pub fn validate(&self) -> Result<(), String> {
        let parsed = GroupResource::from_schema_name(&self.name)
            .ok_or_else(|| format!("schema name {:?} is not <prefix>.<resource>.<group>", self.name))?;
        if parsed != self.group_resource() {
            return Err(format!(
                "schema name {:?} does not match {}",
                self.name,
                self.group_resource()
            ));
        }
        if self.served_versions().is_empty() {
            return Err(format!("schema {:?} serves no versions", self.name));
        }
        Ok(())
    }
}

// ── Syncer heartbeat ──────────────────────────────────────────────

/// Heartbeat and capability snapshot pushed by a syncer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncerHeartbeat {
    /// Key of the sync target (`{workspace}/{name}`).
    pub sync_target: String,
    /// UID of the sync target the syncer was configured for.
    pub uid: String,
    /// When the syncer observed the downstream API surface (syncer clock).
    /// Only used to tell whether the report predates a schema change.
    pub observed_at: DateTime<Utc>,
    /// When the control plane accepted the heartbeat. Drives liveness.
    pub received_at: DateTime<Utc>,
    /// Full downstream API surface the syncer understands.
    #[serde(default)]
    pub resources: Vec<ReportedResource>,
    #[serde(default)]
    pub capacity: BTreeMap<String, String>,
    #[serde(default)]
    pub allocatable: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportedResource {
    #[serde(flatten)]
    pub group_resource: GroupResource,
    pub versions: Vec<String>,
}

impl SyncerHeartbeat {
    /// Versions the syncer understands for a resource, if reported at all.
    pub fn versions_for(&self, gr: &GroupResource) -> Option<&[String]> {
        self.resources
            .iter()
            .find(|r| &r.group_resource == gr)
            .map(|r| r.versions.as_slice())
    }
}

// ── Upstream objects ──────────────────────────────────────────────

/// Metadata of a workload object in a logical workspace.
///
/// Only labels and annotations are modeled; the rest of the object lives
/// in the generic storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamObject {
    pub workspace: String,
    #[serde(default)]
    pub group: String,
    pub resource: String,
    /// Empty for cluster-scoped objects.
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl UpstreamObject {
    pub fn new(workspace: &str, gr: &GroupResource, namespace: &str, name: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            group: gr.group.clone(),
            resource: gr.resource.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            resource_version: 0,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn table_key(&self) -> String {
        format!(
            "{}|{}/{}|{}/{}",
            self.workspace, self.group, self.resource, self.namespace, self.name
        )
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(&self.group, &self.resource)
    }
}

/// An (object, sync target) pair excluded from processing because of a
/// malformed annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectQuarantine {
    pub object_key: String,
    pub sync_target_uid: String,
    pub reason: String,
    pub message: String,
    /// Object resource version that failed validation.
    pub resource_version: u64,
    pub recorded_at: DateTime<Utc>,
}

impl ObjectQuarantine {
    pub fn table_key(&self) -> String {
        quarantine_key(&self.object_key, &self.sync_target_uid)
    }
}

pub fn quarantine_key(object_key: &str, sync_target_uid: &str) -> String {
    format!("{object_key}#{sync_target_uid}")
}
