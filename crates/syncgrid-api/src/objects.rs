//! Per-object sync state endpoints.
//!
//! Objects are addressed as `{workspace}/objects/{resource}/{namespace}/{name}`.
//! `{resource}` is the plural name for the core group and `resource.group`
//! otherwise; `{namespace}` is `_` for cluster-scoped objects. Requests name
//! the sync target as `<workspace>/<name>`.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use syncgrid_core::GroupResource;
use syncgrid_state::UpstreamObject;
use syncgrid_sync::{SyncError, SyncResult, SyncState};

use crate::handlers::{error_response, state_error, ApiResponse};
use crate::ApiState;

/// Namespace path segment of cluster-scoped objects.
pub const CLUSTER_SCOPE: &str = "_";

type ObjectPath = Path<(String, String, String, String)>;

/// `services` is core; `cowboys.wildwest.dev` is `cowboys` in `wildwest.dev`.
fn parse_group_resource(segment: &str) -> GroupResource {
    match segment.split_once('.') {
        Some((resource, group)) => GroupResource::new(group, resource),
        None => GroupResource::core(segment),
    }
}

fn object_key((workspace, resource, namespace, name): &(String, String, String, String)) -> String {
    let namespace = if namespace == CLUSTER_SCOPE { "" } else { namespace.as_str() };
    UpstreamObject::new(workspace, &parse_group_resource(resource), namespace, name).table_key()
}

fn sync_error(e: &SyncError) -> Response {
    let status = match e {
        SyncError::State(e) => return state_error(e),
        SyncError::ObjectNotFound(_) | SyncError::SyncTargetNotFound(_) => StatusCode::NOT_FOUND,
        SyncError::Transition(t) if t.is_protocol_violation() => StatusCode::CONFLICT,
        SyncError::Transition(_) | SyncError::Quarantined { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SyncError::Invalid(_) => StatusCode::BAD_REQUEST,
        SyncError::ConflictRetriesExhausted(_) => StatusCode::CONFLICT,
    };
    error_response(&e.to_string(), status).into_response()
}

/// State of one object on one sync target, as returned to callers.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub sync_target: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl StateView {
    fn new(sync_target: &str, state: &SyncState) -> Self {
        let (deletion_requested_at, finalizers) = match state {
            SyncState::Deleting {
                requested_at,
                finalizers,
            } => (Some(*requested_at), finalizers.clone()),
            _ => (None, Vec::new()),
        };
        Self {
            sync_target: sync_target.to_string(),
            state: state.name(),
            deletion_requested_at,
            finalizers,
        }
    }
}

fn state_response(sync_target: &str, result: SyncResult<SyncState>) -> Response {
    match result {
        Ok(state) => ApiResponse::ok(StateView::new(sync_target, &state)).into_response(),
        Err(e) => sync_error(&e),
    }
}

// ── Objects ────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct CreateObjectRequest {
    #[serde(default)]
    pub group: String,
    pub resource: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// POST /api/v1/clusters/:workspace/objects
pub async fn create_object(
    State(state): State<ApiState>,
    Path(workspace): Path<String>,
    Json(req): Json<CreateObjectRequest>,
) -> impl IntoResponse {
    if req.resource.is_empty() || req.name.is_empty() {
        return error_response("resource and name are required", StatusCode::BAD_REQUEST).into_response();
    }

    let mut object = UpstreamObject::new(
        &workspace,
        &GroupResource::new(&req.group, &req.resource),
        &req.namespace,
        &req.name,
    );
    object.labels = req.labels;
    object.annotations = req.annotations;

    match state.store.create_object(&object) {
        Ok(created) => {
            info!(object = %created.table_key(), "object created");
            (StatusCode::CREATED, ApiResponse::ok(created)).into_response()
        }
        Err(e) => state_error(&e),
    }
}

#[derive(serde::Deserialize)]
pub struct SyncTargetQuery {
    pub sync_target: Option<String>,
}

/// GET /api/v1/clusters/:workspace/objects/:resource/:namespace/:name
///
/// With `?sync_target=`, the decoded state on that sync target is included.
pub async fn get_object(
    State(state): State<ApiState>,
    Path(path): ObjectPath,
    Query(query): Query<SyncTargetQuery>,
) -> impl IntoResponse {
    let key = object_key(&path);
    let object = match state.store.get_object(&key) {
        Ok(Some(object)) => object,
        Ok(None) => return error_response("object not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return state_error(&e),
    };

    let view = match query.sync_target.as_deref() {
        Some(target) => match state.objects.state(&key, target) {
            Ok(s) => Some(StateView::new(target, &s)),
            Err(e) => return sync_error(&e),
        },
        None => None,
    };

    ApiResponse::ok(serde_json::json!({ "object": object, "state": view })).into_response()
}

// ── Transitions ────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct TargetRequest {
    pub sync_target: String,
}

/// POST .../objects/:resource/:namespace/:name/placement
pub async fn place(
    State(state): State<ApiState>,
    Path(path): ObjectPath,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let key = object_key(&path);
    let result = state.objects.place(&key, &req.sync_target);
    if result.is_ok() {
        info!(object = %key, sync_target = %req.sync_target, "object placed");
    }
    state_response(&req.sync_target, result)
}

/// POST .../objects/:resource/:namespace/:name/start-sync
pub async fn start_sync(
    State(state): State<ApiState>,
    Path(path): ObjectPath,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let key = object_key(&path);
    state_response(&req.sync_target, state.objects.start_sync(&key, &req.sync_target))
}

#[derive(serde::Deserialize)]
pub struct DeletionRequest {
    pub sync_target: String,
    /// Defaults to the time the request was received.
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
}

/// POST .../objects/:resource/:namespace/:name/deletion
pub async fn request_deletion(
    State(state): State<ApiState>,
    Path(path): ObjectPath,
    Json(req): Json<DeletionRequest>,
) -> impl IntoResponse {
    let key = object_key(&path);
    let at = req.requested_at.unwrap_or_else(Utc::now);
    let result = state.objects.request_deletion(&key, &req.sync_target, at);
    if result.is_ok() {
        info!(object = %key, sync_target = %req.sync_target, "deletion requested");
    }
    state_response(&req.sync_target, result)
}

/// POST .../objects/:resource/:namespace/:name/removal
pub async fn complete_removal(
    State(state): State<ApiState>,
    Path(path): ObjectPath,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let key = object_key(&path);
    state_response(&req.sync_target, state.objects.complete_removal(&key, &req.sync_target))
}

// ── Finalizers ─────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct FinalizerRequest {
    pub sync_target: String,
    pub finalizer: String,
}

/// POST .../objects/:resource/:namespace/:name/finalizers
pub async fn add_finalizer(
    State(state): State<ApiState>,
    Path(path): ObjectPath,
    Json(req): Json<FinalizerRequest>,
) -> impl IntoResponse {
    let key = object_key(&path);
    debug!(object = %key, sync_target = %req.sync_target, finalizer = %req.finalizer, "adding finalizer");
    state_response(
        &req.sync_target,
        state.objects.add_finalizer(&key, &req.sync_target, &req.finalizer),
    )
}

/// DELETE .../objects/:resource/:namespace/:name/finalizers
pub async fn remove_finalizer(
    State(state): State<ApiState>,
    Path(path): ObjectPath,
    Json(req): Json<FinalizerRequest>,
) -> impl IntoResponse {
    let key = object_key(&path);
    debug!(object = %key, sync_target = %req.sync_target, finalizer = %req.finalizer, "removing finalizer");
    state_response(
        &req.sync_target,
        state.objects.remove_finalizer(&key, &req.sync_target, &req.finalizer),
    )
}

// ── Syncer-owned annotations ───────────────────────────────────

#[derive(serde::Deserialize)]
pub struct DownstreamStatusRequest {
    pub sync_target: String,
    pub status: serde_json::Value,
}

/// PUT .../objects/:resource/:namespace/:name/status
pub async fn report_status(
    State(state): State<ApiState>,
    Path(path): ObjectPath,
    Json(req): Json<DownstreamStatusRequest>,
) -> impl IntoResponse {
    let key = object_key(&path);
    state_response(
        &req.sync_target,
        state.objects.report_downstream_status(&key, &req.sync_target, &req.status),
    )
}

#[derive(serde::Deserialize)]
pub struct SpecDiffRequest {
    pub sync_target: String,
    /// JSON Patch operations; `null` clears the diff.
    #[serde(default)]
    pub patch: Option<serde_json::Value>,
}

/// PUT .../objects/:resource/:namespace/:name/spec-diff
pub async fn set_spec_diff(
    State(state): State<ApiState>,
    Path(path): ObjectPath,
    Json(req): Json<SpecDiffRequest>,
) -> impl IntoResponse {
    let key = object_key(&path);
    let patch = req.patch.as_ref().map(ToString::to_string);
    state_response(
        &req.sync_target,
        state.objects.set_spec_diff(&key, &req.sync_target, patch.as_deref()),
    )
}
