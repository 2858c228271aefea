//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use syncgrid_discovery::DiscoveryError;
use syncgrid_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

pub(crate) fn state_error(e: &StateError) -> axum::response::Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::AlreadyExists(_) | StateError::Conflict { .. } => StatusCode::CONFLICT,
        StateError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Sync targets ───────────────────────────────────────────────

/// Registration request body.
#[derive(serde::Deserialize)]
pub struct CreateSyncTargetRequest {
    pub name: String,
    #[serde(default)]
    pub spec: SyncTargetSpec,
}

/// GET /api/v1/clusters/:workspace/synctargets
pub async fn list_sync_targets(
    State(state): State<ApiState>,
    Path(workspace): Path<String>,
) -> impl IntoResponse {
    match state.store.list_sync_targets_in(&workspace) {
        Ok(targets) => ApiResponse::ok(targets).into_response(),
        Err(e) => state_error(&e),
    }
}

/// POST /api/v1/clusters/:workspace/synctargets
pub async fn create_sync_target(
    State(state): State<ApiState>,
    Path(workspace): Path<String>,
    Json(req): Json<CreateSyncTargetRequest>,
) -> impl IntoResponse {
    if req.name.is_empty() || req.name.contains('/') {
        return error_response("name must be non-empty and must not contain '/'", StatusCode::BAD_REQUEST)
            .into_response();
    }

    match state.store.create_sync_target(&workspace, &req.name, req.spec) {
        Ok(target) => {
            info!(sync_target = %target.table_key(), uid = %target.uid, "sync target registered");
            (StatusCode::CREATED, ApiResponse::ok(target)).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/clusters/:workspace/synctargets/:name
pub async fn get_sync_target(
    State(state): State<ApiState>,
    Path((workspace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_sync_target(&sync_target_key(&workspace, &name)) {
        Ok(Some(target)) => ApiResponse::ok(target).into_response(),
        Ok(None) => error_response("sync target not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(&e),
    }
}

// ── Syncer heartbeat ───────────────────────────────────────────

/// Heartbeat body sent by a syncer.
#[derive(serde::Deserialize)]
pub struct HeartbeatRequest {
    pub uid: String,
    /// Defaults to the time the request was received.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: Vec<ReportedResource>,
    #[serde(default)]
    pub capacity: BTreeMap<String, String>,
    #[serde(default)]
    pub allocatable: BTreeMap<String, String>,
}

/// POST /api/v1/clusters/:workspace/synctargets/:name/heartbeat
pub async fn post_heartbeat(
    State(state): State<ApiState>,
    Path((workspace, name)): Path<(String, String)>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    let key = sync_target_key(&workspace, &name);

    // A syncer configured for an earlier registration must not report
    // against the new one.
    match state.store.get_sync_target(&key) {
        Ok(Some(target)) if target.uid == req.uid => {}
        Ok(Some(target)) => {
            warn!(sync_target = %key, expected = %target.uid, got = %req.uid, "heartbeat for stale registration");
            return error_response("uid does not match the current registration", StatusCode::CONFLICT)
                .into_response();
        }
        Ok(None) => return error_response("sync target not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return state_error(&e),
    }

    let received_at = Utc::now();
    let heartbeat = SyncerHeartbeat {
        sync_target: key.clone(),
        uid: req.uid,
        observed_at: req.observed_at.unwrap_or(received_at),
        received_at,
        resources: req.resources,
        capacity: req.capacity,
        allocatable: req.allocatable,
    };

    match state.store.put_heartbeat(&heartbeat) {
        Ok(()) => {
            debug!(sync_target = %key, resources = heartbeat.resources.len(), "heartbeat recorded");
            ApiResponse::ok(serde_json::json!({
                "syncTarget": key,
                "observedAt": heartbeat.observed_at,
                "receivedAt": heartbeat.received_at,
            }))
            .into_response()
        }
        Err(e) => state_error(&e),
    }
}

// ── Discovery ──────────────────────────────────────────────────

fn discovery_response(result: Result<Vec<syncgrid_discovery::ApiResourceList>, DiscoveryError>) -> axum::response::Response {
    match result {
        Ok(lists) => ApiResponse::ok(lists).into_response(),
        Err(DiscoveryError::SyncTargetNotFound(_)) => {
            error_response("sync target not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(DiscoveryError::State(e)) => state_error(&e),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/clusters/:workspace/synctargets/:name/discovery
pub async fn get_discovery(
    State(state): State<ApiState>,
    Path((workspace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    discovery_response(state.discovery.discover(&workspace, &name))
}

/// GET /services/syncer/:workspace/:name/:uid/discovery
pub async fn get_syncer_discovery(
    State(state): State<ApiState>,
    Path((workspace, name, uid)): Path<(String, String, String)>,
) -> impl IntoResponse {
    discovery_response(state.discovery.discover_for_uid(&workspace, &name, &uid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncgrid_core::GroupResource;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        ApiState::new(store)
    }

    fn register(state: &ApiState, name: &str) -> SyncTarget {
        state
            .store
            .create_sync_target("root:compute", name, SyncTargetSpec::default())
            .unwrap()
    }

    fn heartbeat(uid: &str) -> HeartbeatRequest {
        HeartbeatRequest {
            uid: uid.to_string(),
            observed_at: None,
            resources: vec![ReportedResource {
                group_resource: GroupResource::core("services"),
                versions: vec!["v1".to_string()],
            }],
            capacity: BTreeMap::new(),
            allocatable: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn list_sync_targets_empty() {
        let state = test_state();
        let resp = list_sync_targets(State(state), Path("root:compute".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_get_sync_target() {
        let state = test_state();
        let req = CreateSyncTargetRequest {
            name: "east".to_string(),
            spec: SyncTargetSpec::default(),
        };
        let resp = create_sync_target(State(state.clone()), Path("root:compute".to_string()), Json(req)).await;
        assert_eq!(resp.into_response().status(), StatusCode::CREATED);

        let resp = get_sync_target(
            State(state),
            Path(("root:compute".to_string(), "east".to_string())),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let state = test_state();
        register(&state, "east");
        let req = CreateSyncTargetRequest {
            name: "east".to_string(),
            spec: SyncTargetSpec::default(),
        };
        let resp = create_sync_target(State(state), Path("root:compute".to_string()), Json(req)).await;
        assert_eq!(resp.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_name_rejected() {
        let state = test_state();
        let req = CreateSyncTargetRequest {
            name: "a/b".to_string(),
            spec: SyncTargetSpec::default(),
        };
        let resp = create_sync_target(State(state), Path("root:compute".to_string()), Json(req)).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_nonexistent_sync_target() {
        let state = test_state();
        let resp = get_sync_target(State(state), Path(("root".to_string(), "nope".to_string()))).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_is_stored() {
        let state = test_state();
        let target = register(&state, "east");

        let resp = post_heartbeat(
            State(state.clone()),
            Path(("root:compute".to_string(), "east".to_string())),
            Json(heartbeat(&target.uid)),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let stored = state.store.get_heartbeat(&target.table_key()).unwrap().unwrap();
        assert_eq!(stored.uid, target.uid);
        assert!(stored.versions_for(&GroupResource::core("services")).is_some());
    }

    #[tokio::test]
    async fn heartbeat_receipt_time_is_server_side() {
        let state = test_state();
        let target = register(&state, "east");
        let observed = Utc::now() - chrono::Duration::hours(1);

        let before = Utc::now();
        let resp = post_heartbeat(
            State(state.clone()),
            Path(("root:compute".to_string(), "east".to_string())),
            Json(HeartbeatRequest {
                observed_at: Some(observed),
                ..heartbeat(&target.uid)
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let stored = state.store.get_heartbeat(&target.table_key()).unwrap().unwrap();
        assert_eq!(stored.observed_at, observed);
        assert!(stored.received_at >= before);
    }

    #[tokio::test]
    async fn heartbeat_with_stale_uid_rejected() {
        let state = test_state();
        let target = register(&state, "east");

        let resp = post_heartbeat(
            State(state.clone()),
            Path(("root:compute".to_string(), "east".to_string())),
            Json(heartbeat("old-uid")),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::CONFLICT);
        assert!(state.store.get_heartbeat(&target.table_key()).unwrap().is_none());
    }

    #[tokio::test]
    async fn discovery_for_unknown_target() {
        let state = test_state();
        let resp = get_discovery(State(state), Path(("root".to_string(), "nope".to_string()))).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn syncer_discovery_checks_uid() {
        let state = test_state();
        let target = register(&state, "east");

        let resp = get_syncer_discovery(
            State(state.clone()),
            Path(("root:compute".to_string(), "east".to_string(), target.uid.clone())),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let resp = get_syncer_discovery(
            State(state),
            Path(("root:compute".to_string(), "east".to_string(), "other".to_string())),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }
}
