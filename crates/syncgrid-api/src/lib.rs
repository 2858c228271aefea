//! syncgrid-api — REST API for SyncGrid.
//!
//! A thin adapter over the state store, the discovery aggregator and the
//! object sync controller. Status is never written here; the reconciler
//! owns it.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/clusters/{workspace}/synctargets` | List sync targets |
//! | POST | `/api/v1/clusters/{workspace}/synctargets` | Register a sync target |
//! | GET | `/api/v1/clusters/{workspace}/synctargets/{name}` | Get spec and status |
//! | POST | `/api/v1/clusters/{workspace}/synctargets/{name}/heartbeat` | Syncer heartbeat and capability report |
//! | GET | `/api/v1/clusters/{workspace}/synctargets/{name}/discovery` | Discovery for the sync target |
//! | GET | `/services/syncer/{workspace}/{name}/{uid}/discovery` | Discovery via the published URL |
//! | POST | `/api/v1/clusters/{workspace}/objects` | Create an object |
//! | GET | `/api/v1/clusters/{workspace}/objects/{resource}/{namespace}/{name}` | Get an object (`?sync_target=` adds its state) |
//! | POST | `.../objects/{resource}/{namespace}/{name}/placement` | Unassigned → AssignedPending |
//! | POST | `.../objects/{resource}/{namespace}/{name}/start-sync` | AssignedPending → Syncing |
//! | POST | `.../objects/{resource}/{namespace}/{name}/deletion` | Request deletion |
//! | POST | `.../objects/{resource}/{namespace}/{name}/removal` | Deleting → Removed |
//! | POST/DELETE | `.../objects/{resource}/{namespace}/{name}/finalizers` | Add or remove a finalizer |
//! | PUT | `.../objects/{resource}/{namespace}/{name}/status` | Syncer's downstream status |
//! | PUT | `.../objects/{resource}/{namespace}/{name}/spec-diff` | JSON Patch applied before syncing down |
//!
//! Object transitions answer 404 for an unknown object or sync target, 409
//! for an illegal transition or pending finalizers, and 422 when placement
//! is refused or the object is quarantined.

pub mod handlers;
pub mod objects;

use axum::Router;
use axum::routing::{get, post, put};
use syncgrid_core::config::ReconcilerSettings;
use syncgrid_discovery::DiscoveryAggregator;
use syncgrid_state::StateStore;
use syncgrid_sync::ObjectSyncController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub discovery: DiscoveryAggregator,
    pub objects: ObjectSyncController,
}

impl ApiState {
    /// State with an object controller using the default conflict retries.
    pub fn new(store: StateStore) -> Self {
        let retries = ReconcilerSettings::default().max_conflict_retries;
        Self::with_objects(store.clone(), ObjectSyncController::new(store, retries))
    }

    pub fn with_objects(store: StateStore, objects: ObjectSyncController) -> Self {
        Self {
            discovery: DiscoveryAggregator::new(store.clone()),
            store,
            objects,
        }
    }
}

/// Build the complete API router.
pub fn build_router(store: StateStore) -> Router {
    router(ApiState::new(store))
}

/// Build the router over prepared state.
pub fn router(api_state: ApiState) -> Router {
    let object = "/clusters/{workspace}/objects/{resource}/{namespace}/{name}";

    let api_routes = Router::new()
        .route(
            "/clusters/{workspace}/synctargets",
            get(handlers::list_sync_targets).post(handlers::create_sync_target),
        )
        .route("/clusters/{workspace}/synctargets/{name}", get(handlers::get_sync_target))
        .route("/clusters/{workspace}/synctargets/{name}/heartbeat", post(handlers::post_heartbeat))
        .route("/clusters/{workspace}/synctargets/{name}/discovery", get(handlers::get_discovery))
        .route("/clusters/{workspace}/objects", post(objects::create_object))
        .route(object, get(objects::get_object))
        .route(&format!("{object}/placement"), post(objects::place))
        .route(&format!("{object}/start-sync"), post(objects::start_sync))
        .route(&format!("{object}/deletion"), post(objects::request_deletion))
        .route(&format!("{object}/removal"), post(objects::complete_removal))
        .route(
            &format!("{object}/finalizers"),
            post(objects::add_finalizer).delete(objects::remove_finalizer),
        )
        .route(&format!("{object}/status"), put(objects::report_status))
        .route(&format!("{object}/spec-diff"), put(objects::set_spec_diff))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route(
            "/services/syncer/{workspace}/{name}/{uid}/discovery",
            get(handlers::get_syncer_discovery).with_state(api_state),
        )
}
