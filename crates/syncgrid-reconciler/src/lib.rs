//! syncgrid-reconciler — sync target status reconciliation.
//!
//! The [`StatusReconciler`] is the only writer of `SyncTarget.status`. One
//! pass reads the target and its latest heartbeat, resolves compatibility,
//! refreshes heartbeat conditions, and writes the status back with
//! compare-and-swap only when something actually changed.
//!
//! # Architecture
//!
//! ```text
//! StatusController
//!   ├── supervisor: list targets on store change / poll tick
//!   └── per-target task
//!       ├── StatusReconciler::reconcile(key)
//!       │   ├── syncgrid_compat::resolve()         → synced_resources
//!       │   ├── syncgrid_health::evaluate()        → heartbeat conditions
//!       │   ├── virtual workspace URL, capacity
//!       │   └── StateStore::update_sync_target()   (CAS, conflict → re-read)
//!       └── Backoff on transient store/catalog errors
//! ```
//!
//! Unresolvable exports are retried quietly for `escalation_attempts`
//! passes before `APIExportsResolved=False` is written.

pub mod backoff;
pub mod controller;
pub mod error;
pub mod reconciler;

pub use backoff::Backoff;
pub use controller::StatusController;
pub use error::ReconcileError;
pub use reconciler::{ReconcileOutcome, StatusReconciler};
