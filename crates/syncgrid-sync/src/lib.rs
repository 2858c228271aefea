//! syncgrid-sync — per-object, per-sync-target sync state.
//!
//! The state of an upstream object on one sync target lives entirely in
//! UID-scoped labels and annotations on the object. This crate decodes
//! that encoding into an explicit [`SyncState`], applies transitions as
//! pure functions, and writes the result back with compare-and-swap.
//!
//! # States
//!
//! ```text
//! Unassigned ──place──▶ AssignedPending ──start_sync──▶ Syncing
//!      ▲                      │                            │
//!      │                      └──────request_deletion──────┤
//!      │                                                   ▼
//!      └──────────complete_removal (no finalizers)──── Deleting
//! ```
//!
//! `Removed` is `Unassigned` again: clearing the state label is the
//! signal that the object is gone from the sync target.
//!
//! # Ownership
//!
//! The control plane and schedulers write the state label and deletion
//! marker, external controllers add and remove finalizers, and the syncer
//! writes downstream status and clears the label. Every mutator here is a
//! read-modify-write of only the keys it owns, retried on conflict.

pub mod controller;
pub mod error;
pub mod machine;
pub mod patch;
pub mod state;

pub use controller::{ObjectOutcome, ObjectSyncController, SweepSummary};
pub use error::{SyncError, SyncResult};
pub use machine::TransitionError;
pub use patch::{PatchOp, PatchOperation};
pub use state::{AnnotationError, SyncState};
