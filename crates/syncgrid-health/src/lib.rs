//! syncgrid-health — syncer heartbeat health for SyncGrid.
//!
//! Turns the time since a syncer's last heartbeat into a
//! [`HeartbeatVerdict`] and folds it into the sync target's condition set.
//!
//! # Conditions
//!
//! ```text
//! HeartbeatHealthy   Unknown (never seen) │ True (fresh) │ False/ErrorHeartbeat (stale)
//! SyncerReady        follows HeartbeatHealthy
//! APIImporterReady   True once a capability report from this registration exists
//! ```
//!
//! Heartbeat health never gates compatibility. A stale syncer keeps its
//! `synced_resources`; the condition only informs schedulers.

pub mod checker;
pub mod conditions;

pub use checker::{evaluate, HeartbeatVerdict, REASON_ERROR_HEARTBEAT};
pub use conditions::apply_heartbeat_conditions;
