//! syncgrid-compat — resource compatibility resolution for sync targets.
//!
//! Computes, for one sync target, the list of (group, resource) tuples it
//! is evaluated against and whether its syncer can actually sync each of
//! them. The resolver is a pure function over the sync target, a
//! [`SchemaCatalog`](syncgrid_state::SchemaCatalog), and the latest syncer
//! heartbeat; persisting the result is the reconciler's job.
//!
//! # Architecture
//!
//! ```text
//! resolve(target, catalog, heartbeat)
//!   ├── target.effective_exports()        (spec order, default export)
//!   ├── catalog.get_latest_schemas(export) per export
//!   │     └── unresolved → ResolveError, export skipped
//!   ├── dedupe by GroupResource            (first export wins)
//!   ├── compatibility(schema, heartbeat)   → Pending | Accepted | Incompatible
//!   └── sort by (resource, group)          → Resolution
//! ```

pub mod error;
pub mod resolver;

pub use error::ResolveError;
pub use resolver::{compatibility, resolve, Resolution};
