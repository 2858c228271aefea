//! syncgrid-discovery — discovery documents scoped to one sync target.
//!
//! A syncer sees a fixed baseline of core resources plus every resource
//! whose compatibility state on its sync target is `Accepted`. Pending and
//! incompatible resources are simply absent.
//!
//! # Architecture
//!
//! ```text
//! DiscoveryAggregator::discover(workspace, name)
//!   ├── StateStore::get_sync_target()         latest committed status
//!   ├── baseline::resources()                 configmaps, namespaces, ...
//!   ├── accepted synced_resources
//!   │     └── SchemaCatalog lookup            kind, scope, subresources
//!   ├── hash::storage_version_hash()          per (workspace, group, version, kind)
//!   └── group by group-version, sort by name  → Vec<ApiResourceList>
//! ```
//!
//! Reads only; any number of callers may query concurrently.

pub mod aggregator;
pub mod baseline;
pub mod error;
pub mod hash;
pub mod types;

pub use aggregator::DiscoveryAggregator;
pub use error::DiscoveryError;
pub use hash::storage_version_hash;
pub use types::{ApiResource, ApiResourceList};
