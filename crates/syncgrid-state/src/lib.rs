//! syncgrid-state — embedded state store for SyncGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for sync targets, the API export schema catalog, syncer heartbeats,
//! and the labels/annotations of upstream objects.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{workspace}/{name}`, `{workspace}|{group}/{resource}|...`)
//! enable prefix scans for related records.
//!
//! Sync targets and upstream objects carry a `resource_version`. Updates
//! are compare-and-swap: the write only commits if the stored version still
//! equals the caller's, otherwise [`StateError::Conflict`] is returned and
//! the caller re-reads and recomputes.
//!
//! Every committed write bumps a revision counter that controllers watch
//! via [`StateStore::subscribe`].

pub mod catalog;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use catalog::{CatalogError, LatestSchemas, SchemaCatalog};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
