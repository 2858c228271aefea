//! redb table definitions for the SyncGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Sync targets keyed by `{workspace}/{name}`.
pub const SYNC_TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_targets");

/// API exports keyed by `{workspace}/{name}`.
pub const API_EXPORTS: TableDefinition<&str, &[u8]> = TableDefinition::new("api_exports");

/// Resource schemas keyed by `{workspace}/{schema_name}`.
pub const RESOURCE_SCHEMAS: TableDefinition<&str, &[u8]> = TableDefinition::new("resource_schemas");

/// Latest syncer heartbeat keyed by sync target key.
pub const HEARTBEATS: TableDefinition<&str, &[u8]> = TableDefinition::new("heartbeats");

/// Upstream objects keyed by `{workspace}|{group}/{resource}|{namespace}/{name}`.
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Quarantined (object, sync target) pairs keyed by `{object_key}#{sync_target_uid}`.
pub const QUARANTINE: TableDefinition<&str, &[u8]> = TableDefinition::new("quarantine");
