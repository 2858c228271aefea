//! Shared types used across SyncGrid crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Export evaluated for sync targets that don't list any.
pub const DEFAULT_EXPORT_NAME: &str = "kubernetes";

/// Group segment used in schema names for the core (empty) API group.
pub const CORE_GROUP_ALIAS: &str = "core";

/// An API group plus a plural resource name.
///
/// The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupResource {
    #[serde(default)]
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Core-group resource (`configmaps`, `services`, ...).
    pub fn core(resource: &str) -> Self {
        Self::new("", resource)
    }

    /// Parse a schema name of the form `<prefix>.<resource>.<group>`.
    ///
    /// The group may itself contain dots (`today.cowboys.wildwest.dev`
    /// → `cowboys.wildwest.dev`). A group of `core` maps to the core group.
    pub fn from_schema_name(name: &str) -> Option<Self> {
        let mut parts = name.splitn(3, '.');
        let _prefix = parts.next().filter(|p| !p.is_empty())?;
        let resource = parts.next().filter(|r| !r.is_empty())?;
        let group = parts.next().filter(|g| !g.is_empty())?;
        let group = if group == CORE_GROUP_ALIAS { "" } else { group };
        Some(Self::new(group, resource))
    }

    pub fn is_core(&self) -> bool {
        self.group.is_empty()
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Reference to an API export, by workspace and export name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExportReference {
    /// Workspace holding the export. Empty means the referencing
    /// sync target's own workspace.
    #[serde(default)]
    pub workspace: String,
    pub export_name: String,
}

impl ExportReference {
    pub fn new(workspace: &str, export_name: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            export_name: export_name.to_string(),
        }
    }

    /// Fill in an empty workspace with the referencing workspace.
    pub fn resolve_in(&self, local_workspace: &str) -> Self {
        if self.workspace.is_empty() {
            Self::new(local_workspace, &self.export_name)
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for ExportReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workspace, self.export_name)
    }
}

/// Build the `group/version` string used in discovery documents.
pub fn group_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

/// Parse a duration string like "5s", "500ms", "2m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
