//! Decoding and encoding of the per-sync-target state on an object.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use syncgrid_core::keys::{parse_finalizers, SyncTargetKeys, STATE_PENDING, STATE_SYNC};
use syncgrid_state::UpstreamObject;

use crate::patch;

/// Sync state of one object on one sync target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// No state label; the syncer ignores the object.
    Unassigned,
    /// Label present but empty; placed, not yet handed to the syncer.
    AssignedPending,
    /// Label `Sync`; the syncer manages the object.
    Syncing,
    /// Label `Sync` plus a deletion marker. The syncer may clear the label
    /// once `finalizers` is empty.
    Deleting {
        requested_at: DateTime<Utc>,
        finalizers: Vec<String>,
    },
}

impl SyncState {
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Unassigned => "Unassigned",
            SyncState::AssignedPending => "AssignedPending",
            SyncState::Syncing => "Syncing",
            SyncState::Deleting { .. } => "Deleting",
        }
    }

    pub fn is_assigned(&self) -> bool {
        !matches!(self, SyncState::Unassigned)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A label or annotation for this sync target holds an unusable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnnotationError {
    #[error("state label {key} has unknown value {value:?}")]
    UnknownState { key: String, value: String },

    #[error("deletion marker {key} is not an RFC3339 timestamp: {value:?}")]
    BadTimestamp { key: String, value: String },

    #[error("downstream status {key} is not valid JSON: {message}")]
    BadStatus { key: String, message: String },

    #[error("spec diff {key} is not a valid JSON Patch: {message}")]
    BadSpecDiff { key: String, message: String },
}

impl AnnotationError {
    /// Short machine-readable reason for quarantine records.
    pub fn reason(&self) -> &'static str {
        match self {
            AnnotationError::UnknownState { .. } => "UnknownSyncState",
            AnnotationError::BadTimestamp { .. } => "MalformedDeletionTimestamp",
            AnnotationError::BadStatus { .. } => "MalformedDownstreamStatus",
            AnnotationError::BadSpecDiff { .. } => "MalformedSpecDiff",
        }
    }
}

/// Derive the sync state from the object's labels and annotations,
/// validating every key this sync target owns.
///
/// A deletion marker on an object without a state label is ignored; one on
/// an assigned-but-pending object means deletion was requested before the
/// syncer picked it up.
pub fn decode(object: &UpstreamObject, keys: &SyncTargetKeys) -> Result<SyncState, AnnotationError> {
    if let Some(raw) = object.annotations.get(&keys.status) {
        serde_json::from_str::<serde_json::Value>(raw).map_err(|e| AnnotationError::BadStatus {
            key: keys.status.clone(),
            message: e.to_string(),
        })?;
    }
    if let Some(raw) = object.annotations.get(&keys.spec_diff) {
        patch::parse(raw).map_err(|message| AnnotationError::BadSpecDiff {
            key: keys.spec_diff.clone(),
            message,
        })?;
    }

    let deletion = match object.annotations.get(&keys.deletion) {
        Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| AnnotationError::BadTimestamp {
            key: keys.deletion.clone(),
            value: raw.clone(),
        })?),
        None => None,
    };

    let finalizers = object
        .annotations
        .get(&keys.finalizers)
        .map(|raw| parse_finalizers(raw))
        .unwrap_or_default();

    let label = object.labels.get(&keys.state_label).map(String::as_str);
    let state = match (label, deletion) {
        (None, _) => SyncState::Unassigned,
        (Some(STATE_PENDING | STATE_SYNC), Some(requested_at)) => SyncState::Deleting {
            requested_at,
            finalizers,
        },
        (Some(STATE_PENDING), None) => SyncState::AssignedPending,
        (Some(STATE_SYNC), None) => SyncState::Syncing,
        (Some(other), _) => {
            return Err(AnnotationError::UnknownState {
                key: keys.state_label.clone(),
                value: other.to_string(),
            });
        }
    };
    Ok(state)
}

/// Write `state` onto the object. Only the state label and deletion
/// marker are touched; finalizers belong to whoever added them. Returning
/// to `Unassigned` drops every key of this sync target.
pub fn encode(object: &mut UpstreamObject, keys: &SyncTargetKeys, state: &SyncState) {
    match state {
        SyncState::Unassigned => {
            object.labels.remove(&keys.state_label);
            for key in keys.annotations() {
                object.annotations.remove(key);
            }
        }
        SyncState::AssignedPending => {
            object.labels.insert(keys.state_label.clone(), STATE_PENDING.to_string());
            object.annotations.remove(&keys.deletion);
        }
        SyncState::Syncing => {
            object.labels.insert(keys.state_label.clone(), STATE_SYNC.to_string());
            object.annotations.remove(&keys.deletion);
        }
        SyncState::Deleting { requested_at, .. } => {
            object.labels.insert(keys.state_label.clone(), STATE_SYNC.to_string());
            object
                .annotations
                .insert(keys.deletion.clone(), format_timestamp(*requested_at));
        }
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
