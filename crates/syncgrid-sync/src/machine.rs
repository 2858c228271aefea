//! Transition rules, independent of storage.
//!
//! Each function takes the current state and returns the next one, or a
//! [`TransitionError`] leaving the state as it was. Repeating a transition
//! that already happened is a no-op, so controllers can be re-run freely.

use chrono::{DateTime, Utc};
use thiserror::Error;

use syncgrid_core::GroupResource;
use syncgrid_state::CompatibilityState;

use crate::state::SyncState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{resource} is not syncable on {sync_target} (state: {})", describe(.state))]
    NotAccepted {
        sync_target: String,
        resource: GroupResource,
        state: Option<CompatibilityState>,
    },

    #[error("sync target {0} does not accept new placements")]
    Unschedulable(String),

    #[error("cannot {transition} an object in state {from}")]
    Illegal {
        from: &'static str,
        transition: &'static str,
    },

    #[error("removal blocked by finalizers: {}", .0.join(", "))]
    FinalizersPending(Vec<String>),
}

impl TransitionError {
    /// Attempts that would break the state protocol, as opposed to
    /// placement being refused.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            TransitionError::Illegal { .. } | TransitionError::FinalizersPending(_)
        )
    }
}

fn describe(state: &Option<CompatibilityState>) -> String {
    state.map_or_else(|| "not evaluated".to_string(), |s| s.to_string())
}

fn illegal(from: &SyncState, transition: &'static str) -> TransitionError {
    TransitionError::Illegal {
        from: from.name(),
        transition,
    }
}

/// `Unassigned → AssignedPending`. Only onto a schedulable sync target
/// whose compatibility state for the resource is `Accepted`.
pub fn place(
    current: &SyncState,
    sync_target: &str,
    resource: &GroupResource,
    compatibility: Option<CompatibilityState>,
    schedulable: bool,
) -> Result<SyncState, TransitionError> {
    match current {
        SyncState::Unassigned => {
            if compatibility != Some(CompatibilityState::Accepted) {
                return Err(TransitionError::NotAccepted {
                    sync_target: sync_target.to_string(),
                    resource: resource.clone(),
                    state: compatibility,
                });
            }
            if !schedulable {
                return Err(TransitionError::Unschedulable(sync_target.to_string()));
            }
            Ok(SyncState::AssignedPending)
        }
        SyncState::AssignedPending | SyncState::Syncing => Ok(current.clone()),
        SyncState::Deleting { .. } => Err(illegal(current, "place")),
    }
}

/// `AssignedPending → Syncing`.
pub fn start_sync(current: &SyncState) -> Result<SyncState, TransitionError> {
    match current {
        SyncState::AssignedPending | SyncState::Syncing => Ok(SyncState::Syncing),
        _ => Err(illegal(current, "start syncing")),
    }
}

/// `Syncing → Deleting`. A repeated request keeps the original timestamp.
pub fn request_deletion(current: &SyncState, at: DateTime<Utc>, finalizers: Vec<String>) -> Result<SyncState, TransitionError> {
    match current {
        SyncState::AssignedPending | SyncState::Syncing => Ok(SyncState::Deleting {
            requested_at: at,
            finalizers,
        }),
        SyncState::Deleting { .. } => Ok(current.clone()),
        SyncState::Unassigned => Err(illegal(current, "delete")),
    }
}

/// `Deleting → Removed` (back to `Unassigned`), only with no finalizers
/// left. `current` must come from a fresh read.
pub fn complete_removal(current: &SyncState) -> Result<SyncState, TransitionError> {
    match current {
        SyncState::Deleting { finalizers, .. } if finalizers.is_empty() => Ok(SyncState::Unassigned),
        SyncState::Deleting { finalizers, .. } => Err(TransitionError::FinalizersPending(finalizers.clone())),
        SyncState::Unassigned => Ok(SyncState::Unassigned),
        SyncState::AssignedPending | SyncState::Syncing => Err(illegal(current, "remove")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn services() -> GroupResource {
        GroupResource::core("services")
    }

    #[test]
    fn placement_requires_accepted_resource() {
        for state in [None, Some(CompatibilityState::Pending), Some(CompatibilityState::Incompatible)] {
            let err = place(&SyncState::Unassigned, "ws/east", &services(), state, true).unwrap_err();
            assert!(matches!(err, TransitionError::NotAccepted { .. }));
            assert!(!err.is_protocol_violation());
        }
        assert_eq!(
            place(&SyncState::Unassigned, "ws/east", &services(), Some(CompatibilityState::Accepted), true).unwrap(),
            SyncState::AssignedPending
        );
    }

    #[test]
    fn placement_requires_schedulable_target() {
        let err = place(&SyncState::Unassigned, "ws/east", &services(), Some(CompatibilityState::Accepted), false)
            .unwrap_err();
        assert_eq!(err, TransitionError::Unschedulable("ws/east".to_string()));
    }

    #[test]
    fn repeated_transitions_are_noops() {
        let accepted = Some(CompatibilityState::Accepted);
        assert_eq!(place(&SyncState::Syncing, "t", &services(), accepted, false).unwrap(), SyncState::Syncing);
        assert_eq!(start_sync(&SyncState::Syncing).unwrap(), SyncState::Syncing);

        let deleting = SyncState::Deleting { requested_at: at(5), finalizers: vec![] };
        assert_eq!(request_deletion(&deleting, at(99), vec![]).unwrap(), deleting);
        assert_eq!(complete_removal(&SyncState::Unassigned).unwrap(), SyncState::Unassigned);
    }

    #[test]
    fn removal_waits_for_finalizers() {
        let blocked = SyncState::Deleting {
            requested_at: at(5),
            finalizers: vec!["example.com/cleanup".to_string()],
        };
        let err = complete_removal(&blocked).unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(err.to_string(), "removal blocked by finalizers: example.com/cleanup");

        let clear = SyncState::Deleting { requested_at: at(5), finalizers: vec![] };
        assert_eq!(complete_removal(&clear).unwrap(), SyncState::Unassigned);
    }

    #[test]
    fn removal_cannot_skip_deleting() {
        assert!(complete_removal(&SyncState::Syncing).unwrap_err().is_protocol_violation());
        assert!(complete_removal(&SyncState::AssignedPending).is_err());
    }

    #[test]
    fn illegal_edges() {
        assert!(start_sync(&SyncState::Unassigned).is_err());
        assert!(start_sync(&SyncState::Deleting { requested_at: at(0), finalizers: vec![] }).is_err());
        assert!(request_deletion(&SyncState::Unassigned, at(0), vec![]).is_err());
        let deleting = SyncState::Deleting { requested_at: at(0), finalizers: vec![] };
        assert!(place(&deleting, "t", &services(), Some(CompatibilityState::Accepted), true).is_err());
    }
}
