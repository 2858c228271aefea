//! Heartbeat-derived conditions on a sync target's status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use syncgrid_state::{Condition, ConditionStatus, ConditionType, SyncTargetStatus};

use crate::checker::{HeartbeatVerdict, REASON_ERROR_HEARTBEAT};

/// Update `HeartbeatHealthy`, `SyncerReady` and `APIImporterReady` from a
/// verdict. Returns true if any condition changed.
///
/// Messages carry only the threshold, not the current age, so a target
/// that stays stale does not produce a new status on every pass.
pub fn apply_heartbeat_conditions(
    status: &mut SyncTargetStatus,
    sync_target: &str,
    verdict: HeartbeatVerdict,
    threshold: Duration,
    has_capability_report: bool,
    now: DateTime<Utc>,
) -> bool {
    let was_healthy = status.is_condition_true(ConditionType::HeartbeatHealthy);

    let (heartbeat, syncer) = match verdict {
        HeartbeatVerdict::Unknown => (
            Condition::new(ConditionType::HeartbeatHealthy, ConditionStatus::Unknown, now)
                .with_reason("NoHeartbeat", "no syncer heartbeat received yet"),
            Condition::new(ConditionType::SyncerReady, ConditionStatus::Unknown, now)
                .with_reason("NoHeartbeat", "no syncer heartbeat received yet"),
        ),
        HeartbeatVerdict::Healthy => (
            Condition::new(ConditionType::HeartbeatHealthy, ConditionStatus::True, now),
            Condition::new(ConditionType::SyncerReady, ConditionStatus::True, now),
        ),
        HeartbeatVerdict::Stale { .. } => {
            let message = format!("no syncer heartbeat within {}s", threshold.as_secs());
            (
                Condition::new(ConditionType::HeartbeatHealthy, ConditionStatus::False, now)
                    .with_reason(REASON_ERROR_HEARTBEAT, message.clone()),
                Condition::new(ConditionType::SyncerReady, ConditionStatus::False, now)
                    .with_reason(REASON_ERROR_HEARTBEAT, message),
            )
        }
    };

    let importer = if has_capability_report {
        Condition::new(ConditionType::ApiImporterReady, ConditionStatus::True, now)
    } else {
        Condition::new(ConditionType::ApiImporterReady, ConditionStatus::False, now)
            .with_reason("NoCapabilityReport", "syncer has not reported its API resources")
    };

    let mut changed = status.set_condition(heartbeat);
    changed |= status.set_condition(syncer);
    changed |= status.set_condition(importer);

    match verdict {
        HeartbeatVerdict::Stale { age } if was_healthy => {
            warn!(%sync_target, age_secs = age.as_secs(), threshold_secs = threshold.as_secs(), "syncer heartbeat lost");
        }
        HeartbeatVerdict::Healthy if !was_healthy => {
            info!(%sync_target, "syncer heartbeat healthy");
        }
        _ => {}
    }

    changed
}
