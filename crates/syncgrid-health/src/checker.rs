//! Heartbeat freshness check.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Reason set on `HeartbeatHealthy=False`.
pub const REASON_ERROR_HEARTBEAT: &str = "ErrorHeartbeat";

/// Result of checking one sync target's last heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// No heartbeat was ever recorded.
    Unknown,
    /// The last heartbeat is within the threshold.
    Healthy,
    /// The last heartbeat is older than the threshold.
    Stale {
        /// Time since the last heartbeat.
        age: Duration,
    },
}

impl HeartbeatVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HeartbeatVerdict::Healthy)
    }
}

/// Check a last-heartbeat timestamp against `threshold` at `now`.
///
/// A heartbeat exactly `threshold` old is still healthy; a timestamp in
/// the future (clock skew) counts as fresh.
pub fn evaluate(
    last_heartbeat: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> HeartbeatVerdict {
    let Some(last) = last_heartbeat else {
        return HeartbeatVerdict::Unknown;
    };
    let age = (now - last).to_std().unwrap_or(Duration::ZERO);
    if age > threshold {
        HeartbeatVerdict::Stale { age }
    } else {
        HeartbeatVerdict::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    const THRESHOLD: Duration = Duration::from_secs(60);

    #[test]
    fn never_seen_is_unknown() {
        assert_eq!(evaluate(None, at(1000), THRESHOLD), HeartbeatVerdict::Unknown);
    }

    #[test]
    fn fresh_heartbeat_is_healthy() {
        assert_eq!(evaluate(Some(at(990)), at(1000), THRESHOLD), HeartbeatVerdict::Healthy);
        // Boundary.
        assert_eq!(evaluate(Some(at(940)), at(1000), THRESHOLD), HeartbeatVerdict::Healthy);
    }

    #[test]
    fn old_heartbeat_is_stale() {
        let verdict = evaluate(Some(at(900)), at(1000), THRESHOLD);
        assert_eq!(verdict, HeartbeatVerdict::Stale { age: Duration::from_secs(100) });
        assert!(!verdict.is_healthy());
    }

    #[test]
    fn future_heartbeat_counts_as_fresh() {
        assert!(evaluate(Some(at(2000)), at(1000), THRESHOLD).is_healthy());
    }
}
