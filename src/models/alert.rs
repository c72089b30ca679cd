//! Time-bounded broadcast alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A broadcast alert shown on the dashboard while active.
///
/// Alert creation belongs to the web layer; this crate owns the activation
/// state machine (the scheduler flips `is_active` on a fixed cadence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub message: String,
    /// When the alert becomes active. Defaults to `created_at` when unset.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Start of the active window; creation time when no explicit start was set.
    pub fn effective_start(&self) -> DateTime<Utc> {
        self.start_time.unwrap_or(self.created_at)
    }

    /// Whether the alert should be active at `now` (bounds inclusive).
    pub fn should_be_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_start() <= now && now <= self.end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn alert(start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> Alert {
        Alert {
            id: 1,
            message: "maintenance window".to_string(),
            start_time: start,
            end_time: end,
            is_active: false,
            created_at: Utc::now() - Duration::hours(1),
        }
    }

    #[test]
    fn bounds_are_inclusive() {
        let now = Utc::now();
        let a = alert(Some(now), now);
        assert!(a.should_be_active(now));
        assert!(!a.should_be_active(now + Duration::seconds(1)));
    }

    #[test]
    fn missing_start_falls_back_to_creation_time() {
        let now = Utc::now();
        let a = alert(None, now + Duration::hours(1));
        // created_at is an hour ago, so the alert is already active.
        assert!(a.should_be_active(now));
        assert_eq!(a.effective_start(), a.created_at);
    }
}
