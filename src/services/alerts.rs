//! Periodic alert activation sweep.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::events::{Event, EventBus};
use crate::repository::{AlertRepository, Result};

/// Recompute every alert's active flag against `now` and persist the flips.
///
/// Each flip is published the moment it is persisted, so a failure halfway
/// through leaves earlier flips both stored and announced. Returns the
/// number of alerts that changed state.
pub fn evaluate_alerts(repo: &AlertRepository, events: &EventBus, now: DateTime<Utc>) -> Result<usize> {
    let mut flipped = 0;

    for alert in repo.all()? {
        let should_be_active = alert.should_be_active(now);
        if should_be_active == alert.is_active {
            continue;
        }

        repo.set_active(alert.id, should_be_active)?;
        let mut updated = alert.clone();
        updated.is_active = should_be_active;
        events.publish(Event::AlertUpdate(serde_json::to_value(&updated)?));

        info!(
            id = alert.id,
            active = should_be_active,
            "alert activation changed"
        );
        flipped += 1;
    }

    if flipped == 0 {
        debug!("alert evaluation pass: no changes");
    }
    Ok(flipped)
}
