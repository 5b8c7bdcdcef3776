//! Poll interval resolution.

use std::time::Duration;

use crate::domain::{Creator, EventKind};
use crate::monitor::HourlyCadence;

/// Smallest accepted spacing of hourly live reminders.
pub const MIN_HOURLY_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Interval to wait before the creator's next poll. Recomputed at every
/// tick so roster changes apply without a restart.
pub fn effective_interval(creator: &Creator, global_default: Duration) -> Duration {
    creator
        .poll_interval_override()
        .unwrap_or(global_default)
        .max(Duration::from_secs(1))
}

/// Hourly reminder spacing from a minute count, clamped to the minimum.
pub fn hourly_interval(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60)).max(MIN_HOURLY_INTERVAL)
}

/// Reminder spacing for every enabled binding subscribed to hourly live
/// reminders. A binding's own minute count overrides `default`; both are
/// clamped to [`MIN_HOURLY_INTERVAL`].
pub fn hourly_cadences(creator: &Creator, default: Duration) -> Vec<HourlyCadence> {
    creator
        .enabled_bindings()
        .filter(|b| b.template_kind_for(EventKind::LiveHourlyTick).is_some())
        .map(|b| {
            let interval = b
                .live_hourly_override()
                .map(hourly_interval)
                .unwrap_or(default)
                .max(MIN_HOURLY_INTERVAL);
            HourlyCadence::new(b.id.clone(), interval)
        })
        .collect()
}
