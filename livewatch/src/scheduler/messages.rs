//! Messages and state of creator actors.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::domain::{Creator, EventKind};

/// Configuration an actor polls with. Replaced wholesale on update and
/// picked up at the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatorConfig {
    pub creator: Creator,
    /// Roster-wide poll interval, used when the creator has no override.
    pub global_interval: Duration,
    /// Roster-wide spacing of hourly live reminders, for bindings without
    /// their own.
    pub hourly_interval: Duration,
}

/// Messages accepted by a creator actor.
#[derive(Debug)]
pub enum CreatorMessage {
    /// Stop the actor gracefully.
    Stop,
    /// Replace the configuration; the next tick uses it.
    ConfigUpdate(CreatorConfig),
    /// Poll immediately instead of waiting for the timer.
    CheckNow,
    /// Report the actor's state.
    GetState(oneshot::Sender<CreatorActorState>),
}

/// Runtime view of one creator actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreatorActorState {
    pub creator_id: String,
    /// Interval used for the most recent scheduling decision.
    pub poll_interval_secs: u64,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub checks: u64,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    /// Events produced by the most recent successful cycle.
    pub last_events: Vec<EventKind>,
}
