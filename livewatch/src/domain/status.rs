//! Status records written back for the administration surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use super::snapshot::{PostKind, Snapshot};
use crate::notification::format_duration;

/// Runtime status of one creator, refreshed after every poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorStatus {
    pub creator_id: String,
    pub name: String,
    pub live: bool,
    pub live_title: String,
    pub live_online: Option<u64>,
    pub live_duration: String,
    pub live_url: String,
    pub last_post_id: Option<String>,
    pub last_post_kind: Option<PostKind>,
    pub last_post_text: Option<String>,
    pub last_post_title: Option<String>,
    pub last_post_url: Option<String>,
    pub last_post_time: Option<DateTime<Utc>>,
    pub poll_interval_secs: u64,
    pub next_poll_at: DateTime<Utc>,
    pub checked_at: DateTime<Utc>,
    /// Error of the most recent cycle, cleared on success.
    pub last_error: Option<String>,
}

impl CreatorStatus {
    /// Status derived from a snapshot. `snapshot` may be absent when the
    /// first poll failed.
    pub fn from_snapshot(
        creator_id: &str,
        name: String,
        snapshot: Option<&Snapshot>,
        poll_interval_secs: u64,
        next_poll_at: DateTime<Utc>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let live = snapshot.is_some_and(Snapshot::is_live);
        let post = snapshot.and_then(|s| s.latest_post.as_ref());
        Self {
            creator_id: creator_id.to_string(),
            name,
            live,
            live_title: snapshot
                .filter(|s| s.is_live())
                .map(|s| s.live_title.clone())
                .unwrap_or_default(),
            live_online: snapshot.filter(|s| s.is_live()).map(|s| s.viewers),
            live_duration: snapshot
                .and_then(|s| s.live_duration_secs(checked_at))
                .map(format_duration)
                .unwrap_or_default(),
            live_url: snapshot
                .filter(|s| s.is_live())
                .map(|s| s.live_url.clone())
                .unwrap_or_default(),
            last_post_id: post.map(|p| p.id.clone()),
            last_post_kind: post.map(|p| p.kind),
            last_post_text: post.map(|p| p.text.clone()),
            last_post_title: post.map(|p| p.title.clone()),
            last_post_url: post.map(|p| p.url.clone()),
            last_post_time: post.and_then(|p| p.published_at),
            poll_interval_secs,
            next_poll_at,
            checked_at,
            last_error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// Connection lifecycle of a binding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Configuration is broken; no connection will be attempted.
    Unusable,
}

/// Result of delivering one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeliveryResult {
    /// The endpoint acknowledged the action.
    Acknowledged,
    /// The endpoint answered with a failure.
    Rejected { reason: String },
    /// No answer within the acknowledgment window.
    AckTimeout,
    /// The connection closed before an answer arrived.
    ConnectionLost { reason: String },
    /// Writing the frame failed; the message went back to the queue.
    SendFailed { reason: String },
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }

    /// Whether the message will be sent again after reconnecting.
    pub fn retry_eligible(&self) -> bool {
        matches!(self, Self::SendFailed { .. })
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Acknowledged => None,
            Self::Rejected { reason } => Some(format!("rejected: {}", reason)),
            Self::AckTimeout => Some("acknowledgment timed out".to_string()),
            Self::ConnectionLost { reason } => Some(format!("connection lost: {}", reason)),
            Self::SendFailed { reason } => Some(format!("send failed: {}", reason)),
        }
    }
}

/// Outcome of sending one rendered message to one binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub echo: String,
    pub attempted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: DeliveryResult,
}

/// Delivery status of one binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingStatus {
    pub binding_id: String,
    pub creator_id: String,
    pub connection: ConnectionState,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub queued: usize,
    pub dropped_total: u64,
    pub last_attempt: Option<DeliveryAttempt>,
    pub updated_at: DateTime<Utc>,
}

impl BindingStatus {
    pub fn new(binding_id: impl Into<String>, creator_id: impl Into<String>) -> Self {
        Self {
            binding_id: binding_id.into(),
            creator_id: creator_id.into(),
            connection: ConnectionState::Disconnected,
            last_success_at: None,
            last_failure_at: None,
            last_error: None,
            queued: 0,
            dropped_total: 0,
            last_attempt: None,
            updated_at: Utc::now(),
        }
    }

    /// Fold a delivery attempt into the status.
    pub fn record_attempt(&mut self, attempt: DeliveryAttempt) {
        if attempt.result.is_success() {
            self.last_success_at = Some(attempt.attempted_at);
        } else {
            self.last_failure_at = Some(attempt.attempted_at);
            self.last_error = attempt.result.error_message();
        }
        self.updated_at = Utc::now();
        self.last_attempt = Some(attempt);
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.last_failure_at = Some(now);
        self.last_error = Some(error.into());
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LiveStatus;
    use chrono::TimeDelta;

    #[test]
    fn test_status_from_live_snapshot() {
        let now = Utc::now();
        let mut snapshot = Snapshot::offline(now);
        snapshot.live_status = LiveStatus::Online;
        snapshot.live_title = "Playing".to_string();
        snapshot.viewers = 12;
        snapshot.live_session_start = Some(now - TimeDelta::seconds(65));

        let status = CreatorStatus::from_snapshot("c", "Name".to_string(), Some(&snapshot), 30, now, now);
        assert!(status.live);
        assert_eq!(status.live_online, Some(12));
        assert_eq!(status.live_duration, "1分5秒");
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_status_without_snapshot() {
        let now = Utc::now();
        let status = CreatorStatus::from_snapshot("c", "N".to_string(), None, 30, now, now)
            .with_error("boom");
        assert!(!status.live);
        assert_eq!(status.live_online, None);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_record_attempt() {
        let mut status = BindingStatus::new("b", "c");
        status.record_attempt(DeliveryAttempt {
            echo: "e1".to_string(),
            attempted_at: Utc::now(),
            result: DeliveryResult::AckTimeout,
        });
        assert!(status.last_failure_at.is_some());
        assert_eq!(status.last_error.as_deref(), Some("acknowledgment timed out"));
        assert!(status.last_success_at.is_none());

        status.record_attempt(DeliveryAttempt {
            echo: "e2".to_string(),
            attempted_at: Utc::now(),
            result: DeliveryResult::Acknowledged,
        });
        assert!(status.last_success_at.is_some());
    }

    #[test]
    fn test_attempt_wire_format() {
        let attempt = DeliveryAttempt {
            echo: "e".to_string(),
            attempted_at: Utc::now(),
            result: DeliveryResult::Rejected {
                reason: "retcode 100".to_string(),
            },
        };
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["result"], "rejected");
        assert_eq!(json["reason"], "retcode 100");
    }
}
