//! Last-observed creator state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live room status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    #[default]
    Offline,
    Online,
}

/// Kind of a published post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    #[default]
    Plain,
    Video,
    Repost,
}

/// The newest post of a creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInfo {
    pub id: String,
    #[serde(default)]
    pub kind: PostKind,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub text: String,
    /// Video title, empty for plain posts.
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

/// State of a creator as of one poll.
///
/// The fetcher fills the observed fields. `live_session_start`,
/// `peak_viewers` and `hourly_ticks` are derived by the change detector and
/// carried across polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Name reported by the platform, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub latest_post: Option<PostInfo>,
    #[serde(default)]
    pub live_status: LiveStatus,
    #[serde(default)]
    pub live_title: String,
    #[serde(default)]
    pub live_url: String,
    /// Current concurrent viewers.
    #[serde(default)]
    pub viewers: u64,
    #[serde(default)]
    pub live_session_start: Option<DateTime<Utc>>,
    /// Highest viewer count seen in the current session; zero while offline.
    #[serde(default)]
    pub peak_viewers: u64,
    /// Last hourly reminder per binding id in the current session.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hourly_ticks: BTreeMap<String, DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub checked_at: DateTime<Utc>,
}

impl Snapshot {
    /// An offline snapshot with no posts.
    pub fn offline(checked_at: DateTime<Utc>) -> Self {
        Self {
            display_name: None,
            latest_post: None,
            live_status: LiveStatus::Offline,
            live_title: String::new(),
            live_url: String::new(),
            viewers: 0,
            live_session_start: None,
            peak_viewers: 0,
            hourly_ticks: BTreeMap::new(),
            checked_at,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live_status == LiveStatus::Online
    }

    pub fn latest_post_id(&self) -> Option<&str> {
        self.latest_post.as_ref().map(|p| p.id.as_str())
    }

    /// Seconds since the session started, if live.
    pub fn live_duration_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        if !self.is_live() {
            return None;
        }
        self.live_session_start
            .map(|start| (now - start).num_seconds().max(0) as u64)
    }
}

/// The stored snapshot, or the explicit "never polled" sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorSnapshot {
    Absent,
    Present(Snapshot),
}

impl PriorSnapshot {
    pub fn as_snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::Absent => None,
            Self::Present(snapshot) => Some(snapshot),
        }
    }
}

impl From<Option<Snapshot>> for PriorSnapshot {
    fn from(value: Option<Snapshot>) -> Self {
        match value {
            Some(snapshot) => Self::Present(snapshot),
            None => Self::Absent,
        }
    }
}
