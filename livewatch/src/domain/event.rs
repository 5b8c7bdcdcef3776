//! Events produced by the change detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use super::snapshot::PostInfo;

/// Event kinds, in the order the detector emits them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    NewPost,
    NewVideoPost,
    LiveStarted,
    LiveHourlyTick,
    LiveEnded,
}

/// An immutable description of what changed in one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    NewPost {
        post: PostInfo,
    },
    NewVideoPost {
        post: PostInfo,
    },
    LiveStarted {
        title: String,
        url: String,
        viewers: u64,
        started_at: DateTime<Utc>,
    },
    /// Only the bindings whose reminder is due are addressed.
    LiveHourlyTick {
        title: String,
        url: String,
        viewers: u64,
        duration_secs: u64,
        peak_viewers: u64,
        bindings: Vec<String>,
    },
    LiveEnded {
        title: String,
        url: String,
        duration_secs: u64,
        peak_viewers: u64,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NewPost { .. } => EventKind::NewPost,
            Self::NewVideoPost { .. } => EventKind::NewVideoPost,
            Self::LiveStarted { .. } => EventKind::LiveStarted,
            Self::LiveHourlyTick { .. } => EventKind::LiveHourlyTick,
            Self::LiveEnded { .. } => EventKind::LiveEnded,
        }
    }

    /// What a screenshot of this event should show.
    pub fn subject(&self, creator_id: &str) -> SubjectRef {
        match self {
            Self::NewPost { post } | Self::NewVideoPost { post } => SubjectRef {
                kind: SubjectKind::Post,
                creator_id: creator_id.to_string(),
                id: post.id.clone(),
                url: post.url.clone(),
            },
            Self::LiveStarted { url, .. }
            | Self::LiveHourlyTick { url, .. }
            | Self::LiveEnded { url, .. } => SubjectRef {
                kind: SubjectKind::LiveRoom,
                creator_id: creator_id.to_string(),
                id: creator_id.to_string(),
                url: url.clone(),
            },
        }
    }

    /// Whether the event should be delivered to `binding_id`.
    pub fn addresses(&self, binding_id: &str) -> bool {
        match self {
            Self::LiveHourlyTick { bindings, .. } => bindings.iter().any(|b| b == binding_id),
            _ => true,
        }
    }

    pub fn is_post(&self) -> bool {
        matches!(self, Self::NewPost { .. } | Self::NewVideoPost { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubjectKind {
    Post,
    LiveRoom,
}

/// Reference handed to the screenshot renderer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub kind: SubjectKind,
    pub creator_id: String,
    pub id: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::NewVideoPost.to_string(), "new_video_post");
        assert_eq!(
            EventKind::from_str("live_hourly_tick").unwrap(),
            EventKind::LiveHourlyTick
        );
        assert_eq!(EventKind::iter().count(), 5);
    }

    #[test]
    fn test_subject_for_live_event() {
        let event = Event::LiveEnded {
            title: "t".to_string(),
            url: "https://live.example/1".to_string(),
            duration_secs: 10,
            peak_viewers: 3,
        };
        let subject = event.subject("c1");
        assert_eq!(subject.kind, SubjectKind::LiveRoom);
        assert_eq!(subject.url, "https://live.example/1");
        assert!(!event.is_post());
        assert!(event.addresses("any"));
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let event = Event::LiveHourlyTick {
            title: "t".to_string(),
            url: String::new(),
            viewers: 120,
            duration_secs: 3600,
            peak_viewers: 150,
            bindings: vec!["b1".to_string()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "live_hourly_tick");
        assert_eq!(json["peak_viewers"], 150);
        assert!(event.addresses("b1"));
        assert!(!event.addresses("b2"));
    }
}
