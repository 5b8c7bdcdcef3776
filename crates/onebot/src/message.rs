//! Message segments and message bodies.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Prefix the implementation expects for inline base64 image payloads.
pub const BASE64_FILE_PREFIX: &str = "base64://";

/// A single OneBot message segment.
///
/// Serialized in the array message format, e.g.
/// `{"type":"text","data":{"text":"hello"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    /// Plain text.
    Text { text: String },
    /// Image; `file` is a URL, a path or a `base64://` payload.
    Image { file: String },
    /// Mention. `qq = "all"` mentions everyone in a group.
    At { qq: String },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Build an image segment carrying the bytes inline.
    pub fn image_bytes(bytes: &[u8]) -> Self {
        Self::Image {
            file: format!("{}{}", BASE64_FILE_PREFIX, STANDARD.encode(bytes)),
        }
    }

    pub fn at_all() -> Self {
        Self::At {
            qq: "all".to_string(),
        }
    }

    /// Whether this segment requires the array message format.
    pub fn is_rich(&self) -> bool {
        !matches!(self, Self::Text { .. })
    }
}

/// The `message` parameter of a send action.
///
/// Text-only messages travel as a plain string; anything carrying an
/// image or a mention travels as a segment array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Segments(Vec<Segment>),
}

impl MessageBody {
    /// Collapse a segment list into the most compact body.
    ///
    /// Returns `None` when there is nothing to send.
    pub fn from_segments(segments: Vec<Segment>) -> Option<Self> {
        let segments: Vec<Segment> = segments
            .into_iter()
            .filter(|s| !matches!(s, Segment::Text { text } if text.is_empty()))
            .collect();

        if segments.is_empty() {
            return None;
        }

        if segments.iter().any(Segment::is_rich) {
            return Some(Self::Segments(segments));
        }

        let text: String = segments
            .into_iter()
            .filter_map(|s| match s {
                Segment::Text { text } => Some(text),
                _ => None,
            })
            .collect();

        if text.is_empty() {
            None
        } else {
            Some(Self::Text(text))
        }
    }

    /// Text content with rich segments shown as short markers, for logs.
    pub fn preview(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Segments(segments) => segments
                .iter()
                .map(|s| match s {
                    Segment::Text { text } => text.as_str(),
                    Segment::Image { .. } => "[image]",
                    Segment::At { .. } => "[at]",
                })
                .collect(),
        }
    }
}
