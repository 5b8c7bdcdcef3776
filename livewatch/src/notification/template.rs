//! Message templates.
//!
//! A template is plain text with `{placeholder}` tokens and two markers:
//! `{SHOTPICTURE}` embeds the screenshot (dropped when none is available)
//! and `[atALL]` mentions everyone. Unknown `{...}` tokens are kept verbatim.

use std::sync::OnceLock;

use onebot::{MessageBody, Segment};
use regex::{Captures, Regex};

use crate::domain::{Event, EventKind};
use crate::{Error, Result};

pub const SCREENSHOT_MARKER: &str = "{SHOTPICTURE}";
pub const AT_ALL_MARKER: &str = "[atALL]";

/// Longest text accepted by the push endpoint.
pub const MAX_MESSAGE_CHARS: usize = 4500;

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{SHOTPICTURE\}|\[atALL\]").expect("marker pattern is valid"))
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("placeholder pattern is valid"))
}

/// Built-in template for `kind`.
pub fn default_template(kind: EventKind) -> &'static str {
    match kind {
        EventKind::NewPost => "{name} 发布了新动态：{text}\n{SHOTPICTURE}\n{url}",
        EventKind::NewVideoPost => "{name} 投稿了新视频：{title}\n{SHOTPICTURE}\n{url}",
        EventKind::LiveStarted => "{name} 开始直播：{title}\n{SHOTPICTURE}\n{url}",
        EventKind::LiveHourlyTick => {
            "{name} 正在直播：{title}\n时长：{duration}｜人气：{online}｜峰值人气：{max_online}\n{SHOTPICTURE}\n{url}"
        }
        EventKind::LiveEnded => "{name} 直播结束：{title}\n时长：{duration}｜峰值人气：{max_online}\n{url}",
    }
}

/// Compact duration: `1小时2分3秒`, `5分0秒`, `42秒`.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}小时{}分{}秒", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}分{}秒", minutes, seconds)
    } else {
        format!("{}秒", seconds)
    }
}

/// Values substituted into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateValues {
    pub name: String,
    pub text: String,
    pub title: String,
    pub url: String,
    pub online: Option<u64>,
    pub duration_secs: Option<u64>,
    pub max_online: Option<u64>,
}

impl TemplateValues {
    pub fn for_event(name: &str, event: &Event) -> Self {
        let base = Self {
            name: name.to_string(),
            ..Default::default()
        };
        match event {
            Event::NewPost { post } | Event::NewVideoPost { post } => Self {
                text: post.text.clone(),
                title: post.title.clone(),
                url: post.url.clone(),
                ..base
            },
            Event::LiveStarted {
                title, url, viewers, ..
            } => Self {
                title: title.clone(),
                url: url.clone(),
                online: Some(*viewers),
                max_online: Some(*viewers),
                ..base
            },
            Event::LiveHourlyTick {
                title,
                url,
                viewers,
                duration_secs,
                peak_viewers,
                ..
            } => Self {
                title: title.clone(),
                url: url.clone(),
                online: Some(*viewers),
                duration_secs: Some(*duration_secs),
                max_online: Some(*peak_viewers),
                ..base
            },
            Event::LiveEnded {
                title,
                url,
                duration_secs,
                peak_viewers,
            } => Self {
                title: title.clone(),
                url: url.clone(),
                duration_secs: Some(*duration_secs),
                max_online: Some(*peak_viewers),
                ..base
            },
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let value = match key {
            "name" => self.name.clone(),
            "text" => self.text.clone(),
            "title" => self.title.clone(),
            "url" => self.url.clone(),
            "online" => self.online.map(|v| v.to_string()).unwrap_or_default(),
            "duration" => self.duration_secs.map(format_duration).unwrap_or_default(),
            "max_online" => self.max_online.map(|v| v.to_string()).unwrap_or_default(),
            _ => return None,
        };
        Some(value)
    }

    /// Substitute known placeholders; unknown tokens pass through.
    pub fn apply(&self, text: &str) -> String {
        placeholder_regex()
            .replace_all(text, |caps: &Captures<'_>| {
                self.lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Screenshot,
    AtAll,
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut parts = Vec::new();
        let mut last = 0;
        for m in marker_regex().find_iter(source) {
            if m.start() > last {
                parts.push(Part::Text(source[last..m.start()].to_string()));
            }
            parts.push(if m.as_str() == SCREENSHOT_MARKER {
                Part::Screenshot
            } else {
                Part::AtAll
            });
            last = m.end();
        }
        if last < source.len() {
            parts.push(Part::Text(source[last..].to_string()));
        }
        Self { parts }
    }

    /// Whether rendering may embed a screenshot.
    pub fn wants_screenshot(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Screenshot))
    }

    /// Render against `values`. Returns `None` when nothing is left to send.
    pub fn render(
        &self,
        values: &TemplateValues,
        screenshot: Option<&[u8]>,
    ) -> Result<Option<MessageBody>> {
        let mut segments = Vec::with_capacity(self.parts.len());
        let mut text_len = 0;
        for part in &self.parts {
            match part {
                Part::Text(text) => {
                    let text = values.apply(text);
                    text_len += text.chars().count();
                    segments.push(Segment::text(text));
                }
                Part::Screenshot => {
                    if let Some(bytes) = screenshot {
                        segments.push(Segment::image_bytes(bytes));
                    }
                }
                Part::AtAll => segments.push(Segment::at_all()),
            }
        }

        if text_len > MAX_MESSAGE_CHARS {
            return Err(Error::render(format!(
                "rendered text is {} characters, limit is {}",
                text_len, MAX_MESSAGE_CHARS
            )));
        }

        Ok(MessageBody::from_segments(segments))
    }
}
