//! Creator and binding configuration.
//!
//! These types are owned by the administration surface; the engine only
//! reads them.

use std::time::Duration;

use onebot::{Endpoint, Target, TargetType};
use serde::{Deserialize, Serialize};

use super::event::EventKind;
use crate::{Error, Result};

fn default_true() -> bool {
    true
}

/// A monitored account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    /// Platform user id.
    pub id: String,
    /// Display name. Empty means "use the fetched name".
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-creator poll interval; `None` or non-positive falls back to the global default.
    #[serde(default)]
    pub poll_interval_secs: Option<i64>,
    /// Opaque credential forwarded to the platform client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

impl Creator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            poll_interval_secs: None,
            credential: None,
            bindings: Vec::new(),
        }
    }

    /// The configured override, if it is usable.
    pub fn poll_interval_override(&self) -> Option<Duration> {
        self.poll_interval_secs
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64))
    }

    /// Name used in rendered messages.
    pub fn display_name(&self, fetched: Option<&str>) -> String {
        let configured = self.name.trim();
        if !configured.is_empty() {
            return configured.to_string();
        }
        match fetched.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => format!("UID {}", self.id),
        }
    }

    pub fn enabled_bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(|b| b.enabled)
    }
}

/// A shared push endpoint that several bindings can reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Where a binding connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointRef {
    /// Reference to an [`EndpointProfile`] by id.
    Profile { profile: String },
    /// Endpoint configured directly on the binding.
    Inline {
        url: String,
        #[serde(default)]
        access_token: Option<String>,
    },
}

/// Recipient of a binding's messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingTarget {
    #[serde(rename = "type", default)]
    pub kind: TargetType,
    pub id: String,
}

/// Which event kinds a binding is notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyKinds {
    pub post: bool,
    pub video: bool,
    pub live_start: bool,
    pub live_hourly: bool,
    pub live_end: bool,
}

impl Default for NotifyKinds {
    fn default() -> Self {
        Self {
            post: true,
            video: true,
            live_start: true,
            live_hourly: true,
            live_end: true,
        }
    }
}

/// Per-kind template overrides. Empty strings mean "use the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateOverrides {
    pub post: Option<String>,
    pub video: Option<String>,
    pub live_start: Option<String>,
    pub live_hourly: Option<String>,
    pub live_end: Option<String>,
}

impl TemplateOverrides {
    pub fn get(&self, kind: EventKind) -> Option<&str> {
        let value = match kind {
            EventKind::NewPost => &self.post,
            EventKind::NewVideoPost => &self.video,
            EventKind::LiveStarted => &self.live_start,
            EventKind::LiveHourlyTick => &self.live_hourly,
            EventKind::LiveEnded => &self.live_end,
        };
        value.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// One push destination for a creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub endpoint: EndpointRef,
    pub target: BindingTarget,
    #[serde(default)]
    pub notify: NotifyKinds,
    /// Whether `{SHOTPICTURE}` may request a screenshot.
    #[serde(default = "default_true")]
    pub screenshot: bool,
    /// Spacing of hourly live reminders in minutes; `None` or non-positive
    /// uses the roster-wide value.
    #[serde(default)]
    pub live_hourly_minutes: Option<i64>,
    #[serde(default)]
    pub templates: TemplateOverrides,
}

impl Binding {
    /// Template kind used to render `kind` for this binding, or `None` when
    /// the binding is not subscribed.
    ///
    /// Video posts fall back to the plain post template when only plain
    /// posts are enabled.
    pub fn template_kind_for(&self, kind: EventKind) -> Option<EventKind> {
        let n = &self.notify;
        match kind {
            EventKind::NewPost if n.post => Some(EventKind::NewPost),
            EventKind::NewVideoPost if n.video => Some(EventKind::NewVideoPost),
            EventKind::NewVideoPost if n.post => Some(EventKind::NewPost),
            EventKind::LiveStarted if n.live_start => Some(kind),
            EventKind::LiveHourlyTick if n.live_hourly => Some(kind),
            EventKind::LiveEnded if n.live_end => Some(kind),
            _ => None,
        }
    }

    /// Resolve the endpoint against the shared profiles.
    pub fn resolve_endpoint(&self, profiles: &[EndpointProfile]) -> Result<Endpoint> {
        match &self.endpoint {
            EndpointRef::Inline { url, access_token } => {
                Ok(Endpoint::parse(url, access_token.as_deref())?)
            }
            EndpointRef::Profile { profile } => {
                let found = profiles.iter().find(|p| &p.id == profile).ok_or_else(|| {
                    Error::config(format!(
                        "binding {} references unknown endpoint profile '{}'",
                        self.id, profile
                    ))
                })?;
                Ok(Endpoint::parse(&found.url, found.access_token.as_deref())?)
            }
        }
    }

    /// The configured reminder spacing, if it is usable. Not yet clamped.
    pub fn live_hourly_override(&self) -> Option<u64> {
        self.live_hourly_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| minutes as u64)
    }

    pub fn resolve_target(&self) -> Result<Target> {
        Ok(Target::parse(self.target.kind, &self.target.id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(notify: NotifyKinds) -> Binding {
        Binding {
            id: "b1".to_string(),
            name: String::new(),
            enabled: true,
            endpoint: EndpointRef::Inline {
                url: "ws://127.0.0.1:3001".to_string(),
                access_token: None,
            },
            target: BindingTarget {
                kind: TargetType::Group,
                id: "100".to_string(),
            },
            notify,
            screenshot: true,
            live_hourly_minutes: None,
            templates: TemplateOverrides::default(),
        }
    }

    #[test]
    fn test_poll_interval_override() {
        let mut creator = Creator::new("1", "a");
        assert_eq!(creator.poll_interval_override(), None);
        creator.poll_interval_secs = Some(0);
        assert_eq!(creator.poll_interval_override(), None);
        creator.poll_interval_secs = Some(-5);
        assert_eq!(creator.poll_interval_override(), None);
        creator.poll_interval_secs = Some(45);
        assert_eq!(
            creator.poll_interval_override(),
            Some(Duration::from_secs(45))
        );
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut creator = Creator::new("42", "");
        assert_eq!(creator.display_name(None), "UID 42");
        assert_eq!(creator.display_name(Some("Fetched")), "Fetched");
        creator.name = "Configured".to_string();
        assert_eq!(creator.display_name(Some("Fetched")), "Configured");
    }

    #[test]
    fn test_video_falls_back_to_post_template() {
        let b = binding(NotifyKinds {
            video: false,
            ..Default::default()
        });
        assert_eq!(
            b.template_kind_for(EventKind::NewVideoPost),
            Some(EventKind::NewPost)
        );

        let b = binding(NotifyKinds::default());
        assert_eq!(
            b.template_kind_for(EventKind::NewVideoPost),
            Some(EventKind::NewVideoPost)
        );

        let b = binding(NotifyKinds {
            video: false,
            post: false,
            ..Default::default()
        });
        assert_eq!(b.template_kind_for(EventKind::NewVideoPost), None);
    }

    #[test]
    fn test_disabled_kinds_are_filtered() {
        let b = binding(NotifyKinds {
            live_hourly: false,
            ..Default::default()
        });
        assert_eq!(b.template_kind_for(EventKind::LiveHourlyTick), None);
        assert_eq!(
            b.template_kind_for(EventKind::LiveEnded),
            Some(EventKind::LiveEnded)
        );
    }

    #[test]
    fn test_resolve_endpoint_from_profile() {
        let mut b = binding(NotifyKinds::default());
        b.endpoint = EndpointRef::Profile {
            profile: "main".to_string(),
        };
        let profiles = vec![EndpointProfile {
            id: "main".to_string(),
            name: "Main bot".to_string(),
            url: "ws://bot:6700".to_string(),
            access_token: Some("t".to_string()),
        }];

        let endpoint = b.resolve_endpoint(&profiles).unwrap();
        assert_eq!(endpoint.access_token(), Some("t"));

        assert!(matches!(
            b.resolve_endpoint(&[]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_binding_deserializes_with_defaults() {
        let json = r#"{
            "id": "b9",
            "endpoint": {"url": "ws://h:1", "access_token": "x"},
            "target": {"type": "private", "id": "77"}
        }"#;
        let b: Binding = serde_json::from_str(json).unwrap();
        assert!(b.enabled);
        assert!(b.screenshot);
        assert_eq!(b.notify, NotifyKinds::default());
        assert_eq!(b.live_hourly_override(), None);
        assert_eq!(b.resolve_target().unwrap(), Target::Private(77));
    }
}
