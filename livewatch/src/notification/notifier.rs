//! Renders events per binding and hands the messages to the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::screenshot::{self, ScreenshotRenderer};
use super::template::{Template, TemplateValues, default_template};
use crate::Result;
use crate::dispatcher::OutboundMessage;
use crate::domain::{Creator, Event};
use crate::logging::report_error;

/// Receiver of rendered messages, safe for concurrent senders.
pub trait MessageSink: Send + Sync + 'static {
    fn submit(&self, binding_id: &str, message: OutboundMessage) -> Result<()>;
}

/// Per-event fan-out counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Messages handed to the sink.
    pub submitted: usize,
    /// Bindings not subscribed or not addressed, or whose message rendered
    /// empty.
    pub skipped: usize,
    /// Bindings whose render or hand-off failed.
    pub failed: usize,
}

pub struct Notifier {
    sink: Arc<dyn MessageSink>,
    renderer: Option<Arc<dyn ScreenshotRenderer>>,
    screenshot_timeout: Duration,
}

impl Notifier {
    pub fn new(sink: Arc<dyn MessageSink>, screenshot_timeout: Duration) -> Self {
        Self {
            sink,
            renderer: None,
            screenshot_timeout,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ScreenshotRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Fan `event` out to every enabled binding of `creator` subscribed to it.
    ///
    /// A failing binding never prevents delivery to the others.
    pub async fn notify(&self, creator: &Creator, name: &str, event: &Event) -> NotifyOutcome {
        let mut outcome = NotifyOutcome::default();
        let values = TemplateValues::for_event(name, event);
        // Rendered at most once per event and shared by all bindings.
        let mut shot: Option<Option<Vec<u8>>> = None;

        for binding in creator.enabled_bindings() {
            if !event.addresses(&binding.id) {
                outcome.skipped += 1;
                continue;
            }
            let Some(kind) = binding.template_kind_for(event.kind()) else {
                outcome.skipped += 1;
                continue;
            };

            let source = binding
                .templates
                .get(kind)
                .unwrap_or_else(|| default_template(kind));
            let template = Template::parse(source);

            let image = if binding.screenshot && template.wants_screenshot() {
                if shot.is_none() {
                    shot = Some(self.screenshot(creator, event).await);
                }
                shot.as_ref().and_then(|s| s.as_deref())
            } else {
                None
            };

            let body = match template.render(&values, image) {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!(
                        creator_id = %creator.id,
                        binding_id = %binding.id,
                        "Rendered message is empty, not sending"
                    );
                    outcome.skipped += 1;
                    continue;
                }
                Err(e) => {
                    report_error(&e, Some(&creator.id), Some(&binding.id), "Failed to render message");
                    outcome.failed += 1;
                    continue;
                }
            };

            match self
                .sink
                .submit(&binding.id, OutboundMessage::new(body, Some(event.kind())))
            {
                Ok(()) => outcome.submitted += 1,
                Err(e) => {
                    report_error(&e, Some(&creator.id), Some(&binding.id), "Failed to queue message");
                    outcome.failed += 1;
                }
            }
        }

        if outcome.submitted > 0 {
            info!(
                creator_id = %creator.id,
                kind = %event.kind(),
                submitted = outcome.submitted,
                "Notification queued"
            );
        }
        outcome
    }

    async fn screenshot(&self, creator: &Creator, event: &Event) -> Option<Vec<u8>> {
        let renderer = self.renderer.as_ref()?;
        let subject = event.subject(&creator.id);
        match screenshot::capture(renderer.as_ref(), &subject, self.screenshot_timeout).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                report_error(&e, Some(&creator.id), None, "Screenshot unavailable, sending text only");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Binding, BindingTarget, EndpointRef, NotifyKinds, PostInfo, PostKind, SubjectRef,
        TemplateOverrides,
    };
    use crate::Error;
    use async_trait::async_trait;
    use onebot::{MessageBody, TargetType};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, MessageBody)>>,
        reject: Option<String>,
    }

    impl MessageSink for RecordingSink {
        fn submit(&self, binding_id: &str, message: OutboundMessage) -> Result<()> {
            if self.reject.as_deref() == Some(binding_id) {
                return Err(Error::config("binding unusable"));
            }
            self.sent
                .lock()
                .push((binding_id.to_string(), message.body));
            Ok(())
        }
    }

    struct CountingRenderer(AtomicUsize);

    #[async_trait]
    impl ScreenshotRenderer for CountingRenderer {
        async fn render(&self, _subject: &SubjectRef) -> Result<Vec<u8>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(b"img".to_vec())
        }
    }

    fn binding(id: &str, notify: NotifyKinds, screenshot: bool) -> Binding {
        Binding {
            id: id.to_string(),
            name: String::new(),
            enabled: true,
            endpoint: EndpointRef::Inline {
                url: "ws://127.0.0.1:1".to_string(),
                access_token: None,
            },
            target: BindingTarget {
                kind: TargetType::Group,
                id: "1".to_string(),
            },
            notify,
            screenshot,
            live_hourly_minutes: None,
            templates: TemplateOverrides::default(),
        }
    }

    /// Never finishes a render.
    struct StalledRenderer;

    #[async_trait]
    impl ScreenshotRenderer for StalledRenderer {
        async fn render(&self, _subject: &SubjectRef) -> Result<Vec<u8>> {
            std::future::pending::<Result<Vec<u8>>>().await
        }
    }

    fn video_event() -> Event {
        Event::NewVideoPost {
            post: PostInfo {
                id: "101".to_string(),
                kind: PostKind::Video,
                published_at: None,
                text: String::new(),
                title: "My video".to_string(),
                url: "https://v/101".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_fan_out_respects_kinds_and_isolation() {
        let sink = Arc::new(RecordingSink {
            reject: Some("broken".to_string()),
            ..Default::default()
        });
        let renderer = Arc::new(CountingRenderer(AtomicUsize::new(0)));
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(2))
            .with_renderer(renderer.clone());

        let mut creator = Creator::new("c1", "Alice");
        creator.bindings = vec![
            binding("with-shot", NotifyKinds::default(), true),
            binding("text-only", NotifyKinds::default(), false),
            binding(
                "no-video",
                NotifyKinds {
                    video: false,
                    post: false,
                    ..Default::default()
                },
                true,
            ),
            binding("broken", NotifyKinds::default(), true),
        ];
        let mut disabled = binding("disabled", NotifyKinds::default(), true);
        disabled.enabled = false;
        creator.bindings.push(disabled);

        let outcome = notifier.notify(&creator, "Alice", &video_event()).await;
        assert_eq!(
            outcome,
            NotifyOutcome {
                submitted: 2,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(renderer.0.load(Ordering::SeqCst), 1);

        let sent = sink.sent.lock();
        assert_eq!(sent[0].0, "with-shot");
        assert!(matches!(sent[0].1, MessageBody::Segments(_)));
        assert_eq!(
            sent[1].1,
            MessageBody::Text("Alice 投稿了新视频：My video\n\nhttps://v/101".to_string())
        );
    }

    #[tokio::test]
    async fn test_custom_template_without_marker_skips_screenshot() {
        let sink = Arc::new(RecordingSink::default());
        let renderer = Arc::new(CountingRenderer(AtomicUsize::new(0)));
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(2))
            .with_renderer(renderer.clone());

        let mut b = binding("b", NotifyKinds::default(), true);
        b.templates.video = Some("[atALL] {title}".to_string());
        let mut creator = Creator::new("c1", "");
        creator.bindings.push(b);

        let outcome = notifier.notify(&creator, "UID c1", &video_event()).await;
        assert_eq!(outcome.submitted, 1);
        assert_eq!(renderer.0.load(Ordering::SeqCst), 0);
        assert_eq!(sink.sent.lock()[0].1.preview(), "[at] My video");
    }

    #[tokio::test(start_paused = true)]
    async fn test_screenshot_timeout_sends_text_only() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), Duration::from_millis(50))
            .with_renderer(Arc::new(StalledRenderer));

        let mut creator = Creator::new("c1", "Alice");
        creator
            .bindings
            .push(binding("with-shot", NotifyKinds::default(), true));

        let outcome = notifier.notify(&creator, "Alice", &video_event()).await;
        assert_eq!(outcome.submitted, 1);
        assert_eq!(
            sink.sent.lock()[0].1,
            MessageBody::Text("Alice 投稿了新视频：My video\n\nhttps://v/101".to_string())
        );
    }

    #[tokio::test]
    async fn test_hourly_tick_reaches_only_due_bindings() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(2));

        let mut creator = Creator::new("c1", "Alice");
        creator.bindings = vec![
            binding("due", NotifyKinds::default(), false),
            binding("waiting", NotifyKinds::default(), false),
        ];
        let event = Event::LiveHourlyTick {
            title: "Stream".to_string(),
            url: "https://live/1".to_string(),
            viewers: 120,
            duration_secs: 5400,
            peak_viewers: 150,
            bindings: vec!["due".to_string()],
        };

        let outcome = notifier.notify(&creator, "Alice", &event).await;
        assert_eq!(outcome.submitted, 1);
        assert_eq!(outcome.skipped, 1);

        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "due");
        assert!(sent[0].1.preview().contains("峰值人气：150"));
    }
}
