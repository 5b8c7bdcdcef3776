//! Wires the scheduler, notifier and dispatcher into one running engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::config::{AppConfig, Roster};
use crate::dispatcher::{Dispatcher, ReconcileReport};
use crate::fetcher::{Fetcher, HttpPlatformClient, PlatformClient};
use crate::logging::report_error;
use crate::notification::{HttpScreenshotRenderer, MessageSink, Notifier, ScreenshotRenderer};
use crate::scheduler::{CycleContext, ScheduleReport, Scheduler};
use crate::store::{StateStore, StatusSink};
use crate::{Error, Result};

/// Outcome of applying one roster.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub bindings: ReconcileReport,
    pub creators: ScheduleReport,
}

/// The monitoring engine.
pub struct WatchService {
    scheduler: Scheduler,
    dispatcher: Arc<Dispatcher>,
    cancellation_token: CancellationToken,
}

impl WatchService {
    pub fn new(
        config: &AppConfig,
        client: Arc<dyn PlatformClient>,
        renderer: Option<Arc<dyn ScreenshotRenderer>>,
        state_store: Arc<dyn StateStore>,
        status_sink: Arc<dyn StatusSink>,
    ) -> Self {
        let cancellation_token = CancellationToken::new();

        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher(),
            status_sink.clone(),
            cancellation_token.child_token(),
        ));

        let sink: Arc<dyn MessageSink> = dispatcher.clone();
        let mut notifier = Notifier::new(sink, config.screenshot_timeout);
        if let Some(renderer) = renderer {
            notifier = notifier.with_renderer(renderer);
        }

        let context = CycleContext {
            fetcher: Fetcher::new(client, config.fetch_timeout),
            notifier: Arc::new(notifier),
            state_store,
            status_sink,
        };
        let scheduler = Scheduler::new(
            config.scheduler(),
            context,
            cancellation_token.child_token(),
        );

        Self {
            scheduler,
            dispatcher,
            cancellation_token,
        }
    }

    /// Build the service with the HTTP platform bridge and, when configured,
    /// the HTTP screenshot renderer.
    pub fn from_config(
        config: &AppConfig,
        state_store: Arc<dyn StateStore>,
        status_sink: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        let platform_url = config
            .platform_url
            .as_deref()
            .ok_or_else(|| Error::config("LIVEWATCH_PLATFORM_URL is not set"))?;
        let platform_url = Url::parse(platform_url)
            .map_err(|e| Error::config(format!("invalid platform url '{}': {}", platform_url, e)))?;
        let client = HttpPlatformClient::new(platform_url, config.fetch_timeout)?;

        let renderer = match config.screenshot_url.as_deref() {
            Some(url) => {
                let url = Url::parse(url)
                    .map_err(|e| Error::config(format!("invalid screenshot url '{}': {}", url, e)))?;
                Some(Arc::new(HttpScreenshotRenderer::new(url)?) as Arc<dyn ScreenshotRenderer>)
            }
            None => {
                info!("No screenshot renderer configured, messages will be text-only");
                None
            }
        };

        Ok(Self::new(
            config,
            Arc::new(client),
            renderer,
            state_store,
            status_sink,
        ))
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Apply a roster. An invalid roster is rejected as a whole and the
    /// running configuration is kept.
    ///
    /// Bindings are reconciled before creators so that the first events of
    /// a new creator find their bindings running.
    pub async fn apply_roster(&self, roster: &Roster) -> Result<ApplyReport> {
        roster.validate()?;
        let bindings = self.dispatcher.reconcile(roster.binding_specs()).await;
        let creators = self.scheduler.apply_roster(roster);
        Ok(ApplyReport { bindings, creators })
    }

    /// Re-read the roster file and apply it.
    pub async fn reload(&self, path: &Path) -> Result<ApplyReport> {
        let roster = Roster::load(path).await?;
        self.apply_roster(&roster).await
    }

    /// Re-apply the roster file every `period` until shutdown. Failures are
    /// reported and the previous roster stays in effect.
    pub fn spawn_roster_reload(self: &Arc<Self>, path: PathBuf, period: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let cancel = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Roster reload task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(period) => {
                        if let Err(e) = service.reload(&path).await {
                            report_error(&e, None, None, "Roster reload failed, keeping previous roster");
                        }
                    }
                }
            }
        })
    }

    /// Cancel every actor and wait for them. Creators stop first so no new
    /// messages reach the dispatcher while it drains.
    pub async fn shutdown(&self) {
        info!("Shutting down watch service");
        self.cancellation_token.cancel();
        self.scheduler.shutdown().await;
        self.dispatcher.shutdown().await;
        info!("Watch service stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
