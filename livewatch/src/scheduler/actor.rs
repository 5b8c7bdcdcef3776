//! Self-scheduling actor for one creator.
//!
//! Each tick runs one poll cycle: fetch, detect, notify, persist. The
//! snapshot of a creator is only ever written by its own actor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::interval::{effective_interval, hourly_cadences};
use super::messages::{CreatorActorState, CreatorConfig, CreatorMessage};
use crate::actor::{ActorError, ActorOutcome, ActorResult};
use crate::domain::{CreatorStatus, PriorSnapshot};
use crate::fetcher::Fetcher;
use crate::logging::report_error;
use crate::monitor::detect;
use crate::notification::Notifier;
use crate::store::{StateStore, StatusSink};

/// Collaborators shared by every creator actor.
#[derive(Clone)]
pub struct CycleContext {
    pub fetcher: Fetcher,
    pub notifier: Arc<Notifier>,
    pub state_store: Arc<dyn StateStore>,
    pub status_sink: Arc<dyn StatusSink>,
}

/// Creator ids in the current roster, each with a lock shared by every
/// actor ever spawned for that id. Stored-state writes and the removal purge
/// hold the lock, so an outgoing actor never clobbers its successor.
#[derive(Clone, Default)]
pub struct CreatorSlots {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

struct Slot {
    registered: bool,
    lock: Arc<AsyncMutex<()>>,
}

impl CreatorSlots {
    /// Mark `id` as configured and return its state lock.
    pub fn register(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(id.to_string()).or_insert_with(|| Slot {
            registered: true,
            lock: Arc::default(),
        });
        slot.registered = true;
        slot.lock.clone()
    }

    pub fn unregister(&self, id: &str) {
        if let Some(slot) = self.slots.lock().get_mut(id) {
            slot.registered = false;
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.slots.lock().get(id).is_some_and(|slot| slot.registered)
    }

    /// Forget an unregistered id once no actor holds its lock any more.
    pub fn release(&self, id: &str) {
        let mut slots = self.slots.lock();
        if slots
            .get(id)
            .is_some_and(|slot| !slot.registered && Arc::strong_count(&slot.lock) == 1)
        {
            slots.remove(id);
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    Completed,
    Failed,
    /// The actor was cancelled mid-cycle; nothing was persisted.
    Discarded,
}

pub struct CreatorActor {
    id: String,
    config: CreatorConfig,
    mailbox: mpsc::Receiver<CreatorMessage>,
    context: CycleContext,
    state: CreatorActorState,
    next_check: Instant,
    slots: CreatorSlots,
    state_lock: Arc<AsyncMutex<()>>,
    cancellation_token: CancellationToken,
    /// Cancelled when the whole scheduler stops. A cancellation of the
    /// actor alone means the creator was removed.
    shutdown_token: CancellationToken,
}

impl CreatorActor {
    pub fn new(
        config: CreatorConfig,
        mailbox: mpsc::Receiver<CreatorMessage>,
        context: CycleContext,
        slots: CreatorSlots,
        cancellation_token: CancellationToken,
        shutdown_token: CancellationToken,
    ) -> Self {
        let id = config.creator.id.clone();
        let state_lock = slots.register(&id);
        Self {
            state: CreatorActorState {
                creator_id: id.clone(),
                ..Default::default()
            },
            id,
            config,
            mailbox,
            context,
            next_check: Instant::now(),
            slots,
            state_lock,
            cancellation_token,
            shutdown_token,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self), fields(creator_id = %self.id))]
    pub async fn run(mut self) -> ActorResult {
        info!("CreatorActor {} starting", self.id);

        loop {
            let check_timer =
                Self::create_check_timer(self.next_check.saturating_duration_since(Instant::now()));

            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    return self.on_cancelled().await;
                }

                msg = self.mailbox.recv() => {
                    let Some(msg) = msg else {
                        debug!("CreatorActor {} mailbox closed", self.id);
                        break;
                    };
                    if self.handle_message(msg)? {
                        debug!("CreatorActor {} received stop signal", self.id);
                        break;
                    }
                }

                _ = check_timer => {
                    if self.run_cycle().await == Cycle::Discarded {
                        return self.on_cancelled().await;
                    }
                }
            }
        }

        info!("CreatorActor {} stopped gracefully", self.id);
        Ok(ActorOutcome::Stopped)
    }

    async fn create_check_timer(duration: Duration) {
        if duration.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(duration).await;
        }
    }

    fn handle_message(&mut self, msg: CreatorMessage) -> Result<bool, ActorError> {
        match msg {
            CreatorMessage::Stop => return Ok(true),
            CreatorMessage::ConfigUpdate(config) => {
                if config.creator.id != self.id {
                    return Err(ActorError::new(format!(
                        "config for {} routed to actor {}",
                        config.creator.id, self.id
                    )));
                }
                let old = std::mem::replace(&mut self.config, config);
                if old.creator.poll_interval_secs != self.config.creator.poll_interval_secs
                    || old.global_interval != self.config.global_interval
                {
                    info!(
                        "CreatorActor {} poll interval changed: {:?} -> {:?}",
                        self.id,
                        effective_interval(&old.creator, old.global_interval),
                        effective_interval(&self.config.creator, self.config.global_interval)
                    );
                }
                if old.creator.bindings != self.config.creator.bindings {
                    debug!("CreatorActor {} bindings changed", self.id);
                }
            }
            CreatorMessage::CheckNow => {
                debug!("CreatorActor {} manual check requested", self.id);
                self.next_check = Instant::now();
            }
            CreatorMessage::GetState(reply) => {
                let _ = reply.send(self.state.clone());
            }
        }
        Ok(false)
    }

    /// Run one poll cycle and schedule the next one.
    async fn run_cycle(&mut self) -> Cycle {
        let interval = effective_interval(&self.config.creator, self.config.global_interval);
        let checked_at = Utc::now();
        let next_poll_at = add_duration(checked_at, interval);
        self.next_check = Instant::now() + interval;
        self.state.poll_interval_secs = interval.as_secs();
        self.state.next_poll_at = Some(next_poll_at);
        self.state.last_checked_at = Some(checked_at);
        self.state.checks += 1;

        let creator = self.config.creator.clone();
        let fetched = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return Cycle::Discarded,
            result = self.context.fetcher.fetch(&creator) => result,
        };

        let _state = self.state_lock.clone().lock_owned().await;

        let stored = match self.context.state_store.get_snapshot(&self.id).await {
            Ok(stored) => stored,
            Err(e) => {
                report_error(&e, Some(&self.id), None, "Failed to load stored snapshot");
                self.record_error(e.to_string());
                return Cycle::Failed;
            }
        };

        let fresh = match fetched {
            Ok(fresh) => fresh,
            Err(e) => {
                let error = crate::Error::from(e);
                report_error(&error, Some(&self.id), None, "Fetch failed, retrying at next tick");
                self.record_error(error.to_string());
                if self.cancellation_token.is_cancelled() {
                    return Cycle::Discarded;
                }
                let name = creator.display_name(stored.as_ref().and_then(|s| s.display_name.as_deref()));
                let status = CreatorStatus::from_snapshot(
                    &self.id,
                    name,
                    stored.as_ref(),
                    interval.as_secs(),
                    next_poll_at,
                    checked_at,
                )
                .with_error(error.to_string());
                self.write_status(&status).await;
                return Cycle::Failed;
            }
        };

        let now = fresh.checked_at;
        let cadences = hourly_cadences(&creator, self.config.hourly_interval);
        let detection = detect(&PriorSnapshot::from(stored), fresh, now, &cadences);
        let name = creator.display_name(detection.snapshot.display_name.as_deref());

        if detection.events.is_empty() {
            debug!("CreatorActor {} no changes", self.id);
        }
        for event in &detection.events {
            if self.cancellation_token.is_cancelled() {
                return Cycle::Discarded;
            }
            info!(kind = %event.kind(), "CreatorActor {} event detected", self.id);
            self.context.notifier.notify(&creator, &name, event).await;
        }

        if self.cancellation_token.is_cancelled() {
            return Cycle::Discarded;
        }

        if let Err(e) = self
            .context
            .state_store
            .put_snapshot(&self.id, &detection.snapshot)
            .await
        {
            report_error(&e, Some(&self.id), None, "Failed to store snapshot");
            self.record_error(e.to_string());
            return Cycle::Failed;
        }

        self.state.consecutive_errors = 0;
        self.state.last_error = None;
        self.state.last_events = detection.events.iter().map(|e| e.kind()).collect();

        let status = CreatorStatus::from_snapshot(
            &self.id,
            name,
            Some(&detection.snapshot),
            interval.as_secs(),
            next_poll_at,
            checked_at,
        );
        self.write_status(&status).await;
        Cycle::Completed
    }

    fn record_error(&mut self, error: String) {
        self.state.consecutive_errors = self.state.consecutive_errors.saturating_add(1);
        self.state.last_error = Some(error);
    }

    async fn write_status(&self, status: &CreatorStatus) {
        if let Err(e) = self.context.status_sink.put_creator_status(status).await {
            report_error(&e, Some(&self.id), None, "Failed to write creator status");
        }
    }

    /// A removed creator leaves no snapshot or status behind. On scheduler
    /// shutdown, or when a newer actor took over the id, both are kept.
    async fn on_cancelled(&mut self) -> ActorResult {
        if self.shutdown_token.is_cancelled() {
            info!("CreatorActor {} cancelled", self.id);
            return Ok(ActorOutcome::Cancelled);
        }

        let _state = self.state_lock.clone().lock_owned().await;
        if self.slots.is_registered(&self.id) {
            info!("CreatorActor {} replaced, keeping state", self.id);
            return Ok(ActorOutcome::Cancelled);
        }

        info!("CreatorActor {} removed, purging state", self.id);
        if let Err(e) = self.context.state_store.delete_snapshot(&self.id).await {
            report_error(&e, Some(&self.id), None, "Failed to delete snapshot");
        }
        if let Err(e) = self.context.status_sink.delete_creator_status(&self.id).await {
            warn!("CreatorActor {} failed to delete status: {}", self.id, e);
        }
        Ok(ActorOutcome::Cancelled)
    }
}

fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}
