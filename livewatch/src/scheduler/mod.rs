//! Scheduler: one self-scheduling actor per enabled creator.
//!
//! Creators are polled independently; a slow or failing creator never
//! delays another. The roster is applied on a pull basis: changed creators
//! receive their new configuration and use it from their next tick.

mod actor;
mod interval;
mod messages;

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actor::{ActorHandle, ActorMetadata, ActorRegistry, DEFAULT_MAILBOX_CAPACITY};
use crate::config::Roster;
use crate::{Error, Result};

pub use actor::{CreatorActor, CreatorSlots, CycleContext};
pub use interval::{MIN_HOURLY_INTERVAL, effective_interval, hourly_cadences, hourly_interval};
pub use messages::{CreatorActorState, CreatorConfig, CreatorMessage};

/// Defaults used when the roster does not set its own intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub global_poll_interval: Duration,
    pub live_hourly_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            global_poll_interval: Duration::from_secs(30),
            live_hourly_minutes: 60,
        }
    }
}

/// Counts from one roster application.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleReport {
    pub spawned: usize,
    pub updated: usize,
    pub removed: usize,
}

struct Inner {
    registry: ActorRegistry<CreatorMessage>,
    configs: HashMap<String, CreatorConfig>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    context: CycleContext,
    slots: CreatorSlots,
    inner: Mutex<Inner>,
    shutdown_token: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        context: CycleContext,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            context,
            slots: CreatorSlots::default(),
            inner: Mutex::new(Inner {
                registry: ActorRegistry::new(cancellation_token.clone()),
                configs: HashMap::new(),
            }),
            shutdown_token: cancellation_token,
        }
    }

    /// Spawn, update or remove creator actors to match `roster`.
    ///
    /// Disabled creators are treated as removed.
    pub fn apply_roster(&self, roster: &Roster) -> ScheduleReport {
        let global_interval = roster.poll_interval(self.config.global_poll_interval);
        let hourly = hourly_interval(roster.live_hourly_minutes(self.config.live_hourly_minutes));

        let wanted: HashMap<String, CreatorConfig> = roster
            .creators
            .iter()
            .filter(|c| c.enabled)
            .map(|creator| {
                (
                    creator.id.clone(),
                    CreatorConfig {
                        creator: creator.clone(),
                        global_interval,
                        hourly_interval: hourly,
                    },
                )
            })
            .collect();

        let mut report = ScheduleReport::default();
        let mut inner = self.inner.lock();

        for finished in inner.registry.reap() {
            if finished.is_crash() {
                warn!(
                    creator_id = %finished.actor_id,
                    "Creator actor crashed: {}",
                    finished.error_message().unwrap_or_default()
                );
            }
            inner.registry.forget_finished(&finished.actor_id);
            self.slots.release(&finished.actor_id);
        }

        let removed: Vec<String> = inner
            .configs
            .keys()
            .filter(|id| !wanted.contains_key(*id))
            .cloned()
            .collect();
        for id in removed {
            inner.configs.remove(&id);
            self.slots.unregister(&id);
            if inner.registry.remove(&id).is_some() {
                report.removed += 1;
            }
        }

        for (id, config) in wanted {
            let running = inner.registry.get(&id).cloned();
            match running {
                Some(_) if inner.configs.get(&id) == Some(&config) => {}
                Some(handle)
                    if handle
                        .try_send(CreatorMessage::ConfigUpdate(config.clone()))
                        .is_ok() =>
                {
                    report.updated += 1;
                }
                _ => {
                    self.spawn_actor(&mut inner, config.clone());
                    report.spawned += 1;
                }
            }
            inner.configs.insert(id, config);
        }

        if report != ScheduleReport::default() {
            info!(
                spawned = report.spawned,
                updated = report.updated,
                removed = report.removed,
                "Roster applied"
            );
        }
        report
    }

    fn spawn_actor(&self, inner: &mut Inner, config: CreatorConfig) {
        let (tx, rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let token = inner.registry.child_token();
        let handle = ActorHandle::new(
            tx,
            token.clone(),
            ActorMetadata::creator(config.creator.id.clone()),
        );
        let actor = CreatorActor::new(
            config,
            rx,
            self.context.clone(),
            self.slots.clone(),
            token,
            self.shutdown_token.clone(),
        );
        inner.registry.spawn(handle, actor.run());
    }

    fn handle(&self, creator_id: &str) -> Result<ActorHandle<CreatorMessage>> {
        self.inner
            .lock()
            .registry
            .get(creator_id)
            .cloned()
            .ok_or_else(|| Error::not_found("creator", creator_id))
    }

    /// Poll a creator right away.
    pub async fn check_now(&self, creator_id: &str) -> Result<()> {
        self.handle(creator_id)?
            .send(CreatorMessage::CheckNow)
            .await
            .map_err(|e| Error::Other(format!("creator {}: {}", creator_id, e)))
    }

    /// Query a creator actor's runtime state.
    pub async fn creator_state(&self, creator_id: &str) -> Result<CreatorActorState> {
        let (tx, rx) = oneshot::channel();
        self.handle(creator_id)?
            .send(CreatorMessage::GetState(tx))
            .await
            .map_err(|e| Error::Other(format!("creator {}: {}", creator_id, e)))?;
        rx.await
            .map_err(|_| Error::Other(format!("creator {} stopped before replying", creator_id)))
    }

    /// Stop polling a creator and purge its stored state.
    pub fn remove(&self, creator_id: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.configs.remove(creator_id);
        self.slots.unregister(creator_id);
        inner.registry.remove(creator_id).is_some()
    }

    pub fn creator_ids(&self) -> Vec<String> {
        self.inner.lock().configs.keys().cloned().collect()
    }

    /// Cancel every creator actor and wait for them. Stored snapshots are
    /// kept.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let mut registry = {
            let mut inner = self.inner.lock();
            inner.configs.clear();
            std::mem::replace(&mut inner.registry, ActorRegistry::new(CancellationToken::new()))
        };
        let results = registry.shutdown().await;
        debug!(stopped = results.len(), "Scheduler shut down");
    }
}
