//! Dispatcher: one connection actor per binding.
//!
//! Messages handed to a binding are delivered in submission order. Until
//! they are written they wait in a bounded queue that evicts the oldest
//! entry on overflow; submitting never waits on the connection. Bindings
//! never share a connection, so a broken endpoint only affects its own
//! binding.

mod binding_actor;
mod queue;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use onebot::MessageBody;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actor::{ActorHandle, ActorMetadata, ActorRegistry};
use crate::domain::{Binding, BindingStatus, ConnectionState, DeliveryResult, EndpointProfile};
use crate::logging::report_error;
use crate::notification::MessageSink;
use crate::store::StatusSink;
use crate::{Error, Result};

pub use binding_actor::{BindingActor, BindingMessage, BindingRoute};
pub use queue::{OutboundMessage, OutboundQueue, SharedQueue};

/// Reconfigure requests are rare; the mailbox only needs a little slack.
const BINDING_MAILBOX_CAPACITY: usize = 8;

/// Delivery tuning shared by all bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Messages kept per binding while disconnected.
    pub queue_capacity: usize,
    /// Bound on each frame write and on waiting for its action response.
    pub ack_timeout: Duration,
    /// Fixed delay between connection attempts.
    pub reconnect_delay: Duration,
    /// WebSocket keepalive interval.
    pub ping_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            ack_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
        }
    }
}

/// A binding resolved against the endpoint profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub binding_id: String,
    pub creator_id: String,
    /// The route, or why the binding cannot be used.
    pub route: std::result::Result<BindingRoute, String>,
}

impl BindingSpec {
    pub fn resolve(creator_id: &str, binding: &Binding, profiles: &[EndpointProfile]) -> Self {
        let route = binding
            .resolve_endpoint(profiles)
            .and_then(|endpoint| {
                Ok(BindingRoute {
                    endpoint,
                    target: binding.resolve_target()?,
                })
            })
            .map_err(|e| e.to_string());
        Self {
            binding_id: binding.id.clone(),
            creator_id: creator_id.to_string(),
            route,
        }
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub spawned: usize,
    pub reconfigured: usize,
    pub stopped: usize,
    pub unusable: usize,
}

/// What the dispatcher shares with a running binding actor.
#[derive(Clone)]
struct BindingLink {
    queue: SharedQueue,
    status: Arc<Mutex<BindingStatus>>,
}

impl BindingLink {
    fn status(&self) -> BindingStatus {
        let mut status = self.status.lock().clone();
        status.queued = self.queue.len();
        status.dropped_total = self.queue.dropped_total();
        status
    }
}

struct Inner {
    registry: ActorRegistry<BindingMessage>,
    links: HashMap<String, BindingLink>,
    specs: HashMap<String, BindingSpec>,
    unusable: HashMap<String, BindingStatus>,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    status_sink: Arc<dyn StatusSink>,
    inner: Mutex<Inner>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        status_sink: Arc<dyn StatusSink>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            status_sink,
            inner: Mutex::new(Inner {
                registry: ActorRegistry::new(cancellation_token),
                links: HashMap::new(),
                specs: HashMap::new(),
                unusable: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Bring the running binding actors in line with `specs`.
    ///
    /// New bindings are spawned, bindings whose route changed reconnect,
    /// and bindings no longer present are stopped with their queues
    /// discarded.
    pub async fn reconcile(&self, specs: Vec<BindingSpec>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut to_put = Vec::new();
        let mut to_delete = Vec::new();

        {
            let mut inner = self.inner.lock();
            for finished in inner.registry.reap() {
                if finished.is_crash() {
                    warn!(
                        binding_id = %finished.actor_id,
                        "Binding actor crashed: {}",
                        finished.error_message().unwrap_or_default()
                    );
                }
                inner.registry.forget_finished(&finished.actor_id);
                if inner.registry.get(&finished.actor_id).is_none() {
                    inner.links.remove(&finished.actor_id);
                }
            }

            let wanted: HashMap<String, BindingSpec> = specs
                .into_iter()
                .map(|spec| (spec.binding_id.clone(), spec))
                .collect();

            let removed: Vec<String> = inner
                .specs
                .keys()
                .filter(|id| !wanted.contains_key(*id))
                .cloned()
                .collect();
            for id in removed {
                inner.specs.remove(&id);
                inner.unusable.remove(&id);
                inner.links.remove(&id);
                if inner.registry.remove(&id).is_some() {
                    report.stopped += 1;
                }
                to_delete.push(id);
            }

            for (id, spec) in wanted {
                let unchanged = inner.specs.get(&id) == Some(&spec);
                match &spec.route {
                    Ok(route) => {
                        inner.unusable.remove(&id);
                        let running = inner.registry.get(&id).cloned();
                        let same_creator = inner
                            .specs
                            .get(&id)
                            .is_some_and(|old| old.creator_id == spec.creator_id);
                        match running {
                            Some(_) if unchanged => {}
                            Some(handle)
                                if same_creator
                                    && handle
                                        .try_send(BindingMessage::Reconfigure(route.clone()))
                                        .is_ok() =>
                            {
                                report.reconfigured += 1;
                            }
                            _ => {
                                self.spawn_actor(&mut inner, &spec, route.clone());
                                report.spawned += 1;
                            }
                        }
                    }
                    Err(reason) => {
                        inner.links.remove(&id);
                        if inner.registry.remove(&id).is_some() {
                            report.stopped += 1;
                        }
                        if !unchanged || !inner.unusable.contains_key(&id) {
                            let error = Error::config(reason.clone());
                            report_error(
                                &error,
                                Some(&spec.creator_id),
                                Some(&id),
                                "Binding configuration is unusable",
                            );
                            let mut status = BindingStatus::new(id.clone(), spec.creator_id.clone());
                            status.connection = ConnectionState::Unusable;
                            status.record_failure(reason.clone());
                            inner.unusable.insert(id.clone(), status.clone());
                            to_put.push(status);
                        }
                        report.unusable += 1;
                    }
                }
                inner.specs.insert(id, spec);
            }
        }

        for status in &to_put {
            if let Err(e) = self.status_sink.put_binding_status(status).await {
                report_error(&e, Some(&status.creator_id), Some(&status.binding_id), "Failed to persist binding status");
            }
        }
        for id in &to_delete {
            if let Err(e) = self.status_sink.delete_binding_status(id).await {
                report_error(&e, None, Some(id), "Failed to delete binding status");
            }
        }

        if report != ReconcileReport::default() {
            info!(
                spawned = report.spawned,
                reconfigured = report.reconfigured,
                stopped = report.stopped,
                unusable = report.unusable,
                "Bindings reconciled"
            );
        }
        report
    }

    fn spawn_actor(&self, inner: &mut Inner, spec: &BindingSpec, route: BindingRoute) {
        let (tx, rx) = mpsc::channel(BINDING_MAILBOX_CAPACITY);
        let token = inner.registry.child_token();
        let handle = ActorHandle::new(tx, token.clone(), ActorMetadata::binding(&spec.binding_id));
        let link = BindingLink {
            queue: SharedQueue::new(self.config.queue_capacity),
            status: Arc::new(Mutex::new(BindingStatus::new(
                spec.binding_id.clone(),
                spec.creator_id.clone(),
            ))),
        };
        let actor = BindingActor::new(
            spec.binding_id.clone(),
            spec.creator_id.clone(),
            route,
            self.config,
            rx,
            link.queue.clone(),
            link.status.clone(),
            self.status_sink.clone(),
            token,
        );
        inner.links.insert(spec.binding_id.clone(), link);
        inner.registry.spawn(handle, actor.run());
    }

    /// The link of a running binding.
    fn link(&self, binding_id: &str) -> Result<BindingLink> {
        let inner = self.inner.lock();
        if let Some(status) = inner.unusable.get(binding_id) {
            return Err(Error::config(format!(
                "binding {} is unusable: {}",
                binding_id,
                status.last_error.as_deref().unwrap_or("invalid configuration")
            )));
        }
        let handle = inner
            .registry
            .get(binding_id)
            .ok_or_else(|| Error::not_found("binding", binding_id))?;
        if handle.is_stopped() {
            return Err(Error::delivery(format!("binding {} has stopped", binding_id)));
        }
        inner
            .links
            .get(binding_id)
            .cloned()
            .ok_or_else(|| Error::not_found("binding", binding_id))
    }

    /// Submit a message and wait for its delivery outcome.
    pub async fn send_and_wait(
        &self,
        binding_id: &str,
        body: MessageBody,
        timeout: Duration,
    ) -> Result<DeliveryResult> {
        let (message, reply) = OutboundMessage::with_reply(body);
        self.submit(binding_id, message)?;
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(Error::delivery("message was dropped before delivery")),
            Err(_) => Err(Error::delivery(format!(
                "no delivery outcome within {:?}",
                timeout
            ))),
        }
    }

    /// Current status of a binding, `None` when it is not configured.
    ///
    /// Read from the last state the actor published, so it answers even
    /// while the actor is busy writing to a slow endpoint.
    pub fn status(&self, binding_id: &str) -> Option<BindingStatus> {
        let inner = self.inner.lock();
        if let Some(status) = inner.unusable.get(binding_id) {
            return Some(status.clone());
        }
        inner.links.get(binding_id).map(BindingLink::status)
    }

    pub fn binding_ids(&self) -> Vec<String> {
        self.inner.lock().specs.keys().cloned().collect()
    }

    /// Stop every binding actor and wait for them to finish.
    pub async fn shutdown(&self) {
        let mut registry = {
            let mut inner = self.inner.lock();
            inner.specs.clear();
            inner.unusable.clear();
            inner.links.clear();
            std::mem::replace(&mut inner.registry, ActorRegistry::new(CancellationToken::new()))
        };
        let results = registry.shutdown().await;
        debug!(stopped = results.len(), "Dispatcher shut down");
    }
}

impl MessageSink for Dispatcher {
    /// Queue a message. A full queue evicts its oldest message instead of
    /// refusing the new one.
    fn submit(&self, binding_id: &str, message: OutboundMessage) -> Result<()> {
        let link = self.link(binding_id)?;
        if let Some(evicted) = link.queue.push(message) {
            warn!(
                binding_id,
                kind = ?evicted.kind,
                capacity = link.queue.capacity(),
                dropped_total = link.queue.dropped_total(),
                "Outbound queue full, dropped oldest message"
            );
        }
        Ok(())
    }
}
