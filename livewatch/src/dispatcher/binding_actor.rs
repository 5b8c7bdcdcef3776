//! Per-binding connection actor.
//!
//! Owns one forward WebSocket connection and drains the binding's outbound
//! queue. The connection cycles `Disconnected -> Connecting -> Connected` and
//! is re-established after a fixed delay for as long as the actor lives.
//! Every write is bounded by the acknowledgment timeout; a peer that stops
//! reading costs the connection, never the actor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use onebot::{ActionRequest, Endpoint, Inbound, Target, parse_inbound};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::DispatcherConfig;
use super::queue::SharedQueue;
use crate::actor::{ActorOutcome, ActorResult};
use crate::domain::{BindingStatus, ConnectionState, DeliveryAttempt, DeliveryResult};
use crate::logging::report_error;
use crate::store::StatusSink;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a binding delivers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRoute {
    pub endpoint: Endpoint,
    pub target: Target,
}

/// Messages accepted by a binding actor. Outbound messages bypass the
/// mailbox and go straight to the shared queue.
#[derive(Debug)]
pub enum BindingMessage {
    /// Switch to a new route; the connection is re-established.
    Reconfigure(BindingRoute),
}

/// What the actor does after handling a message or losing a connection.
#[derive(Debug)]
enum Flow {
    Continue,
    Restart,
    Stopped,
    Cancelled,
}

struct PendingAck {
    deadline: Instant,
    reply: Option<oneshot::Sender<DeliveryResult>>,
}

pub struct BindingActor {
    id: String,
    creator_id: String,
    route: BindingRoute,
    config: DispatcherConfig,
    mailbox: mpsc::Receiver<BindingMessage>,
    queue: SharedQueue,
    status: BindingStatus,
    /// Latest published status, read by the dispatcher without a round trip.
    published: Arc<Mutex<BindingStatus>>,
    status_sink: Arc<dyn StatusSink>,
    cancellation_token: CancellationToken,
}

impl BindingActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        creator_id: String,
        route: BindingRoute,
        config: DispatcherConfig,
        mailbox: mpsc::Receiver<BindingMessage>,
        queue: SharedQueue,
        published: Arc<Mutex<BindingStatus>>,
        status_sink: Arc<dyn StatusSink>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let status = published.lock().clone();
        Self {
            id,
            creator_id,
            route,
            config,
            mailbox,
            queue,
            status,
            published,
            status_sink,
            cancellation_token,
        }
    }

    #[instrument(skip(self), fields(binding_id = %self.id, creator_id = %self.creator_id))]
    pub async fn run(mut self) -> ActorResult {
        info!(endpoint = %self.route.endpoint.redacted(), target = %self.route.target, "Binding actor started");

        loop {
            self.set_connection(ConnectionState::Connecting).await;

            let flow = match self.connect().await {
                Ok(Some(stream)) => {
                    self.set_connection(ConnectionState::Connected).await;
                    self.serve(stream).await
                }
                Ok(None) => Flow::Continue,
                Err(flow) => flow,
            };

            match flow {
                Flow::Cancelled => return Ok(self.finish(ActorOutcome::Cancelled)),
                Flow::Stopped => return Ok(self.finish(ActorOutcome::Stopped)),
                Flow::Restart => {
                    self.set_connection(ConnectionState::Disconnected).await;
                    continue;
                }
                Flow::Continue => {}
            }

            self.set_connection(ConnectionState::Disconnected).await;
            match self.wait_before_reconnect().await {
                Flow::Cancelled => return Ok(self.finish(ActorOutcome::Cancelled)),
                Flow::Stopped => return Ok(self.finish(ActorOutcome::Stopped)),
                Flow::Restart | Flow::Continue => {}
            }
        }
    }

    fn finish(&mut self, outcome: ActorOutcome) -> ActorOutcome {
        let discarded = self.queue.clear();
        if discarded > 0 {
            debug!(discarded, "Discarding queued messages");
        }
        info!(?outcome, "Binding actor stopped");
        outcome
    }

    /// Attempt one connection. `Ok(None)` means the attempt failed and a
    /// reconnect is due; `Err` carries a flow that ends the attempt early.
    async fn connect(&mut self) -> Result<Option<WsStream>, Flow> {
        let request = match self.route.endpoint.handshake_request() {
            Ok(request) => request,
            Err(e) => {
                let error = crate::Error::from(e);
                report_error(&error, Some(&self.creator_id), Some(&self.id), "Binding endpoint is unusable");
                return Err(self.park_unusable(error.to_string()).await);
            }
        };

        debug!(endpoint = %self.route.endpoint.redacted(), "Connecting");
        let connecting = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request));
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => return Err(Flow::Cancelled),
                msg = self.mailbox.recv() => match self.handle_offline(msg) {
                    Flow::Continue => {}
                    flow => return Err(flow),
                },
                _ = self.queue.ready() => self.publish().await,
                result = &mut connecting => {
                    return match result {
                        Ok(Ok((stream, _))) => Ok(Some(stream)),
                        Ok(Err(e)) => {
                            self.record_connect_failure(format!("connect failed: {}", e)).await;
                            Ok(None)
                        }
                        Err(_) => {
                            self.record_connect_failure(format!(
                                "connect timed out after {:?}",
                                CONNECT_TIMEOUT
                            ))
                            .await;
                            Ok(None)
                        }
                    };
                }
            }
        }
    }

    async fn record_connect_failure(&mut self, reason: String) {
        let error = crate::Error::delivery(reason.clone());
        report_error(&error, Some(&self.creator_id), Some(&self.id), "Binding connection failed");
        self.status.record_failure(reason);
        self.publish().await;
    }

    /// Mark the binding unusable and wait for a new route.
    async fn park_unusable(&mut self, reason: String) -> Flow {
        self.status.record_failure(reason);
        self.set_connection(ConnectionState::Unusable).await;
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => return Flow::Cancelled,
                msg = self.mailbox.recv() => match self.handle_offline(msg) {
                    Flow::Continue => {}
                    flow => return flow,
                },
                _ = self.queue.ready() => self.publish().await,
            }
        }
    }

    async fn wait_before_reconnect(&mut self) -> Flow {
        let delay = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => return Flow::Cancelled,
                msg = self.mailbox.recv() => match self.handle_offline(msg) {
                    Flow::Continue => {}
                    flow => return flow,
                },
                _ = self.queue.ready() => self.publish().await,
                _ = &mut delay => return Flow::Continue,
            }
        }
    }

    /// Handle a mailbox message while no connection is up.
    fn handle_offline(&mut self, msg: Option<BindingMessage>) -> Flow {
        match msg {
            None => Flow::Stopped,
            Some(BindingMessage::Reconfigure(route)) => self.reconfigure(route),
        }
    }

    fn reconfigure(&mut self, route: BindingRoute) -> Flow {
        if route == self.route {
            return Flow::Continue;
        }
        info!(endpoint = %route.endpoint.redacted(), target = %route.target, "Binding reconfigured, reconnecting");
        self.route = route;
        Flow::Restart
    }

    /// Drive a live connection until it ends.
    async fn serve(&mut self, mut stream: WsStream) -> Flow {
        let mut pending: HashMap<String, PendingAck> = HashMap::new();
        let mut ping = tokio::time::interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            if let Err(reason) = self.flush(&mut stream, &mut pending).await {
                break reason;
            }

            let next_deadline = pending.values().map(|p| p.deadline).min();

            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    self.close(&mut stream).await;
                    self.fail_pending(&mut pending, "actor cancelled").await;
                    return Flow::Cancelled;
                }
                msg = self.mailbox.recv() => {
                    let Some(BindingMessage::Reconfigure(route)) = msg else {
                        self.close(&mut stream).await;
                        self.fail_pending(&mut pending, "actor stopped").await;
                        return Flow::Stopped;
                    };
                    if let Flow::Restart = self.reconfigure(route) {
                        self.close(&mut stream).await;
                        self.fail_pending(&mut pending, "binding reconfigured").await;
                        return Flow::Restart;
                    }
                }
                // Loops back to the flush at the top.
                _ = self.queue.ready() => {}
                _ = ping.tick() => {
                    let limit = self.config.ack_timeout;
                    match tokio::time::timeout(limit, stream.send(Message::Ping(Default::default()))).await {
                        Ok(Ok(())) => trace!("Sent ping"),
                        Ok(Err(e)) => break format!("ping failed: {}", e),
                        Err(_) => break format!("ping write timed out after {:?}", limit),
                    }
                }
                _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                    self.expire_pending(&mut pending).await;
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_inbound(text.as_str(), &mut pending).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break match frame {
                                Some(frame) => format!("closed by peer: {}", frame.reason.as_str()),
                                None => "closed by peer".to_string(),
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("websocket error: {}", e),
                        None => break "stream closed".to_string(),
                    }
                }
            }
        };

        warn!(reason = %reason, "Binding connection lost");
        self.status.record_failure(reason.clone());
        self.fail_pending(&mut pending, &reason).await;
        self.close(&mut stream).await;
        Flow::Continue
    }

    /// Best-effort close, bounded like every other write.
    async fn close(&self, stream: &mut WsStream) {
        if tokio::time::timeout(self.config.ack_timeout, stream.close(None))
            .await
            .is_err()
        {
            debug!("Close handshake timed out, dropping connection");
        }
    }

    /// Send every queued message in order. A write that fails or does not
    /// complete within the acknowledgment timeout puts the message back at
    /// the head of the queue and ends the connection.
    async fn flush(
        &mut self,
        stream: &mut WsStream,
        pending: &mut HashMap<String, PendingAck>,
    ) -> Result<(), String> {
        while let Some(mut message) = self.queue.pop() {
            let request = ActionRequest::send_message(self.route.target, message.body.clone());
            let frame = match request.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    let result = DeliveryResult::Rejected {
                        reason: format!("encode failed: {}", e),
                    };
                    self.complete(request.echo, result, message.take_reply()).await;
                    continue;
                }
            };

            let limit = self.config.ack_timeout;
            let failure = match tokio::time::timeout(limit, stream.send(Message::text(frame))).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("write timed out after {:?}", limit)),
            };

            match failure {
                None => {
                    debug!(echo = %request.echo, preview = %message.body.preview(), "Message sent");
                    pending.insert(
                        request.echo,
                        PendingAck {
                            deadline: Instant::now() + limit,
                            reply: message.take_reply(),
                        },
                    );
                }
                Some(reason) => {
                    let reply = message.take_reply();
                    self.record(request.echo, DeliveryResult::SendFailed {
                        reason: reason.clone(),
                    })
                    .await;
                    message.set_reply(reply);
                    if let Some(dropped) = self.queue.requeue(message) {
                        warn!(kind = ?dropped.kind, "Outbound queue full, dropped message awaiting retry");
                    }
                    return Err(format!("send failed: {}", reason));
                }
            }
        }
        Ok(())
    }

    async fn handle_inbound(&mut self, text: &str, pending: &mut HashMap<String, PendingAck>) {
        match parse_inbound(text) {
            Ok(Inbound::Response(response)) => {
                let Some(ack) = pending.remove(&response.echo) else {
                    debug!(echo = %response.echo, "Response for unknown echo");
                    return;
                };
                let result = if response.is_ok() {
                    DeliveryResult::Acknowledged
                } else {
                    DeliveryResult::Rejected {
                        reason: response.error_message(),
                    }
                };
                if let Some(error) = result.error_message() {
                    warn!(echo = %response.echo, error = %error, "Message rejected by endpoint");
                }
                self.complete(response.echo, result, ack.reply).await;
            }
            Ok(Inbound::Event { post_type }) => {
                trace!(?post_type, "Ignoring inbound event");
            }
            Err(e) => debug!("Ignoring undecodable frame: {}", e),
        }
    }

    async fn expire_pending(&mut self, pending: &mut HashMap<String, PendingAck>) {
        let now = Instant::now();
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, ack)| ack.deadline <= now)
            .map(|(echo, _)| echo.clone())
            .collect();
        for echo in expired {
            if let Some(ack) = pending.remove(&echo) {
                warn!(echo = %echo, "No acknowledgment within {:?}", self.config.ack_timeout);
                self.complete(echo, DeliveryResult::AckTimeout, ack.reply).await;
            }
        }
    }

    async fn fail_pending(&mut self, pending: &mut HashMap<String, PendingAck>, reason: &str) {
        for (echo, ack) in pending.drain() {
            let result = DeliveryResult::ConnectionLost {
                reason: reason.to_string(),
            };
            self.complete(echo, result, ack.reply).await;
        }
    }

    async fn complete(
        &mut self,
        echo: String,
        result: DeliveryResult,
        reply: Option<oneshot::Sender<DeliveryResult>>,
    ) {
        // Published before the caller learns the outcome.
        self.record(echo, result.clone()).await;
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    async fn record(&mut self, echo: String, result: DeliveryResult) {
        self.status.record_attempt(DeliveryAttempt {
            echo,
            attempted_at: Utc::now(),
            result,
        });
        self.publish().await;
    }

    async fn set_connection(&mut self, state: ConnectionState) {
        if self.status.connection == state {
            return;
        }
        debug!(from = %self.status.connection, to = %state, "Connection state changed");
        if state == ConnectionState::Connected {
            info!(endpoint = %self.route.endpoint.redacted(), "Binding connected");
        }
        self.status.connection = state;
        self.status.updated_at = Utc::now();
        self.publish().await;
    }

    fn snapshot_status(&self) -> BindingStatus {
        let mut status = self.status.clone();
        status.queued = self.queue.len();
        status.dropped_total = self.queue.dropped_total();
        status
    }

    async fn publish(&mut self) {
        self.status = self.snapshot_status();
        *self.published.lock() = self.status.clone();
        if let Err(e) = self.status_sink.put_binding_status(&self.status).await {
            report_error(&e, Some(&self.creator_id), Some(&self.id), "Failed to persist binding status");
        }
    }
}
