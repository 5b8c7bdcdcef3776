//! Bounded per-binding outbound queue.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use onebot::MessageBody;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};

use crate::domain::{DeliveryResult, EventKind};

/// A rendered message waiting for delivery.
#[derive(Debug)]
pub struct OutboundMessage {
    pub body: MessageBody,
    /// Event the message was rendered for; `None` for manual sends.
    pub kind: Option<EventKind>,
    pub created_at: DateTime<Utc>,
    reply: Option<oneshot::Sender<DeliveryResult>>,
}

impl OutboundMessage {
    pub fn new(body: MessageBody, kind: Option<EventKind>) -> Self {
        Self {
            body,
            kind,
            created_at: Utc::now(),
            reply: None,
        }
    }

    /// A message whose delivery outcome is reported back to the caller.
    pub fn with_reply(body: MessageBody) -> (Self, oneshot::Receiver<DeliveryResult>) {
        let (tx, rx) = oneshot::channel();
        let mut message = Self::new(body, None);
        message.reply = Some(tx);
        (message, rx)
    }

    pub(crate) fn take_reply(&mut self) -> Option<oneshot::Sender<DeliveryResult>> {
        self.reply.take()
    }

    pub(crate) fn set_reply(&mut self, reply: Option<oneshot::Sender<DeliveryResult>>) {
        self.reply = reply;
    }
}

/// FIFO with a fixed capacity. Pushing onto a full queue evicts the oldest
/// message.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<OutboundMessage>,
    capacity: usize,
    dropped_total: u64,
}

impl OutboundQueue {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped_total: 0,
        }
    }

    /// Append a message, returning the evicted one if the queue was full.
    pub fn push(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped_total += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(message);
        evicted
    }

    /// Put a message back at the head for retry. When the queue filled up
    /// in the meantime the message itself is the oldest and is returned.
    pub fn requeue(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        if self.items.len() >= self.capacity {
            self.dropped_total += 1;
            return Some(message);
        }
        self.items.push_front(message);
        None
    }

    pub fn pop(&mut self) -> Option<OutboundMessage> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages evicted since creation.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }
}

/// A binding's queue, shared between the dispatcher, which pushes, and the
/// binding actor, which drains it. Pushing never waits for the actor.
#[derive(Debug, Clone)]
pub struct SharedQueue {
    queue: Arc<Mutex<OutboundQueue>>,
    ready: Arc<Notify>,
}

impl SharedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(OutboundQueue::new(capacity))),
            ready: Arc::new(Notify::new()),
        }
    }

    /// Append a message and wake the actor. Returns the evicted message if
    /// the queue was full.
    pub fn push(&self, message: OutboundMessage) -> Option<OutboundMessage> {
        let evicted = self.queue.lock().push(message);
        self.ready.notify_one();
        evicted
    }

    pub fn requeue(&self, message: OutboundMessage) -> Option<OutboundMessage> {
        self.queue.lock().requeue(message)
    }

    pub fn pop(&self) -> Option<OutboundMessage> {
        self.queue.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.lock().capacity()
    }

    pub fn dropped_total(&self) -> u64 {
        self.queue.lock().dropped_total()
    }

    pub fn clear(&self) -> usize {
        self.queue.lock().clear()
    }

    /// Resolves once a message has been pushed since the last wake-up.
    pub async fn ready(&self) {
        self.ready.notified().await
    }
}
