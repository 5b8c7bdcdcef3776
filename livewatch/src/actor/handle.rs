//! Actor handle for type-safe message passing with backpressure support.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default mailbox capacity for actors.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default timeout for send operations when mailbox is full.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Error type for send operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The actor has stopped and is no longer accepting messages.
    ActorStopped,
    /// The mailbox is full.
    MailboxFull,
    /// The send operation timed out.
    Timeout,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::ActorStopped => write!(f, "Actor has stopped"),
            SendError::MailboxFull => write!(f, "Mailbox is full"),
            SendError::Timeout => write!(f, "Send operation timed out"),
        }
    }
}

impl std::error::Error for SendError {}

/// Metadata about an actor.
#[derive(Debug, Clone)]
pub struct ActorMetadata {
    /// Creator or binding id.
    pub id: String,
    /// Actor type ("creator" or "binding").
    pub actor_type: &'static str,
}

impl ActorMetadata {
    pub fn creator(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actor_type: "creator",
        }
    }

    pub fn binding(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actor_type: "binding",
        }
    }
}

/// A handle to an actor for sending messages.
///
/// Sending first attempts a non-blocking `try_send` and falls back to
/// waiting for a permit with a timeout when the mailbox is full.
pub struct ActorHandle<M> {
    sender: mpsc::Sender<M>,
    cancellation_token: CancellationToken,
    pub metadata: ActorMetadata,
}

impl<M> ActorHandle<M> {
    pub fn new(
        sender: mpsc::Sender<M>,
        cancellation_token: CancellationToken,
        metadata: ActorMetadata,
    ) -> Self {
        Self {
            sender,
            cancellation_token,
            metadata,
        }
    }

    /// Send a message with backpressure awareness.
    ///
    /// # Errors
    ///
    /// Returns `SendError::ActorStopped` if the actor has stopped.
    /// Returns `SendError::Timeout` if the send times out.
    pub async fn send(&self, msg: M) -> Result<(), SendError> {
        self.send_with_timeout(msg, DEFAULT_SEND_TIMEOUT).await
    }

    /// Send a message with a custom timeout.
    pub async fn send_with_timeout(&self, msg: M, timeout: Duration) -> Result<(), SendError> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                match tokio::time::timeout(timeout, self.sender.reserve()).await {
                    Ok(Ok(permit)) => {
                        permit.send(msg);
                        Ok(())
                    }
                    Ok(Err(_)) => Err(SendError::ActorStopped),
                    Err(_) => Err(SendError::Timeout),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::ActorStopped),
        }
    }

    /// Try to send a message without blocking.
    pub fn try_send(&self, msg: M) -> Result<(), SendError> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::MailboxFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::ActorStopped),
        }
    }

    /// Cancel this actor.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Whether the actor dropped its mailbox, i.e. its task has ended.
    pub fn is_stopped(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

impl<M> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            cancellation_token: self.cancellation_token.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl<M> fmt::Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("metadata", &self.metadata)
            .field("capacity", &self.sender.capacity())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize) -> (ActorHandle<u32>, mpsc::Receiver<u32>) {
        let (tx, rx) = mpsc::channel::<u32>(capacity);
        let handle = ActorHandle::new(tx, CancellationToken::new(), ActorMetadata::creator("c1"));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_actor_handle_send() {
        let (handle, mut rx) = handle(10);
        handle.send(42).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_actor_handle_mailbox_full() {
        let (handle, _rx) = handle(1);
        handle.try_send(1).unwrap();
        assert_eq!(handle.try_send(2), Err(SendError::MailboxFull));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_when_full() {
        let (handle, _rx) = handle(1);
        handle.try_send(1).unwrap();
        assert_eq!(handle.send(2).await, Err(SendError::Timeout));
    }

    #[tokio::test]
    async fn test_actor_handle_actor_stopped() {
        let (handle, rx) = handle(10);
        drop(rx);
        assert_eq!(handle.send(42).await, Err(SendError::ActorStopped));
    }

    #[test]
    fn test_actor_handle_cancellation() {
        let (handle, _rx) = handle(10);
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(clone.id(), "c1");
        assert_eq!(clone.metadata.actor_type, "creator");
    }

    #[test]
    fn test_send_error_display() {
        assert_eq!(SendError::ActorStopped.to_string(), "Actor has stopped");
        assert_eq!(SendError::MailboxFull.to_string(), "Mailbox is full");
        assert_eq!(SendError::Timeout.to_string(), "Send operation timed out");
    }
}
