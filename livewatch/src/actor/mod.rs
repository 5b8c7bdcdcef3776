//! Actor plumbing shared by the creator scheduler and the binding dispatcher.
//!
//! Every creator and every binding runs as an isolated task that owns its
//! state and is reachable only through an [`ActorHandle`]. Tasks are tracked
//! in an [`ActorRegistry`] so they can be cancelled and joined on shutdown.

mod handle;
mod registry;

pub use handle::{ActorHandle, ActorMetadata, DEFAULT_MAILBOX_CAPACITY, SendError};
pub use registry::{ActorRegistry, ActorTaskResult};

/// Outcome of an actor's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorOutcome {
    /// Actor stopped gracefully.
    Stopped,
    /// Actor was cancelled.
    Cancelled,
}

/// An actor ended abnormally. Reported when its task is reaped; its owner
/// respawns it on the next roster application.
#[derive(Debug, Clone)]
pub struct ActorError {
    pub message: String,
}

impl ActorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ActorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActorError {}

/// Result type for actor runs.
pub type ActorResult = Result<ActorOutcome, ActorError>;
