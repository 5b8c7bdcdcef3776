//! Registry for tracking actors of one kind and their tasks.

use std::collections::HashMap;
use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::handle::ActorHandle;
use super::{ActorOutcome, ActorResult};

/// Result of an actor task completion.
#[derive(Debug)]
pub struct ActorTaskResult {
    pub actor_id: String,
    pub actor_type: &'static str,
    pub outcome: Result<ActorOutcome, String>,
}

impl ActorTaskResult {
    pub fn new(actor_id: String, actor_type: &'static str, outcome: ActorResult) -> Self {
        Self {
            actor_id,
            actor_type,
            outcome: outcome.map_err(|e| e.to_string()),
        }
    }

    /// Check if the actor crashed.
    pub fn is_crash(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }
}

/// Tracks live actor handles by id together with their tasks.
pub struct ActorRegistry<M> {
    handles: HashMap<String, ActorHandle<M>>,
    task_set: JoinSet<ActorTaskResult>,
    cancellation_token: CancellationToken,
}

impl<M: Send + 'static> ActorRegistry<M> {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            handles: HashMap::new(),
            task_set: JoinSet::new(),
            cancellation_token,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ActorHandle<M>> {
        self.handles.get(id)
    }

    /// Register `handle` and spawn the actor's run future.
    ///
    /// An actor already registered under the same id is cancelled first.
    pub fn spawn<F>(&mut self, handle: ActorHandle<M>, run: F)
    where
        F: Future<Output = ActorResult> + Send + 'static,
    {
        let id = handle.id().to_string();
        let actor_type = handle.metadata.actor_type;
        if let Some(previous) = self.handles.insert(id.clone(), handle) {
            debug!("Replacing {} actor: {}", actor_type, id);
            previous.cancel();
        }

        info!("Spawning {} actor: {}", actor_type, id);
        self.task_set.spawn(async move {
            let result = run.await;
            ActorTaskResult::new(id, actor_type, result)
        });
    }

    /// Cancel an actor and remove its handle. Its task is collected by
    /// [`ActorRegistry::reap`] or [`ActorRegistry::shutdown`].
    pub fn remove(&mut self, id: &str) -> Option<ActorHandle<M>> {
        let handle = self.handles.remove(id)?;
        debug!("Removing {} actor: {}", handle.metadata.actor_type, id);
        handle.cancel();
        Some(handle)
    }

    /// Drop the handle of an actor whose task has finished, unless it was
    /// already replaced by a newer actor.
    pub fn forget_finished(&mut self, id: &str) {
        if self.handles.get(id).is_some_and(ActorHandle::is_stopped) {
            self.handles.remove(id);
        }
    }

    /// Collect finished tasks without waiting.
    pub fn reap(&mut self) -> Vec<ActorTaskResult> {
        let mut finished = Vec::new();
        while let Some(joined) = self.task_set.try_join_next() {
            if let Ok(result) = joined {
                finished.push(result);
            }
        }
        finished
    }

    /// Cancel all actors and wait for their tasks.
    pub async fn shutdown(&mut self) -> Vec<ActorTaskResult> {
        info!("Cancelling all {} actors", self.handles.len());
        self.cancellation_token.cancel();
        for handle in self.handles.values() {
            handle.cancel();
        }
        self.handles.clear();

        let mut results = Vec::new();
        while let Some(joined) = self.task_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => debug!("Actor task failed to join: {}", e),
            }
        }
        results
    }

    /// Token for a new actor, cancelled with the registry.
    pub fn child_token(&self) -> CancellationToken {
        self.cancellation_token.child_token()
    }
}
