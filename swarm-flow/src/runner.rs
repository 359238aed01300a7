//! SwarmRunner – loads a thread, runs one user turn through the swarm, and persists the
//! updated thread and checkpoint.
//!
//! Create one runner at startup and share it across requests; it only holds `Arc`s.
//!
//! ```rust,ignore
//! let outcome = state.runner.ask(request.thread_id, &request.user_query).await?;
//! ```
//!
//! A failed turn records no thread entry. On an existing thread the checkpoint is still
//! saved, with a note about the failure, so tool results from writes that already happened
//! stay in the conversation.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    context::{ChatMessage, Context},
    error::{Result, SwarmError},
    retry::RetryPolicy,
    storage::{Checkpoint, CheckpointStorage, ResponseMetadata, ThreadState, ThreadStorage},
    swarm::{Swarm, SwarmOutcome},
};

/// What one `ask` produced.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub thread_id: String,
    pub response: String,
    pub agent: String,
    /// True when this call created the thread
    pub created: bool,
}

/// High-level helper that orchestrates the _load → invoke → save_ pattern.
#[derive(Clone)]
pub struct SwarmRunner {
    swarm: Arc<Swarm>,
    threads: Arc<dyn ThreadStorage>,
    checkpoints: Arc<dyn CheckpointStorage>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

impl SwarmRunner {
    pub fn new(
        swarm: Arc<Swarm>,
        threads: Arc<dyn ThreadStorage>,
        checkpoints: Arc<dyn CheckpointStorage>,
    ) -> Self {
        let retry = swarm.retry_policy().clone();
        Self {
            swarm,
            threads,
            checkpoints,
            retry,
            timeout: None,
        }
    }

    /// Bound each turn. A turn that runs out of time fails with `SwarmError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    /// Run one user turn on an existing thread, or on a new one when `thread_id` is `None`.
    pub async fn ask(&self, thread_id: Option<String>, user_query: &str) -> Result<AskOutcome> {
        let (mut thread, context, created) = match thread_id {
            Some(thread_id) => {
                let (thread, context) = self.load(&thread_id).await?;
                (thread, context, false)
            }
            None => {
                let thread_id = Uuid::new_v4().to_string();
                info!(thread_id = %thread_id, "Creating new thread");
                (ThreadState::new(thread_id), Context::new(), true)
            }
        };
        let thread_id = thread.thread_id().to_string();

        context.add_message(ChatMessage::user(user_query)).await;

        let outcome = match self.invoke(&thread_id, &context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if !created {
                    self.save_failed_turn(&thread_id, &context, &e).await;
                }
                return Err(e);
            }
        };

        self.save_checkpoint(&thread_id, &context, Some(outcome.agent.clone()))
            .await?;

        thread.record_turn(
            outcome.response.clone(),
            outcome.usage.clone(),
            ResponseMetadata {
                agent: outcome.agent.clone(),
                model: self.swarm.model_name().to_string(),
                steps: outcome.steps,
                completed_at: Utc::now(),
            },
        );
        self.retry
            .run("save thread", || self.threads.save(thread.clone()))
            .await?;

        info!(
            thread_id = %thread_id,
            agent = %outcome.agent,
            steps = outcome.steps,
            turns = thread.turns(),
            "Turn persisted"
        );

        Ok(AskOutcome {
            thread_id,
            response: outcome.response,
            agent: outcome.agent,
            created,
        })
    }

    async fn invoke(&self, thread_id: &str, context: &Context) -> Result<SwarmOutcome> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.swarm.invoke(thread_id, context))
                .await
                .map_err(|_| SwarmError::Timeout(limit))?,
            None => self.swarm.invoke(thread_id, context).await,
        }
    }

    async fn save_checkpoint(
        &self,
        thread_id: &str,
        context: &Context,
        active_agent: Option<String>,
    ) -> Result<()> {
        let checkpoint = Checkpoint {
            thread_id: thread_id.to_string(),
            context: context.snapshot().await,
            active_agent,
            updated_at: Utc::now(),
        };
        self.retry
            .run("save checkpoint", || self.checkpoints.save(checkpoint.clone()))
            .await
    }

    /// Keep what the failed turn did (tool results, tool state) so the next turn starts
    /// from what actually happened. The turn's own error is what the caller sees.
    async fn save_failed_turn(&self, thread_id: &str, context: &Context, error: &SwarmError) {
        context
            .add_message(ChatMessage::system(format!(
                "The previous turn failed before a reply was given ({error}). \
                 Tool results above it were already applied."
            )))
            .await;
        if let Err(e) = self.save_checkpoint(thread_id, context, None).await {
            warn!(thread_id, error = %e, "Failed to save checkpoint after a failed turn");
        }
    }

    async fn load(&self, thread_id: &str) -> Result<(ThreadState, Context)> {
        let thread = self
            .retry
            .run("load thread", || self.threads.get(thread_id))
            .await?
            .ok_or_else(|| SwarmError::ThreadNotFound(thread_id.to_string()))?;

        let context = self
            .retry
            .run("load checkpoint", || self.checkpoints.get(thread_id))
            .await?
            .map(|checkpoint| Context::from_snapshot(checkpoint.context))
            .unwrap_or_default();

        Ok((thread, context))
    }
}
