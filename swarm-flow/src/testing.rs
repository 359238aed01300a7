//! Deterministic model client for tests and offline demos.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::{
    agent::{AgentAction, ModelClient, ModelReply, ModelRequest},
    context::ChatMessage,
    error::{Result, SwarmError},
};

type Fallback = Box<dyn Fn(&ModelRequest<'_>) -> AgentAction + Send + Sync>;

enum ScriptedReply {
    Action(AgentAction),
    Unavailable(String),
}

/// What a scripted client was asked.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub agent: String,
    pub thread_id: String,
    pub history: Vec<ChatMessage>,
}

/// Replays queued actions in order, then defers to an optional fallback.
pub struct ScriptedModelClient {
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<Fallback>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(mut self, action: AgentAction) -> Self {
        self.script.get_mut().push_back(ScriptedReply::Action(action));
        self
    }

    /// Queue a transient upstream failure
    pub fn push_unavailable(mut self, message: impl Into<String>) -> Self {
        self.script
            .get_mut()
            .push_back(ScriptedReply::Unavailable(message.into()));
        self
    }

    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&ModelRequest<'_>) -> AgentAction + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Queue more actions after construction, e.g. between two HTTP requests.
    pub async fn enqueue(&self, action: AgentAction) {
        self.script
            .lock()
            .await
            .push_back(ScriptedReply::Action(action));
    }

    /// Queue a transient upstream failure after construction.
    pub async fn enqueue_unavailable(&self, message: impl Into<String>) {
        self.script
            .lock()
            .await
            .push_back(ScriptedReply::Unavailable(message.into()));
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }
}

impl Default for ScriptedModelClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn next_action(&self, request: ModelRequest<'_>) -> Result<ModelReply> {
        self.requests.lock().await.push(RecordedRequest {
            agent: request.agent.name().to_string(),
            thread_id: request.thread_id.to_string(),
            history: request.history.to_vec(),
        });

        let next = self.script.lock().await.pop_front();
        match next {
            Some(ScriptedReply::Action(action)) => Ok(ModelReply::new(action)),
            Some(ScriptedReply::Unavailable(message)) => Err(SwarmError::Upstream(message)),
            None => match &self.fallback {
                Some(fallback) => Ok(ModelReply::new(fallback(&request))),
                None => Err(SwarmError::ModelOutput("script exhausted".to_string())),
            },
        }
    }
}
