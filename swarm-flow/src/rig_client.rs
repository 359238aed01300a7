//! `ModelClient` backed by rig and OpenRouter.

use async_trait::async_trait;
use rig::{
    client::CompletionClient,
    completion::{Chat, CompletionError, Message, PromptError},
    providers::openrouter,
};
use tracing::debug;

use crate::{
    agent::{ModelClient, ModelReply, ModelRequest},
    context::{ChatMessage, MessageRole},
    error::{Result, SwarmError},
    protocol::{parse_action, render_message, render_preamble},
};

pub struct RigModelClient {
    client: openrouter::Client,
    model: String,
}

impl RigModelClient {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self {
            client: openrouter::Client::new(api_key),
            model: model.into(),
        }
    }
}

/// Convert a history entry to a rig message. rig has no tool or system role for plain
/// chat, so those are sent as labelled user messages.
pub fn to_rig_message(message: &ChatMessage) -> Message {
    match message.role {
        MessageRole::Assistant => Message::assistant(render_message(message)),
        MessageRole::User | MessageRole::Tool | MessageRole::System => {
            Message::user(render_message(message))
        }
    }
}

/// Provider messages that mean "try again later" rather than "this request is wrong".
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "overloaded",
    "timeout",
    "timed out",
    "502",
    "503",
    "504",
    "unavailable",
];

/// Map a rig failure onto the swarm's error kinds. Only transport failures and
/// provider errors that read as transient are retried.
pub fn classify(error: PromptError) -> SwarmError {
    match error {
        PromptError::CompletionError(CompletionError::HttpError(e)) => {
            SwarmError::Upstream(e.to_string())
        }
        PromptError::CompletionError(CompletionError::ProviderError(message)) => {
            let lower = message.to_lowercase();
            if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
                SwarmError::Upstream(message)
            } else {
                SwarmError::ModelOutput(format!("provider rejected the request: {message}"))
            }
        }
        PromptError::CompletionError(
            e @ (CompletionError::UrlError(_) | CompletionError::RequestError(_)),
        ) => SwarmError::InvalidConfiguration(e.to_string()),
        PromptError::CompletionError(
            e @ (CompletionError::JsonError(_) | CompletionError::ResponseError(_)),
        ) => SwarmError::ModelOutput(e.to_string()),
        other @ (PromptError::ToolError(_) | PromptError::MaxDepthError { .. }) => {
            SwarmError::ModelOutput(other.to_string())
        }
    }
}

#[async_trait]
impl ModelClient for RigModelClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn next_action(&self, request: ModelRequest<'_>) -> Result<ModelReply> {
        let (last, earlier) = request
            .history
            .split_last()
            .ok_or_else(|| SwarmError::ContextError("empty conversation history".to_string()))?;

        let preamble = render_preamble(request.agent);
        let agent = self.client.agent(&self.model).preamble(&preamble).build();

        let chat_history: Vec<Message> = earlier.iter().map(to_rig_message).collect();
        let prompt = render_message(last);

        let raw = agent
            .chat(prompt.as_str(), chat_history)
            .await
            .map_err(classify)?;

        debug!(
            thread_id = request.thread_id,
            agent = %request.agent.name(),
            response_len = raw.len(),
            "Model replied"
        );

        Ok(ModelReply::new(parse_action(&raw)))
    }
}
