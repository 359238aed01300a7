use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

/// Who produced a message in the shared history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

/// One entry of the conversation history shared by every agent in a swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Agent that emitted the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Tool (or transfer) the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            agent: None,
            tool: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn assistant(agent: &str, content: impl Into<String>) -> Self {
        Self {
            agent: Some(agent.to_string()),
            ..Self::new(MessageRole::Assistant, content)
        }
    }

    /// Result of a tool call (or a transfer note) addressed to `agent`.
    pub fn tool(agent: &str, tool: &str, content: impl Into<String>) -> Self {
        Self {
            agent: Some(agent.to_string()),
            tool: Some(tool.to_string()),
            ..Self::new(MessageRole::Tool, content)
        }
    }
}

/// Serializable copy of a [`Context`], used for checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Per-thread conversation state: the shared message history plus a key-value store
/// tools use to remember progress between calls.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
    messages: Arc<RwLock<Vec<ChatMessage>>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            messages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn from_snapshot(snapshot: ContextSnapshot) -> Self {
        Self {
            data: Arc::new(snapshot.data.into_iter().collect()),
            messages: Arc::new(RwLock::new(snapshot.messages)),
        }
    }

    pub async fn snapshot(&self) -> ContextSnapshot {
        let data = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        ContextSnapshot {
            data,
            messages: self.messages.read().await.clone(),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    pub fn get_sync<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub async fn add_message(&self, message: ChatMessage) {
        self.messages.write().await.push(message);
    }

    pub async fn add_user_message(&self, content: impl Into<String>) {
        self.add_message(ChatMessage::user(content)).await;
    }

    pub async fn get_all_messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    pub async fn get_last_messages(&self, n: usize) -> Vec<ChatMessage> {
        let messages = self.messages.read().await;
        let start = messages.len().saturating_sub(n);
        messages[start..].to_vec()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Progress {
        step: u32,
    }

    #[tokio::test]
    async fn typed_values_round_trip() {
        let context = Context::new();
        context.set("progress", Progress { step: 2 }).await.unwrap();

        let progress: Progress = context.get("progress").await.unwrap();
        assert_eq!(progress, Progress { step: 2 });
        assert!(context.get::<Progress>("missing").await.is_none());
    }

    #[tokio::test]
    async fn snapshot_restores_data_and_history() {
        let context = Context::new();
        context.set("policy_number", "POL-1").await.unwrap();
        context.add_user_message("hello").await;
        context
            .add_message(ChatMessage::assistant("report_analyst", "hi there"))
            .await;

        let snapshot = context.snapshot().await;
        let restored = Context::from_snapshot(snapshot.clone());

        assert_eq!(restored.snapshot().await, snapshot);
        assert_eq!(restored.message_count().await, 2);
        let last = restored.get_last_messages(1).await;
        assert_eq!(last[0].agent.as_deref(), Some("report_analyst"));
    }

    #[tokio::test]
    async fn last_messages_saturates() {
        let context = Context::new();
        context.add_user_message("only one").await;
        assert_eq!(context.get_last_messages(10).await.len(), 1);
    }
}
