use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{context::ContextSnapshot, error::Result, swarm::UsageMetadata};

/// Per-turn metadata about the final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub agent: String,
    pub model: String,
    pub steps: usize,
    pub completed_at: DateTime<Utc>,
}

/// Persisted record of one conversation thread.
///
/// `messages`, `usage` and `metadata` always have the same length: [`ThreadState::record_turn`]
/// is the only way to grow them, and deserialization rejects records where they differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThreadState")]
pub struct ThreadState {
    thread_id: String,
    messages: Vec<String>,
    usage: Vec<UsageMetadata>,
    metadata: Vec<ResponseMetadata>,
}

#[derive(Deserialize)]
struct RawThreadState {
    thread_id: String,
    #[serde(default)]
    messages: Vec<String>,
    #[serde(default)]
    usage: Vec<UsageMetadata>,
    #[serde(default)]
    metadata: Vec<ResponseMetadata>,
}

impl TryFrom<RawThreadState> for ThreadState {
    type Error = String;

    fn try_from(raw: RawThreadState) -> std::result::Result<Self, Self::Error> {
        if raw.messages.len() != raw.usage.len() || raw.messages.len() != raw.metadata.len() {
            return Err(format!(
                "thread {} has {} messages, {} usage and {} metadata entries",
                raw.thread_id,
                raw.messages.len(),
                raw.usage.len(),
                raw.metadata.len()
            ));
        }
        Ok(Self {
            thread_id: raw.thread_id,
            messages: raw.messages,
            usage: raw.usage,
            metadata: raw.metadata,
        })
    }
}

impl ThreadState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            usage: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn usage(&self) -> &[UsageMetadata] {
        &self.usage
    }

    pub fn metadata(&self) -> &[ResponseMetadata] {
        &self.metadata
    }

    pub fn turns(&self) -> usize {
        self.messages.len()
    }

    pub fn record_turn(
        &mut self,
        message: impl Into<String>,
        usage: UsageMetadata,
        metadata: ResponseMetadata,
    ) {
        self.messages.push(message.into());
        self.usage.push(usage);
        self.metadata.push(metadata);
    }
}

/// Snapshot of the full conversation (history and tool state) behind a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub context: ContextSnapshot,
    #[serde(default)]
    pub active_agent: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert-style persistence for thread records. Last writer wins.
#[async_trait]
pub trait ThreadStorage: Send + Sync {
    async fn save(&self, thread: ThreadState) -> Result<()>;
    async fn get(&self, thread_id: &str) -> Result<Option<ThreadState>>;
}

/// Upsert-style persistence for conversation checkpoints (chat logs).
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>>;
}

/// In-memory implementation of both storages
#[derive(Default)]
pub struct InMemorySessionStorage {
    threads: Arc<DashMap<String, ThreadState>>,
    checkpoints: Arc<DashMap<String, Checkpoint>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStorage for InMemorySessionStorage {
    async fn save(&self, thread: ThreadState) -> Result<()> {
        self.threads.insert(thread.thread_id.clone(), thread);
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<ThreadState>> {
        Ok(self.threads.get(thread_id).map(|entry| entry.clone()))
    }
}

#[async_trait]
impl CheckpointStorage for InMemorySessionStorage {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        self.checkpoints
            .insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.get(thread_id).map(|entry| entry.clone()))
    }
}
