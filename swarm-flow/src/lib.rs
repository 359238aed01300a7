pub mod agent;
pub mod context;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod runner;
pub mod storage;
pub mod storage_postgres;
pub mod swarm;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tool;

#[cfg(feature = "rig")]
pub mod rig_client;

// Re-export commonly used types
pub use agent::{Agent, AgentAction, HandoffTarget, ModelClient, ModelReply, ModelRequest, TokenUsage};
pub use context::{ChatMessage, Context, ContextSnapshot, MessageRole};
pub use error::{Result, SwarmError, ToolError};
pub use retry::RetryPolicy;
pub use runner::{AskOutcome, SwarmRunner};
pub use storage::{
    Checkpoint, CheckpointStorage, InMemorySessionStorage, ResponseMetadata, ThreadState,
    ThreadStorage,
};
pub use storage_postgres::PostgresSessionStorage;
pub use swarm::{Swarm, SwarmBuilder, SwarmOutcome, UsageMetadata};
pub use tool::{Tool, ToolDescriptor, parse_arguments};

#[cfg(feature = "rig")]
pub use rig_client::RigModelClient;
