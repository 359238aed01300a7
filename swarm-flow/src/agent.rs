use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::{
    context::ChatMessage,
    error::Result,
    tool::{Tool, ToolDescriptor},
};

/// The one thing an agent may do on each step of a swarm invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// Answer the user directly; ends the invocation
    Respond { text: String },
    /// Call one of the active agent's tools
    InvokeTool {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    /// Transfer control to another agent
    Handoff {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl AgentAction {
    pub fn respond(text: impl Into<String>) -> Self {
        AgentAction::Respond { text: text.into() }
    }

    pub fn invoke_tool(name: impl Into<String>, arguments: Value) -> Self {
        AgentAction::InvokeTool {
            name: name.into(),
            arguments,
        }
    }

    pub fn handoff(target: impl Into<String>) -> Self {
        AgentAction::Handoff {
            target: target.into(),
            reason: None,
        }
    }
}

/// A permitted transfer target and when to use it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandoffTarget {
    pub agent: String,
    pub description: String,
}

/// A statically configured agent: instruction, tool set and permitted handoffs.
///
/// Agents hold no conversation state; everything they know comes from the shared
/// history handed to the model client on each step.
pub struct Agent {
    name: String,
    instruction: String,
    tools: Vec<Arc<dyn Tool>>,
    handoffs: Vec<HandoffTarget>,
}

impl Agent {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            tools: Vec::new(),
            handoffs: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_handoff(mut self, agent: impl Into<String>, description: impl Into<String>) -> Self {
        self.handoffs.push(HandoffTarget {
            agent: agent.into(),
            description: description.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn handoffs(&self) -> &[HandoffTarget] {
        &self.handoffs
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn can_hand_off_to(&self, agent: &str) -> bool {
        self.handoffs.iter().any(|h| h.agent == agent)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("tools", &self.tool_names())
            .field("handoffs", &self.handoffs)
            .finish()
    }
}

/// Token accounting reported by a model client, when it has any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Everything the model sees for one step.
#[derive(Debug)]
pub struct ModelRequest<'a> {
    pub agent: &'a Agent,
    pub history: &'a [ChatMessage],
    pub thread_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct ModelReply {
    pub action: AgentAction,
    pub usage: TokenUsage,
}

impl ModelReply {
    pub fn new(action: AgentAction) -> Self {
        Self {
            action,
            usage: TokenUsage::default(),
        }
    }
}

/// The only non-deterministic input of the router.
///
/// Implementations return `SwarmError::Upstream` for transient failures so the router
/// can retry them.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn next_action(&self, request: ModelRequest<'_>) -> Result<ModelReply>;
}
