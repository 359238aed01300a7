use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    agent::{Agent, AgentAction, ModelClient, ModelRequest, TokenUsage},
    context::{ChatMessage, Context},
    error::{Result, SwarmError, ToolError},
    retry::RetryPolicy,
};

pub const DEFAULT_MAX_STEPS: usize = 12;

/// Counters for one invocation, persisted with every thread turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub model_calls: u32,
    pub tool_calls: u32,
    pub handoffs: u32,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

impl UsageMetadata {
    fn record_tokens(&mut self, usage: TokenUsage) {
        if let Some(n) = usage.input_tokens {
            self.input_tokens = Some(self.input_tokens.unwrap_or(0) + n);
        }
        if let Some(n) = usage.output_tokens {
            self.output_tokens = Some(self.output_tokens.unwrap_or(0) + n);
        }
    }
}

/// Result of a completed invocation
#[derive(Debug, Clone)]
pub struct SwarmOutcome {
    pub response: String,
    /// Agent that produced the response
    pub agent: String,
    pub steps: usize,
    pub usage: UsageMetadata,
}

/// A set of agents with exactly one active at a time.
///
/// Each invocation starts at the default agent and loops: the active agent answers,
/// calls a tool, or hands off, until it answers or `max_steps` model calls are spent.
pub struct Swarm {
    pub id: String,
    agents: HashMap<String, Arc<Agent>>,
    default_agent: String,
    model: Arc<dyn ModelClient>,
    max_steps: usize,
    retry: RetryPolicy,
}

impl Swarm {
    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn agent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get_agent(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    fn agent(&self, name: &str) -> Result<Arc<Agent>> {
        self.get_agent(name)
            .ok_or_else(|| SwarmError::AgentNotFound(name.to_string()))
    }

    /// Run one user turn. The context must already hold the new user message.
    pub async fn invoke(&self, thread_id: &str, context: &Context) -> Result<SwarmOutcome> {
        let mut active = self.agent(&self.default_agent)?;
        let mut usage = UsageMetadata::default();

        for step in 1..=self.max_steps {
            let history = context.get_all_messages().await;
            debug!(
                thread_id,
                agent = %active.name(),
                step,
                history_len = history.len(),
                "Invoking agent"
            );

            let reply = self
                .retry
                .run("model call", || {
                    self.model.next_action(ModelRequest {
                        agent: active.as_ref(),
                        history: &history,
                        thread_id,
                    })
                })
                .await?;
            usage.model_calls += 1;
            usage.record_tokens(reply.usage);

            match reply.action {
                AgentAction::Respond { text } => {
                    info!(thread_id, agent = %active.name(), step, "Agent responded");
                    context
                        .add_message(ChatMessage::assistant(active.name(), text.clone()))
                        .await;
                    return Ok(SwarmOutcome {
                        response: text,
                        agent: active.name().to_string(),
                        steps: step,
                        usage,
                    });
                }
                AgentAction::InvokeTool { name, arguments } => {
                    usage.tool_calls += 1;
                    let directive = AgentAction::invoke_tool(name.clone(), arguments.clone());
                    context
                        .add_message(ChatMessage::assistant(
                            active.name(),
                            serde_json::to_string(&directive)?,
                        ))
                        .await;

                    let result = self
                        .run_tool(&active, &name, arguments, context, thread_id)
                        .await?;
                    context
                        .add_message(ChatMessage::tool(active.name(), &name, result))
                        .await;
                }
                AgentAction::Handoff { target, reason } => {
                    let directive = AgentAction::Handoff {
                        target: target.clone(),
                        reason: reason.clone(),
                    };
                    context
                        .add_message(ChatMessage::assistant(
                            active.name(),
                            serde_json::to_string(&directive)?,
                        ))
                        .await;

                    let transfer = format!("transfer_to_{}", target);
                    if !active.can_hand_off_to(&target) {
                        warn!(
                            thread_id,
                            from = %active.name(),
                            to = %target,
                            "Rejected handoff to a target the agent may not use"
                        );
                        let allowed: Vec<&str> =
                            active.handoffs().iter().map(|h| h.agent.as_str()).collect();
                        let note = json!({
                            "error": "handoff_not_permitted",
                            "message": format!(
                                "{} cannot transfer to '{}'. Allowed targets: {}",
                                active.name(),
                                target,
                                allowed.join(", ")
                            ),
                        });
                        context
                            .add_message(ChatMessage::tool(active.name(), &transfer, note.to_string()))
                            .await;
                        continue;
                    }

                    let next = self.agent(&target)?;
                    info!(
                        thread_id,
                        from = %active.name(),
                        to = %next.name(),
                        reason = ?reason,
                        step,
                        "Handoff"
                    );
                    usage.handoffs += 1;
                    context
                        .add_message(ChatMessage::tool(
                            active.name(),
                            &transfer,
                            format!("Successfully transferred to {}", next.name()),
                        ))
                        .await;
                    active = next;
                }
            }
        }

        warn!(
            thread_id,
            agent = %active.name(),
            limit = self.max_steps,
            "Step limit exceeded"
        );
        Err(SwarmError::StepLimitExceeded {
            limit: self.max_steps,
            agent: active.name().to_string(),
        })
    }

    /// Execute a tool and render its outcome as the content of a tool message.
    ///
    /// Domain failures become content the agent can react to; malformed arguments and
    /// exhausted upstream retries end the invocation.
    async fn run_tool(
        &self,
        agent: &Agent,
        name: &str,
        arguments: Value,
        context: &Context,
        thread_id: &str,
    ) -> Result<String> {
        let Some(tool) = agent.tool(name) else {
            warn!(thread_id, agent = %agent.name(), tool = %name, "Unknown tool requested");
            let note = json!({
                "error": "unknown_tool",
                "message": format!(
                    "Tool '{}' is not available to {}. Available tools: {}",
                    name,
                    agent.name(),
                    agent.tool_names().join(", ")
                ),
            });
            return Ok(note.to_string());
        };

        let policy = if tool.read_only() {
            self.retry.clone()
        } else {
            RetryPolicy::none()
        };

        let outcome = policy
            .run(name, || async {
                match tool.call(arguments.clone(), context).await {
                    Err(ToolError::Unavailable(message)) => Err(SwarmError::Upstream(message)),
                    other => Ok(other),
                }
            })
            .await?;

        match outcome {
            Ok(value) => {
                debug!(thread_id, tool = %name, "Tool call succeeded");
                Ok(value.to_string())
            }
            Err(ToolError::NotFound(message)) => {
                info!(thread_id, tool = %name, %message, "Tool found nothing");
                Ok(json!({ "error": "not_found", "message": message }).to_string())
            }
            Err(ToolError::PreconditionFailed(message)) => {
                info!(thread_id, tool = %name, %message, "Tool precondition not met");
                Ok(json!({ "error": "precondition_failed", "message": message }).to_string())
            }
            Err(ToolError::InvalidArguments(message)) => Err(SwarmError::InvalidToolArguments {
                tool: name.to_string(),
                message,
            }),
            Err(ToolError::Unavailable(message)) => Err(SwarmError::Upstream(message)),
            Err(ToolError::Failed(message)) => Err(SwarmError::ToolFailed {
                tool: name.to_string(),
                message,
            }),
        }
    }
}

/// Builder for creating swarms
pub struct SwarmBuilder {
    id: String,
    agents: Vec<Agent>,
    default_agent: Option<String>,
    model: Option<Arc<dyn ModelClient>>,
    max_steps: usize,
    retry: RetryPolicy,
}

impl SwarmBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agents: Vec::new(),
            default_agent: None,
            model: None,
            max_steps: DEFAULT_MAX_STEPS,
            retry: RetryPolicy::default(),
        }
    }

    /// The first agent added becomes the default unless `set_default_agent` says otherwise.
    pub fn add_agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn set_default_agent(mut self, name: impl Into<String>) -> Self {
        self.default_agent = Some(name.into());
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the routing graph and build the swarm.
    pub fn build(self) -> Result<Swarm> {
        let model = self.model.ok_or_else(|| {
            SwarmError::InvalidConfiguration("a model client is required".to_string())
        })?;
        if self.max_steps == 0 {
            return Err(SwarmError::InvalidConfiguration(
                "max_steps must be at least 1".to_string(),
            ));
        }
        let default_agent = self
            .default_agent
            .or_else(|| self.agents.first().map(|a| a.name().to_string()))
            .ok_or_else(|| {
                SwarmError::InvalidConfiguration("a swarm needs at least one agent".to_string())
            })?;

        let mut agents = HashMap::new();
        for agent in self.agents {
            let name = agent.name().to_string();
            if agents.insert(name.clone(), Arc::new(agent)).is_some() {
                return Err(SwarmError::InvalidConfiguration(format!(
                    "duplicate agent name '{}'",
                    name
                )));
            }
        }

        if !agents.contains_key(&default_agent) {
            return Err(SwarmError::AgentNotFound(default_agent));
        }
        for agent in agents.values() {
            for handoff in agent.handoffs() {
                if handoff.agent == agent.name() {
                    return Err(SwarmError::InvalidConfiguration(format!(
                        "agent '{}' cannot hand off to itself",
                        agent.name()
                    )));
                }
                if !agents.contains_key(&handoff.agent) {
                    return Err(SwarmError::InvalidConfiguration(format!(
                        "agent '{}' hands off to unknown agent '{}'",
                        agent.name(),
                        handoff.agent
                    )));
                }
            }
        }

        Ok(Swarm {
            id: self.id,
            agents,
            default_agent,
            model,
            max_steps: self.max_steps,
            retry: self.retry,
        })
    }
}
