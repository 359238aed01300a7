//! Text protocol between the router and a chat-style language model.
//!
//! The model is told which tools and handoff targets the active agent has and asked to
//! answer with a single JSON action object when it wants to act. Anything that does not
//! parse as an action is taken as the agent's direct reply to the user.

use crate::agent::{Agent, AgentAction};
use crate::context::{ChatMessage, MessageRole};

/// Build the system preamble for one agent.
pub fn render_preamble(agent: &Agent) -> String {
    let mut preamble = format!(
        "You are {}.\n\n{}\n\n",
        agent.name(),
        agent.instruction().trim()
    );

    preamble.push_str("### Tools\n");
    if agent.tools().is_empty() {
        preamble.push_str("You have no tools.\n");
    }
    for tool in agent.tool_descriptors() {
        preamble.push_str(&format!(
            "- {}: {}\n  arguments schema: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }

    preamble.push_str("\n### Agents you may transfer to\n");
    if agent.handoffs().is_empty() {
        preamble.push_str("None.\n");
    }
    for handoff in agent.handoffs() {
        preamble.push_str(&format!("- {}: {}\n", handoff.agent, handoff.description));
    }

    preamble.push_str(
        r#"
### How to act
To call a tool, respond with ONLY this JSON:
{"action": "invoke_tool", "name": "<tool name>", "arguments": { ... }}

To transfer the conversation to another agent, respond with ONLY this JSON:
{"action": "handoff", "target": "<agent name>", "reason": "<why>"}

Otherwise answer the user in plain text. Do not mix text and JSON in one response.
Tool results are shown to you as messages starting with [tool result: <name>].
"#,
    );

    preamble
}

/// Render a history entry as the text the model sees.
pub fn render_message(message: &ChatMessage) -> String {
    match message.role {
        MessageRole::Tool => format!(
            "[tool result: {}] {}",
            message.tool.as_deref().unwrap_or("unknown"),
            message.content
        ),
        MessageRole::System => format!("[SYSTEM] {}", message.content),
        MessageRole::User | MessageRole::Assistant => message.content.clone(),
    }
}

/// Interpret raw model output as an [`AgentAction`].
pub fn parse_action(raw: &str) -> AgentAction {
    let trimmed = raw.trim();
    let unfenced = strip_code_fence(trimmed);

    if let Ok(action) = serde_json::from_str::<AgentAction>(unfenced) {
        return action;
    }

    // Some models wrap the object in a sentence; accept it when the braces hold an action.
    if let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) {
        if start < end {
            if let Ok(action) = serde_json::from_str::<AgentAction>(&unfenced[start..=end]) {
                return action;
            }
        }
    }

    AgentAction::respond(trimmed)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
