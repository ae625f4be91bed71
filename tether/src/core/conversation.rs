//! Append-only conversation state for one run.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::decision::AgentDecision;
use crate::core::types::{ToolName, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Ordered turns sent to the model. Turns are only ever appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>, task: &str) -> Self {
        Self {
            messages: vec![
                Message {
                    role: Role::System,
                    content: system_prompt.into(),
                },
                Message {
                    role: Role::User,
                    content: format!("Task: {task}"),
                },
            ],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_decision(&mut self, decision: &AgentDecision) {
        self.push(Role::Assistant, decision.to_json().to_string());
    }

    /// Record a tool outcome verbatim so the model can react to it.
    pub fn push_tool_result(&mut self, tool: ToolName, result: &ToolResult) {
        let content = json!({"tool_name": tool.as_str(), "tool_result": result.to_json()});
        self.push(Role::User, content.to_string());
    }

    /// Echo a reply that failed to parse, followed by the reason, to re-prompt the model.
    pub fn push_malformed(&mut self, raw: &str, reason: &str) {
        self.push(Role::Assistant, raw.to_string());
        self.push(
            Role::User,
            format!(
                "Your previous reply was rejected: {reason}. Reply with exactly one JSON object \
                 matching the decision schema."
            ),
        );
    }

    fn push(&mut self, role: Role, content: String) {
        self.messages.push(Message { role, content });
    }
}
