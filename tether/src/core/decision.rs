//! Parsing and validation of the model's structured decision.
//!
//! The model is asked to reply with a single JSON object:
//!
//! ```json
//! {"action": "tool_call", "tool_name": "read", "tool_args": {"path": "a.txt"}, "message": "..."}
//! ```
//!
//! The raw reply crosses into typed data here and nowhere else. The top-level
//! shape is checked against [`decision_schema`], the tool name against the
//! closed [`ToolName`] set, and the arguments against the tool's typed
//! argument struct.

use jsonschema::Validator;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::core::types::{ToolCall, ToolName};

/// Why a model reply could not be turned into an [`AgentDecision`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    #[error("reply is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("reply does not match the decision schema: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("action `tool_call` requires `tool_name` and `tool_args`")]
    MissingTool,
    #[error("arguments for `{tool}` do not match its shape: {message}")]
    InvalidArgs { tool: ToolName, message: String },
}

/// What the model asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionAction {
    ToolCall(ToolCall),
    Done,
}

/// A parsed, validated model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDecision {
    pub action: DecisionAction,
    pub message: String,
    pub thinking: Option<String>,
}

impl AgentDecision {
    pub fn tool_call(&self) -> Option<&ToolCall> {
        match &self.action {
            DecisionAction::ToolCall(call) => Some(call),
            DecisionAction::Done => None,
        }
    }

    /// Canonical JSON form, used when replaying the decision into the conversation.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        match &self.action {
            DecisionAction::ToolCall(call) => {
                object.insert("action".into(), json!("tool_call"));
                object.insert("tool_name".into(), json!(call.name().as_str()));
                object.insert("tool_args".into(), call.args_json());
            }
            DecisionAction::Done => {
                object.insert("action".into(), json!("done"));
            }
        }
        object.insert("message".into(), json!(self.message));
        if let Some(thinking) = &self.thinking {
            object.insert("thinking".into(), json!(thinking));
        }
        Value::Object(object)
    }
}

/// JSON schema describing a decision, also sent to the model as its output contract.
pub fn decision_schema() -> Value {
    let mut tool_names: Vec<Value> = ToolName::ALL
        .iter()
        .map(|tool| Value::from(tool.as_str()))
        .collect();
    tool_names.push(Value::Null);
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "AgentDecision",
        "type": "object",
        "properties": {
            "action": {"type": "string", "enum": ["tool_call", "done"]},
            "tool_name": {"enum": tool_names},
            "tool_args": {"type": ["object", "null"]},
            "message": {"type": "string"},
            "thinking": {"type": ["string", "null"]}
        },
        "required": ["action", "message"],
        "additionalProperties": false
    })
}

/// Validates raw replies against the decision contract.
pub struct DecisionParser {
    validator: Validator,
}

impl Default for DecisionParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionParser {
    pub fn new() -> Self {
        let validator =
            jsonschema::validator_for(&decision_schema()).expect("decision schema is valid");
        Self { validator }
    }

    pub fn parse(&self, raw: &str) -> Result<AgentDecision, DecisionError> {
        let body = strip_fence(raw);
        let value: Value =
            serde_json::from_str(body).map_err(|err| DecisionError::InvalidJson(err.to_string()))?;

        if let Some(Value::String(name)) = value.get("tool_name")
            && ToolName::parse(name).is_none()
        {
            return Err(DecisionError::UnknownTool(name.clone()));
        }

        let violations: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(DecisionError::Schema(violations));
        }

        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let thinking = value
            .get("thinking")
            .and_then(Value::as_str)
            .map(str::to_string);

        let action = match value.get("action").and_then(Value::as_str) {
            Some("done") => DecisionAction::Done,
            _ => {
                let tool = value
                    .get("tool_name")
                    .and_then(Value::as_str)
                    .and_then(ToolName::parse)
                    .ok_or(DecisionError::MissingTool)?;
                let args = match value.get("tool_args") {
                    Some(args @ Value::Object(_)) => args.clone(),
                    _ => return Err(DecisionError::MissingTool),
                };
                let call = ToolCall::from_parts(tool, args).map_err(|err| {
                    DecisionError::InvalidArgs {
                        tool,
                        message: err.to_string(),
                    }
                })?;
                DecisionAction::ToolCall(call)
            }
        };

        Ok(AgentDecision {
            action,
            message,
            thinking,
        })
    }
}

/// Accept a reply wrapped in a fenced code block.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[open + 3..];
    let body_start = after_fence.find('\n').map_or(after_fence.len(), |idx| idx + 1);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}
