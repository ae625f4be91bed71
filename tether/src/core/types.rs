//! Shared types for tool calls and their outcomes.
//!
//! These types define the contract between the orchestrator, the safety gate,
//! and the tool executors. Argument structs are strict: unknown fields are
//! rejected so a decision that does not match a tool's declared shape fails
//! at parse time rather than at execution time.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of tools the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolName {
    Scan,
    Search,
    Read,
    Write,
    Edit,
    Delete,
    Move,
    Copy,
    Apply,
    Run,
}

impl ToolName {
    pub const ALL: [ToolName; 10] = [
        ToolName::Scan,
        ToolName::Search,
        ToolName::Read,
        ToolName::Write,
        ToolName::Edit,
        ToolName::Delete,
        ToolName::Move,
        ToolName::Copy,
        ToolName::Apply,
        ToolName::Run,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::Scan => "scan",
            ToolName::Search => "search",
            ToolName::Read => "read",
            ToolName::Write => "write",
            ToolName::Edit => "edit",
            ToolName::Delete => "delete",
            ToolName::Move => "move",
            ToolName::Copy => "copy",
            ToolName::Apply => "apply",
            ToolName::Run => "run",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_root() -> String {
    ".".to_string()
}

fn default_start() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanArgs {
    #[serde(default = "default_root")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchArgs {
    pub pattern: String,
    #[serde(default = "default_root")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

/// Inclusive, 1-indexed line window. `end` wins over `limit` when both are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadArgs {
    pub path: String,
    #[serde(default = "default_start")]
    pub start: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteArgs {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditArgs {
    #[serde(alias = "filepath")]
    pub path: String,
    pub old_string: String,
    pub new_string: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteArgs {
    #[serde(alias = "filepath")]
    pub path: String,
    #[serde(default)]
    pub confirm: bool,
}

/// Arguments shared by `move` and `copy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferArgs {
    pub src: String,
    pub dst: String,
    #[serde(default)]
    pub overwrite: bool,
}

/// Exactly one of `patch_path` or `patch` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplyArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunArgs {
    pub command: String,
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub allow_dangerous: bool,
}

/// A validated request to invoke one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Scan(ScanArgs),
    Search(SearchArgs),
    Read(ReadArgs),
    Write(WriteArgs),
    Edit(EditArgs),
    Delete(DeleteArgs),
    Move(TransferArgs),
    Copy(TransferArgs),
    Apply(ApplyArgs),
    Run(RunArgs),
}

impl ToolCall {
    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::Scan(_) => ToolName::Scan,
            ToolCall::Search(_) => ToolName::Search,
            ToolCall::Read(_) => ToolName::Read,
            ToolCall::Write(_) => ToolName::Write,
            ToolCall::Edit(_) => ToolName::Edit,
            ToolCall::Delete(_) => ToolName::Delete,
            ToolCall::Move(_) => ToolName::Move,
            ToolCall::Copy(_) => ToolName::Copy,
            ToolCall::Apply(_) => ToolName::Apply,
            ToolCall::Run(_) => ToolName::Run,
        }
    }

    /// Deserialize `args` into the argument shape declared for `name`.
    pub fn from_parts(name: ToolName, args: Value) -> Result<Self, serde_json::Error> {
        Ok(match name {
            ToolName::Scan => ToolCall::Scan(serde_json::from_value(args)?),
            ToolName::Search => ToolCall::Search(serde_json::from_value(args)?),
            ToolName::Read => ToolCall::Read(serde_json::from_value(args)?),
            ToolName::Write => ToolCall::Write(serde_json::from_value(args)?),
            ToolName::Edit => ToolCall::Edit(serde_json::from_value(args)?),
            ToolName::Delete => ToolCall::Delete(serde_json::from_value(args)?),
            ToolName::Move => ToolCall::Move(serde_json::from_value(args)?),
            ToolName::Copy => ToolCall::Copy(serde_json::from_value(args)?),
            ToolName::Apply => ToolCall::Apply(serde_json::from_value(args)?),
            ToolName::Run => ToolCall::Run(serde_json::from_value(args)?),
        })
    }

    /// Arguments as a JSON object, for conversation history and the audit log.
    pub fn args_json(&self) -> Value {
        let value = match self {
            ToolCall::Scan(args) => serde_json::to_value(args),
            ToolCall::Search(args) => serde_json::to_value(args),
            ToolCall::Read(args) => serde_json::to_value(args),
            ToolCall::Write(args) => serde_json::to_value(args),
            ToolCall::Edit(args) => serde_json::to_value(args),
            ToolCall::Delete(args) => serde_json::to_value(args),
            ToolCall::Move(args) | ToolCall::Copy(args) => serde_json::to_value(args),
            ToolCall::Apply(args) => serde_json::to_value(args),
            ToolCall::Run(args) => serde_json::to_value(args),
        };
        value.unwrap_or(Value::Null)
    }

    /// Workspace-relative paths named by the arguments, in argument order.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            ToolCall::Scan(args) => vec![args.path.as_str()],
            ToolCall::Search(args) => vec![args.path.as_str()],
            ToolCall::Read(args) => vec![args.path.as_str()],
            ToolCall::Write(args) => vec![args.path.as_str()],
            ToolCall::Edit(args) => vec![args.path.as_str()],
            ToolCall::Delete(args) => vec![args.path.as_str()],
            ToolCall::Move(args) | ToolCall::Copy(args) => {
                vec![args.src.as_str(), args.dst.as_str()]
            }
            ToolCall::Apply(args) => args.patch_path.as_deref().into_iter().collect(),
            ToolCall::Run(_) => Vec::new(),
        }
    }
}

/// Classification of a failed tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad arguments caught before execution.
    Validation,
    /// The safety gate refused the action.
    SafetyDenied,
    /// The executor ran and failed (file not found, ambiguous edit, ...).
    Execution,
    /// The process or operation exceeded its time budget.
    Timeout,
    /// A required external executable is not installed.
    MissingDependency,
    /// The run was cancelled while the tool was executing.
    Cancelled,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::SafetyDenied => "safety_denied",
            FailureKind::Execution => "execution",
            FailureKind::Timeout => "timeout",
            FailureKind::MissingDependency => "missing_dependency",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

/// Uniform outcome of any executor.
///
/// Constructed only through [`ToolResult::ok`] and [`ToolResult::failed`], so
/// exactly one of `result` / `error` is populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

impl ToolResult {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            kind: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            kind: Some(kind),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn kind(&self) -> Option<FailureKind> {
        self.kind
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Top-level fields of the result object (empty on failure).
    pub fn fields(&self) -> Map<String, Value> {
        match &self.result {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
