//! The agent loop: an explicit state machine over model calls and tool calls.
//!
//! ```text
//! Planning -> AwaitingDecision -> Validating -> Executing -> Recording -> Planning
//!                                                          \-> Terminated(reason)
//! ```
//!
//! Every phase runs on the caller's thread. The only blocking points are the
//! model call (bounded by the client's timeout and retry budget) and the tool
//! executor (bounded by the process timeout). Cancellation is checked at every
//! phase boundary and inside both blocking points.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::conversation::Conversation;
use crate::core::decision::{
    AgentDecision, DecisionAction, DecisionError, DecisionParser, decision_schema,
};
use crate::core::diff::inspect_patch;
use crate::core::limits::{LimitKind, RunCounters};
use crate::core::path::{display_relative, normalize_relative};
use crate::core::redact::clip;
use crate::core::types::{FailureKind, ToolCall, ToolName, ToolResult};
use crate::io::audit::{AuditEntry, AuditLog};
use crate::io::config::TetherConfig;
use crate::io::context::WorkspaceContext;
use crate::io::model::{ModelClient, ModelError, ModelRequest};
use crate::io::prompt::{PromptInputs, render_system_prompt};
use crate::io::snapshot::{Snapshot, Snapshotter};
use crate::io::tools::patch::load_patch_text;
use crate::io::tools::{ToolContext, ToolExecutor};
use crate::safety::{SafetyGate, Verdict};

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The model declared the task done.
    Success { message: String },
    LimitExceeded { limit: LimitKind },
    /// Model replies kept failing to parse.
    ProtocolError { error: String },
    /// The model could not be reached or refused the request.
    FatalError { error: String },
    Cancelled,
}

impl Termination {
    /// Stable machine-readable name.
    pub fn reason(&self) -> &'static str {
        match self {
            Termination::Success { .. } => "success",
            Termination::LimitExceeded { .. } => "limit_exceeded",
            Termination::ProtocolError { .. } => "protocol_error",
            Termination::FatalError { .. } => "fatal_error",
            Termination::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Termination::Success { .. })
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Success { .. } => write!(f, "task completed"),
            Termination::LimitExceeded { limit } => write!(f, "run limit exceeded: {limit}"),
            Termination::ProtocolError { error } => {
                write!(f, "model replies violated the decision protocol: {error}")
            }
            Termination::FatalError { error } => write!(f, "fatal error: {error}"),
            Termination::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub session_id: String,
    pub termination: Termination,
    /// Most recent non-empty `message` from the model.
    pub last_message: Option<String>,
    pub iterations: u32,
    pub tool_calls: u32,
    pub files_touched: Vec<String>,
}

/// Progress notifications for callers that render the run.
#[derive(Debug)]
pub enum AgentEvent<'e> {
    Decision {
        iteration: u32,
        decision: &'e AgentDecision,
    },
    Malformed {
        iteration: u32,
        error: &'e DecisionError,
    },
    SnapshotTaken(&'e Snapshot),
    SnapshotFailed(&'e str),
    ToolFinished {
        tool: ToolName,
        result: &'e ToolResult,
    },
}

enum Phase {
    Planning,
    AwaitingDecision(String),
    Validating(AgentDecision),
    Executing {
        decision: AgentDecision,
        call: ToolCall,
        destructive: bool,
        warnings: Vec<String>,
    },
    Recording {
        decision: AgentDecision,
        call: ToolCall,
        result: ToolResult,
        duration: Duration,
    },
    Terminated(Termination),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::AwaitingDecision(_) => "awaiting_decision",
            Phase::Validating(_) => "validating",
            Phase::Executing { .. } => "executing",
            Phase::Recording { .. } => "recording",
            Phase::Terminated(_) => "terminated",
        }
    }
}

struct RunState {
    conversation: Conversation,
    counters: RunCounters,
    malformed_streak: u32,
    last_message: Option<String>,
}

/// Everything one run needs, injected by the caller.
pub struct Agent<'a, M, T, S> {
    pub root: &'a Path,
    pub config: &'a TetherConfig,
    pub model_name: &'a str,
    pub model: &'a M,
    pub tools: &'a T,
    pub snapshots: &'a S,
    pub audit: &'a AuditLog,
    pub context: &'a WorkspaceContext,
    pub cancel: &'a CancelToken,
}

impl<M: ModelClient, T: ToolExecutor, S: Snapshotter> Agent<'_, M, T, S> {
    /// Drive `task` to a terminal state.
    ///
    /// Returns `Err` only for setup failures (unreadable root, invalid
    /// patterns, template errors). Every failure after the loop starts is a
    /// [`Termination`] in the outcome.
    #[instrument(skip_all, fields(session = self.audit.session_id(), model = self.model_name))]
    pub fn run<F: FnMut(&AgentEvent<'_>)>(&self, task: &str, mut on_event: F) -> Result<RunOutcome> {
        let started = Instant::now();
        let gate = SafetyGate::new(self.root, &self.config.safety)?;
        let parser = DecisionParser::new();
        let schema = decision_schema();
        let system_prompt = render_system_prompt(&PromptInputs {
            workspace: self.root,
            limits: &self.config.limits,
            project_context: self.context.project_context.as_deref(),
        })?;
        let mut state = RunState {
            conversation: Conversation::new(system_prompt, task),
            counters: RunCounters::new(),
            malformed_streak: 0,
            last_message: None,
        };
        info!("agent run started");

        let mut phase = Phase::Planning;
        let termination = loop {
            debug!(phase = phase.name(), "phase");
            phase = match phase {
                Phase::Planning => self.plan(&mut state, &schema),
                Phase::AwaitingDecision(raw) => {
                    self.interpret(&parser, &mut state, &raw, &mut on_event)
                }
                Phase::Validating(decision) => self.validate(&gate, &state, decision),
                Phase::Executing {
                    decision,
                    call,
                    destructive,
                    warnings,
                } => self.execute(&mut state, decision, call, destructive, warnings, &mut on_event),
                Phase::Recording {
                    decision,
                    call,
                    result,
                    duration,
                } => self.record(&mut state, &decision, &call, &result, duration, &mut on_event),
                Phase::Terminated(termination) => break termination,
            };
        };

        let outcome = RunOutcome {
            session_id: self.audit.session_id().to_string(),
            termination,
            last_message: state.last_message,
            iterations: state.counters.iterations(),
            tool_calls: state.counters.tool_calls(),
            files_touched: state
                .counters
                .touched()
                .map(display_relative)
                .collect(),
        };
        info!(
            reason = outcome.termination.reason(),
            iterations = outcome.iterations,
            tool_calls = outcome.tool_calls,
            "agent run finished"
        );
        self.record_run_summary(task, &outcome, started.elapsed());
        Ok(outcome)
    }

    /// Planning -> AwaitingDecision: one model call.
    fn plan(&self, state: &mut RunState, schema: &Value) -> Phase {
        if self.cancel.is_cancelled() {
            return Phase::Terminated(Termination::Cancelled);
        }
        if let Err(limit) = state.counters.begin_iteration(&self.config.limits) {
            return Phase::Terminated(Termination::LimitExceeded { limit });
        }
        let request = ModelRequest {
            model: self.model_name,
            messages: state.conversation.messages(),
            response_schema: schema,
            temperature: self.config.model.temperature,
        };
        let started = Instant::now();
        let reply = self.model.complete(&request, self.cancel);
        let (result, success) = match &reply {
            Ok(raw) => (json!({"reply": raw}), true),
            Err(err) => (json!({"error": err.to_string()}), false),
        };
        self.append_audit(AuditEntry {
            action: "model_call",
            inputs: &json!({
                "model": self.model_name,
                "iteration": state.counters.iterations(),
                "messages": request.messages.len(),
            }),
            result: &result,
            success,
            duration: started.elapsed(),
            warnings: &[],
        });

        match reply {
            Ok(raw) => Phase::AwaitingDecision(raw),
            Err(ModelError::Cancelled) => Phase::Terminated(Termination::Cancelled),
            Err(err) => {
                warn!(err = %err, "model call failed");
                Phase::Terminated(Termination::FatalError {
                    error: err.to_string(),
                })
            }
        }
    }

    /// AwaitingDecision -> Validating, or back to Planning with a correction.
    fn interpret<F: FnMut(&AgentEvent<'_>)>(
        &self,
        parser: &DecisionParser,
        state: &mut RunState,
        raw: &str,
        on_event: &mut F,
    ) -> Phase {
        let iteration = state.counters.iterations();
        match parser.parse(raw) {
            Ok(decision) => {
                state.malformed_streak = 0;
                if !decision.message.trim().is_empty() {
                    state.last_message = Some(decision.message.clone());
                }
                on_event(&AgentEvent::Decision {
                    iteration,
                    decision: &decision,
                });
                Phase::Validating(decision)
            }
            Err(error) => {
                state.malformed_streak += 1;
                warn!(iteration, streak = state.malformed_streak, err = %error, "malformed decision");
                on_event(&AgentEvent::Malformed {
                    iteration,
                    error: &error,
                });
                if state.malformed_streak > self.config.model.max_decision_retries {
                    return Phase::Terminated(Termination::ProtocolError {
                        error: error.to_string(),
                    });
                }
                state.conversation.push_malformed(raw, &error.to_string());
                Phase::Planning
            }
        }
    }

    /// Validating -> Executing, Recording (denied) or Terminated.
    fn validate(&self, gate: &SafetyGate, state: &RunState, decision: AgentDecision) -> Phase {
        let call = match &decision.action {
            DecisionAction::Done => {
                return Phase::Terminated(Termination::Success {
                    message: decision.message,
                });
            }
            DecisionAction::ToolCall(call) => call.clone(),
        };
        if self.cancel.is_cancelled() {
            return Phase::Terminated(Termination::Cancelled);
        }
        let limits = &self.config.limits;
        if let Err(limit) = state.counters.admit_call(limits) {
            return Phase::Terminated(Termination::LimitExceeded { limit });
        }

        match gate.evaluate(&call, &state.counters, limits) {
            Verdict::Deny { kind, reason } => {
                info!(tool = %call.name(), %reason, "tool call denied");
                Phase::Recording {
                    decision,
                    call,
                    result: ToolResult::failed(kind, reason),
                    duration: Duration::ZERO,
                }
            }
            Verdict::Allow {
                destructive,
                warnings,
            } => {
                let mutated = self.mutated_paths(&call);
                if let Err(limit) = state.counters.admit_files(limits, &mutated) {
                    return Phase::Terminated(Termination::LimitExceeded { limit });
                }
                Phase::Executing {
                    decision,
                    call,
                    destructive,
                    warnings,
                }
            }
        }
    }

    /// Executing -> Recording: snapshot if needed, then run exactly one executor.
    fn execute<F: FnMut(&AgentEvent<'_>)>(
        &self,
        state: &mut RunState,
        decision: AgentDecision,
        call: ToolCall,
        destructive: bool,
        warnings: Vec<String>,
        on_event: &mut F,
    ) -> Phase {
        let ctx = ToolContext {
            root: self.root,
            config: &self.config.tools,
            ignore: &self.context.ignore,
            cancel: self.cancel,
        };
        if destructive && self.config.safety.auto_snapshot {
            self.take_snapshot(&call, &ctx, on_event);
        }
        state.counters.record_tool_call();
        let started = Instant::now();
        let result = self.tools.execute(&call, &ctx).with_warnings(warnings);
        let duration = started.elapsed();
        if result.success() {
            state.counters.charge_files(self.charged_paths(&call, &result));
        }
        Phase::Recording {
            decision,
            call,
            result,
            duration,
        }
    }

    /// Recording -> Planning: history, audit, notification.
    fn record<F: FnMut(&AgentEvent<'_>)>(
        &self,
        state: &mut RunState,
        decision: &AgentDecision,
        call: &ToolCall,
        result: &ToolResult,
        duration: Duration,
        on_event: &mut F,
    ) -> Phase {
        state.conversation.push_decision(decision);
        state.conversation.push_tool_result(call.name(), result);
        self.append_audit(AuditEntry {
            action: call.name().as_str(),
            inputs: &call.args_json(),
            result: &result.to_json(),
            success: result.success(),
            duration,
            warnings: result.warnings(),
        });
        on_event(&AgentEvent::ToolFinished {
            tool: call.name(),
            result,
        });
        if result.kind() == Some(FailureKind::Cancelled) || self.cancel.is_cancelled() {
            return Phase::Terminated(Termination::Cancelled);
        }
        Phase::Planning
    }

    fn take_snapshot<F: FnMut(&AgentEvent<'_>)>(
        &self,
        call: &ToolCall,
        ctx: &ToolContext<'_>,
        on_event: &mut F,
    ) {
        let label = snapshot_label(call);
        let paths = self.snapshot_paths(call, ctx);
        let started = Instant::now();
        match self.snapshots.snapshot(&label, &paths) {
            Ok(snapshot) => {
                self.append_audit(AuditEntry {
                    action: "snapshot",
                    inputs: &json!({"message": label}),
                    result: &json!({"id": snapshot.id, "created_at": snapshot.created_at}),
                    success: true,
                    duration: started.elapsed(),
                    warnings: &[],
                });
                on_event(&AgentEvent::SnapshotTaken(&snapshot));
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(err = %error, "snapshot failed, continuing without one");
                self.append_audit(AuditEntry {
                    action: "snapshot",
                    inputs: &json!({"message": label}),
                    result: &json!({"error": error}),
                    success: false,
                    duration: started.elapsed(),
                    warnings: &[],
                });
                on_event(&AgentEvent::SnapshotFailed(&error));
            }
        }
    }

    /// Workspace-relative paths named by `call`, captured even when gitignored.
    fn snapshot_paths(&self, call: &ToolCall, ctx: &ToolContext<'_>) -> Vec<String> {
        let mut raws: Vec<String> = call.paths().into_iter().map(str::to_string).collect();
        if let ToolCall::Apply(args) = call
            && let Ok(text) = load_patch_text(args, ctx)
            && let Ok(targets) = inspect_patch(&text)
        {
            raws.extend(targets.files);
        }
        self.normalized(raws.iter().map(String::as_str))
            .iter()
            .filter(|path| !path.as_os_str().is_empty())
            .map(|path| display_relative(path))
            .collect()
    }

    /// Files a `write` or `edit` would mutate, for the touched-file limit.
    fn mutated_paths(&self, call: &ToolCall) -> Vec<PathBuf> {
        match call {
            ToolCall::Write(args) => self.normalized([args.path.as_str()]),
            ToolCall::Edit(args) => self.normalized([args.path.as_str()]),
            _ => Vec::new(),
        }
    }

    /// Files to charge after a successful mutation.
    fn charged_paths(&self, call: &ToolCall, result: &ToolResult) -> Vec<PathBuf> {
        match call {
            ToolCall::Apply(_) => {
                let fields = result.fields();
                let files: Vec<&str> = fields
                    .get("files_touched")
                    .and_then(Value::as_array)
                    .map(|files| files.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                self.normalized(files)
            }
            _ => self.mutated_paths(call),
        }
    }

    fn normalized<'p>(&self, raws: impl IntoIterator<Item = &'p str>) -> Vec<PathBuf> {
        raws.into_iter()
            .filter_map(|raw| normalize_relative(self.root, raw).ok())
            .collect()
    }

    fn record_run_summary(&self, task: &str, outcome: &RunOutcome, duration: Duration) {
        let mut result = json!({
            "termination": outcome.termination.reason(),
            "detail": outcome.termination.to_string(),
            "iterations": outcome.iterations,
            "tool_calls": outcome.tool_calls,
            "files_touched": outcome.files_touched,
        });
        if let Some(message) = &outcome.last_message {
            result["message"] = json!(message);
        }
        self.append_audit(AuditEntry {
            action: "agent_run",
            inputs: &json!({"task": task, "model": self.model_name}),
            result: &result,
            success: outcome.termination.is_success(),
            duration,
            warnings: &[],
        });
    }

    fn append_audit(&self, entry: AuditEntry<'_>) {
        if let Err(err) = self.audit.append(entry) {
            warn!(err = %format!("{err:#}"), action = entry.action, "failed to write audit record");
        }
    }
}

fn snapshot_label(call: &ToolCall) -> String {
    match call {
        ToolCall::Run(args) => format!("before run: {}", clip(&args.command, 80)),
        ToolCall::Apply(args) => match &args.patch_path {
            Some(path) => format!("before apply {path}"),
            None => "before apply (inline patch)".to_string(),
        },
        other => format!("before {} {}", other.name(), other.paths().join(" -> ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::limits::RunLimits;
    use crate::io::audit::{AuditRecord, read_records};
    use crate::io::tools::Toolbox;
    use crate::test_support::{RecordingSnapshotter, ScriptedModel, ScriptedReply, ToolFixture};

    struct Harness {
        fixture: ToolFixture,
        config: TetherConfig,
        audit: AuditLog,
        context: WorkspaceContext,
        cancel: CancelToken,
        _logs: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let logs = tempfile::tempdir().expect("log dir");
            Self {
                fixture: ToolFixture::new(),
                config: TetherConfig::default(),
                audit: AuditLog::new(logs.path(), "run-test"),
                context: WorkspaceContext::default(),
                cancel: CancelToken::new(),
                _logs: logs,
            }
        }

        fn with_limits(mut self, limits: RunLimits) -> Self {
            self.config.limits = limits;
            self
        }

        fn run_with(&self, model: &ScriptedModel, snapshots: &RecordingSnapshotter) -> RunOutcome {
            let agent = Agent {
                root: self.fixture.root(),
                config: &self.config,
                model_name: "gpt-4.1",
                model,
                tools: &Toolbox,
                snapshots,
                audit: &self.audit,
                context: &self.context,
                cancel: &self.cancel,
            };
            agent.run("test task", |_| {}).expect("run")
        }

        fn run(&self, model: &ScriptedModel) -> RunOutcome {
            self.run_with(model, &RecordingSnapshotter::new())
        }

        fn records(&self) -> Vec<AuditRecord> {
            read_records(&self.audit.current_path()).expect("audit records")
        }

        fn tool_records(&self) -> Vec<AuditRecord> {
            self.records()
                .into_iter()
                .filter(|record| ToolName::parse(&record.action).is_some())
                .collect()
        }
    }

    fn tool_call(tool: &str, args: Value) -> ScriptedReply {
        ScriptedReply::json(json!({
            "action": "tool_call",
            "tool_name": tool,
            "tool_args": args,
            "message": format!("calling {tool}"),
        }))
    }

    fn done(message: &str) -> ScriptedReply {
        ScriptedReply::json(json!({"action": "done", "message": message}))
    }

    fn limits(iterations: u32, calls: u32, files: u32) -> RunLimits {
        RunLimits {
            max_iterations: iterations,
            max_tool_calls_per_session: calls,
            max_files_touched_per_run: files,
        }
    }

    #[test]
    fn rename_scenario_moves_file_and_audits_once() {
        let harness = Harness::new();
        harness.fixture.file("a.txt", "original");
        let model = ScriptedModel::new(vec![
            tool_call("move", json!({"src": "a.txt", "dst": "b.txt"})),
            done("renamed"),
        ]);
        let outcome = harness.run(&model);

        assert_eq!(
            outcome.termination,
            Termination::Success {
                message: "renamed".to_string()
            }
        );
        assert!(!harness.fixture.path("a.txt").exists());
        assert_eq!(harness.fixture.read("b.txt"), "original");
        let tools = harness.tool_records();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].action, "move");
        assert!(tools[0].success);
    }

    #[test]
    fn done_on_first_reply_runs_no_tools() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![done("nothing to do")]);
        let outcome = harness.run(&model);
        assert!(outcome.termination.is_success());
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.tool_calls, 0);
        assert_eq!(outcome.last_message.as_deref(), Some("nothing to do"));
    }

    #[test]
    fn tool_result_is_fed_back_before_next_model_call() {
        let harness = Harness::new();
        harness.fixture.file("a.txt", "alpha\n");
        let model = ScriptedModel::new(vec![
            tool_call("read", json!({"path": "a.txt"})),
            done("read it"),
        ]);
        harness.run(&model);
        let second = &model.requests()[1];
        let last: Value = serde_json::from_str(&second.last().expect("message").content)
            .expect("tool result json");
        assert_eq!(last["tool_name"], "read");
        assert_eq!(last["tool_result"]["success"], true);
        assert!(
            last["tool_result"]["result"]["content"]
                .as_str()
                .expect("content")
                .contains("alpha")
        );
    }

    #[test]
    fn repeated_malformed_replies_end_in_protocol_error() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![ScriptedReply::Text("not json".to_string())]);
        let outcome = harness.run(&model);
        assert!(matches!(
            outcome.termination,
            Termination::ProtocolError { .. }
        ));
        let retries = harness.config.model.max_decision_retries as usize;
        assert_eq!(model.calls(), retries + 1);
    }

    #[test]
    fn malformed_reply_is_corrected_by_reprompt() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![
            ScriptedReply::json(json!({"action": "tool_call", "tool_name": "teleport", "tool_args": {}, "message": ""})),
            done("fixed"),
        ]);
        let outcome = harness.run(&model);
        assert!(outcome.termination.is_success());
        let reprompt = &model.requests()[1];
        assert!(
            reprompt
                .last()
                .expect("message")
                .content
                .contains("unknown tool `teleport`")
        );
    }

    #[test]
    fn adversarial_model_stops_at_iteration_limit() {
        let harness = Harness::new().with_limits(limits(4, 100, 5));
        let model = ScriptedModel::new(vec![tool_call("scan", json!({}))]);
        let outcome = harness.run(&model);
        assert_eq!(
            outcome.termination,
            Termination::LimitExceeded {
                limit: LimitKind::Iterations
            }
        );
        assert_eq!(model.calls(), 4);
        assert_eq!(outcome.tool_calls, 4);
    }

    #[test]
    fn tool_call_cap_terminates_run() {
        let harness = Harness::new().with_limits(limits(10, 2, 5));
        let model = ScriptedModel::new(vec![tool_call("scan", json!({}))]);
        let outcome = harness.run(&model);
        assert_eq!(
            outcome.termination,
            Termination::LimitExceeded {
                limit: LimitKind::ToolCalls
            }
        );
        assert_eq!(outcome.tool_calls, 2);
        assert_eq!(model.calls(), 3);
    }

    #[test]
    fn touched_file_cap_stops_before_mutating() {
        let harness = Harness::new().with_limits(limits(10, 10, 1));
        let model = ScriptedModel::new(vec![
            tool_call("write", json!({"path": "a.txt", "content": "1"})),
            tool_call("write", json!({"path": "a.txt", "content": "2", "overwrite": true})),
            tool_call("write", json!({"path": "b.txt", "content": "3"})),
        ]);
        let outcome = harness.run(&model);
        assert_eq!(
            outcome.termination,
            Termination::LimitExceeded {
                limit: LimitKind::FilesTouched
            }
        );
        assert_eq!(harness.fixture.read("a.txt"), "2");
        assert!(!harness.fixture.path("b.txt").exists());
        assert_eq!(outcome.files_touched, vec!["a.txt".to_string()]);
    }

    #[test]
    fn denied_call_at_full_file_budget_is_recoverable() {
        let harness = Harness::new().with_limits(limits(10, 10, 1));
        harness.fixture.file("c.txt", "existing");
        let model = ScriptedModel::new(vec![
            tool_call("write", json!({"path": "a.txt", "content": "1"})),
            tool_call("write", json!({"path": "c.txt", "content": "clobber"})),
            done("left c.txt alone"),
        ]);
        let outcome = harness.run(&model);
        assert!(outcome.termination.is_success(), "{:?}", outcome.termination);
        assert_eq!(outcome.tool_calls, 1);
        assert_eq!(harness.fixture.read("c.txt"), "existing");
        let tools = harness.tool_records();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1].result["kind"], "safety_denied");
    }

    #[test]
    fn denied_call_is_recorded_and_run_continues() {
        let harness = Harness::new();
        harness.fixture.file("a.txt", "keep me");
        let model = ScriptedModel::new(vec![
            tool_call("write", json!({"path": "a.txt", "content": "clobber"})),
            done("gave up"),
        ]);
        let outcome = harness.run(&model);
        assert!(outcome.termination.is_success());
        assert_eq!(outcome.tool_calls, 0);
        assert_eq!(harness.fixture.read("a.txt"), "keep me");
        let tools = harness.tool_records();
        assert_eq!(tools.len(), 1);
        assert!(!tools[0].success);
        assert_eq!(tools[0].result["kind"], "safety_denied");
    }

    #[test]
    fn dangerous_command_is_denied_without_override() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![
            tool_call("run", json!({"command": "rm -rf /"})),
            done("stopped"),
        ]);
        let outcome = harness.run(&model);
        assert_eq!(outcome.tool_calls, 0);
        let record = &harness.tool_records()[0];
        assert!(!record.success);
        assert!(
            record.result["error"]
                .as_str()
                .expect("error")
                .contains("recursive_root_deletion")
        );
    }

    #[test]
    fn destructive_calls_are_snapshotted_first() {
        let harness = Harness::new();
        harness.fixture.file("a.txt", "x");
        let model = ScriptedModel::new(vec![
            tool_call("scan", json!({})),
            tool_call("edit", json!({"path": "a.txt", "old_string": "x", "new_string": "y"})),
            done("edited"),
        ]);
        let snapshots = RecordingSnapshotter::new();
        harness.run_with(&model, &snapshots);
        assert_eq!(snapshots.messages(), vec!["before edit a.txt".to_string()]);
        assert_eq!(snapshots.paths(), vec![vec!["a.txt".to_string()]]);
        let actions: Vec<String> = harness
            .records()
            .into_iter()
            .map(|record| record.action)
            .filter(|action| action != "model_call")
            .collect();
        assert_eq!(actions, vec!["scan", "snapshot", "edit", "agent_run"]);
    }

    #[test]
    fn snapshots_name_every_path_the_call_touches() {
        let harness = Harness::new();
        harness.fixture.file("a.txt", "x\n");
        let model = ScriptedModel::new(vec![
            tool_call("copy", json!({"src": "./a.txt", "dst": "sub/b.txt"})),
            tool_call(
                "apply",
                json!({"patch": "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-x\n+y\n"}),
            ),
            done("copied and patched"),
        ]);
        let snapshots = RecordingSnapshotter::new();
        harness.run_with(&model, &snapshots);
        assert_eq!(
            snapshots.paths(),
            vec![
                vec!["a.txt".to_string(), "sub/b.txt".to_string()],
                vec!["a.txt".to_string()],
            ]
        );
    }

    #[test]
    fn snapshots_are_skipped_when_disabled() {
        let mut harness = Harness::new();
        harness.config.safety.auto_snapshot = false;
        let model = ScriptedModel::new(vec![
            tool_call("write", json!({"path": "a.txt", "content": "x"})),
            done("written"),
        ]);
        let snapshots = RecordingSnapshotter::new();
        harness.run_with(&model, &snapshots);
        assert!(snapshots.messages().is_empty());
        assert_eq!(harness.fixture.read("a.txt"), "x");
    }

    #[test]
    fn snapshot_failure_does_not_block_the_action() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![
            tool_call("write", json!({"path": "a.txt", "content": "x"})),
            done("written"),
        ]);
        let outcome = harness.run_with(&model, &RecordingSnapshotter::failing());
        assert!(outcome.termination.is_success());
        assert_eq!(harness.fixture.read("a.txt"), "x");
        let snapshot = harness
            .records()
            .into_iter()
            .find(|record| record.action == "snapshot")
            .expect("snapshot record");
        assert!(!snapshot.success);
    }

    #[test]
    fn overridden_dangerous_command_carries_warning() {
        let harness = Harness::new();
        harness.fixture.file("build.sh", "echo hi\n");
        let model = ScriptedModel::new(vec![
            tool_call(
                "run",
                json!({"command": "chmod 777 build.sh", "allow_dangerous": true}),
            ),
            done("done"),
        ]);
        let snapshots = RecordingSnapshotter::new();
        harness.run_with(&model, &snapshots);
        assert_eq!(snapshots.messages().len(), 1);
        let record = &harness.tool_records()[0];
        assert!(record.success);
        assert!(record.warnings[0].contains("world_writable_permissions"));
    }

    #[test]
    fn transport_failure_is_fatal() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![ScriptedReply::Error(ModelError::FatalTransport {
            attempts: 3,
            last_error: "connection refused".to_string(),
        })]);
        let outcome = harness.run(&model);
        assert!(matches!(outcome.termination, Termination::FatalError { .. }));
        let summary = harness
            .records()
            .into_iter()
            .find(|record| record.action == "agent_run")
            .expect("summary");
        assert_eq!(summary.result["termination"], "fatal_error");
        assert!(!summary.success);
    }

    #[test]
    fn cancellation_between_iterations_stops_the_run() {
        let harness = Harness::new();
        harness.fixture.file("a.txt", "x");
        let model = ScriptedModel::new(vec![tool_call(
            "write",
            json!({"path": "b.txt", "content": "never"}),
        )])
        .cancel_after(1);
        let outcome = harness.run(&model);
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.tool_calls, 0);
        assert!(!harness.fixture.path("b.txt").exists());
    }

    #[test]
    fn tool_records_carry_session_and_arguments() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![
            tool_call("write", json!({"path": "cfg.txt", "content": "x"})),
            done("ok"),
        ]);
        harness.run(&model);
        let record = &harness.tool_records()[0];
        assert_eq!(record.inputs["path"], "cfg.txt");
        assert_eq!(record.session_id, "run-test");
    }
}
