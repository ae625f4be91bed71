//! `run`: shell commands with a hard timeout.

use std::io::ErrorKind;
use std::process::Command;

use serde_json::json;

use super::ToolContext;
use crate::core::types::{FailureKind, RunArgs, ToolResult};
use crate::io::process::run_command_with_timeout;

pub fn run(args: &RunArgs, ctx: &ToolContext<'_>) -> ToolResult {
    if args.command.trim().is_empty() {
        return ToolResult::failed(FailureKind::Validation, "command must not be empty");
    }
    let timeout = ctx.config.command_timeout(args.timeout_secs);
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&args.command).current_dir(ctx.root);

    let output = match run_command_with_timeout(
        cmd,
        None,
        timeout,
        ctx.config.output_limit_bytes,
        ctx.cancel,
    ) {
        Ok(output) => output,
        Err(err) => {
            let missing = err
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == ErrorKind::NotFound);
            let kind = if missing {
                FailureKind::MissingDependency
            } else {
                FailureKind::Execution
            };
            return ToolResult::failed(kind, format!("spawn shell: {err:#}"));
        }
    };

    if output.cancelled {
        return ToolResult::failed(FailureKind::Cancelled, "command cancelled");
    }
    if output.timed_out {
        let partial = output.stdout_text();
        let mut message = format!("command timed out after {}s", timeout.as_secs());
        if !partial.trim().is_empty() {
            message.push_str(&format!("; partial stdout:\n{partial}"));
        }
        return ToolResult::failed(FailureKind::Timeout, message);
    }

    ToolResult::ok(json!({
        "command": args.command,
        "exit_code": output.status.code(),
        "stdout": output.stdout_text(),
        "stderr": output.stderr_text(),
    }))
}
