//! `apply`: unified diffs through the external `patch` utility.
//!
//! A `--dry-run` pass always runs first; the mutating pass only runs when the
//! dry run reports that every hunk applies.

use std::fs;
use std::process::Command;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use super::ToolContext;
use crate::core::diff::inspect_patch;
use crate::core::types::{ApplyArgs, FailureKind, ToolResult};
use crate::io::process::{CommandOutput, executable_on_path, run_command_with_timeout};

const PATCH_PROGRAM: &str = "patch";
const PATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Patch text from whichever argument was given.
pub fn load_patch_text(args: &ApplyArgs, ctx: &ToolContext<'_>) -> Result<String, ToolResult> {
    match (&args.patch_path, &args.patch) {
        (Some(_), Some(_)) | (None, None) => Err(ToolResult::failed(
            FailureKind::Validation,
            "provide exactly one of patch_path or patch",
        )),
        (None, Some(text)) => Ok(text.clone()),
        (Some(raw), None) => {
            let path = ctx.resolve(raw)?;
            fs::read_to_string(&path).map_err(|err| {
                ToolResult::failed(FailureKind::Execution, format!("read patch {raw}: {err}"))
            })
        }
    }
}

pub fn apply(args: &ApplyArgs, ctx: &ToolContext<'_>) -> ToolResult {
    let text = match load_patch_text(args, ctx) {
        Ok(text) => text,
        Err(failure) => return failure,
    };
    let targets = match inspect_patch(&text) {
        Ok(targets) => targets,
        Err(err) => return ToolResult::failed(FailureKind::Validation, err.to_string()),
    };
    if !executable_on_path(PATCH_PROGRAM) {
        return ToolResult::failed(
            FailureKind::MissingDependency,
            "the `patch` utility is not installed",
        );
    }

    let dry_run = match run_patch(&text, targets.strip, true, ctx) {
        Ok(output) => output,
        Err(failure) => return failure,
    };
    if !dry_run.status.success() {
        warn!(exit_code = ?dry_run.status.code(), "patch dry run failed");
        return ToolResult::failed(
            FailureKind::Execution,
            format!(
                "patch dry run failed, nothing was changed:\n{}{}",
                dry_run.stdout_text(),
                dry_run.stderr_text()
            ),
        );
    }

    let applied = match run_patch(&text, targets.strip, false, ctx) {
        Ok(output) => output,
        Err(failure) => return failure,
    };
    if !applied.status.success() {
        return ToolResult::failed(
            FailureKind::Execution,
            format!(
                "patch failed after a clean dry run:\n{}{}",
                applied.stdout_text(),
                applied.stderr_text()
            ),
        );
    }
    debug!(files = targets.files.len(), strip = targets.strip, "patch applied");
    ToolResult::ok(json!({
        "files_touched": targets.files,
        "strip_level": targets.strip,
        "output": applied.stdout_text().trim_end(),
    }))
}

fn run_patch(
    text: &str,
    strip: u32,
    dry_run: bool,
    ctx: &ToolContext<'_>,
) -> Result<CommandOutput, ToolResult> {
    let mut cmd = Command::new(PATCH_PROGRAM);
    cmd.arg(format!("-p{strip}"))
        .args(["--batch", "--forward"])
        .current_dir(ctx.root);
    if dry_run {
        cmd.arg("--dry-run");
    }
    let output = run_command_with_timeout(
        cmd,
        Some(text.as_bytes()),
        PATCH_TIMEOUT,
        ctx.config.output_limit_bytes,
        ctx.cancel,
    )
    .map_err(|err| ToolResult::failed(FailureKind::Execution, format!("run patch: {err:#}")))?;
    if output.cancelled {
        return Err(ToolResult::failed(FailureKind::Cancelled, "patch cancelled"));
    }
    if output.timed_out {
        return Err(ToolResult::failed(FailureKind::Timeout, "patch timed out"));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ToolFixture;

    const PATCH: &str = "--- a/greeting.txt\n+++ b/greeting.txt\n@@ -1,2 +1,2 @@\n hello\n-world\n+there\n";

    fn inline(patch: &str) -> ApplyArgs {
        ApplyArgs {
            patch_path: None,
            patch: Some(patch.to_string()),
        }
    }

    #[test]
    fn applies_inline_patch() {
        if !executable_on_path(PATCH_PROGRAM) {
            return;
        }
        let fixture = ToolFixture::new();
        fixture.file("greeting.txt", "hello\nworld\n");
        let result = apply(&inline(PATCH), &fixture.ctx());
        assert!(result.success(), "{:?}", result.error());
        assert_eq!(fixture.read("greeting.txt"), "hello\nthere\n");
        assert_eq!(result.fields()["files_touched"], json!(["greeting.txt"]));
    }

    #[test]
    fn applies_patch_file() {
        if !executable_on_path(PATCH_PROGRAM) {
            return;
        }
        let fixture = ToolFixture::new();
        fixture.file("greeting.txt", "hello\nworld\n");
        fixture.file("fix.diff", PATCH);
        let args = ApplyArgs {
            patch_path: Some("fix.diff".to_string()),
            patch: None,
        };
        assert!(apply(&args, &fixture.ctx()).success());
        assert_eq!(fixture.read("greeting.txt"), "hello\nthere\n");
    }

    #[test]
    fn failed_dry_run_leaves_file_untouched() {
        if !executable_on_path(PATCH_PROGRAM) {
            return;
        }
        let fixture = ToolFixture::new();
        fixture.file("greeting.txt", "something else entirely\n");
        let result = apply(&inline(PATCH), &fixture.ctx());
        assert_eq!(result.kind(), Some(FailureKind::Execution));
        assert!(result.error().expect("error").contains("dry run failed"));
        assert_eq!(fixture.read("greeting.txt"), "something else entirely\n");
        assert!(!fixture.path("greeting.txt.rej").exists());
    }

    #[test]
    fn requires_exactly_one_source() {
        let fixture = ToolFixture::new();
        let both = ApplyArgs {
            patch_path: Some("x.diff".to_string()),
            patch: Some(PATCH.to_string()),
        };
        assert_eq!(
            apply(&both, &fixture.ctx()).kind(),
            Some(FailureKind::Validation)
        );
        let neither = ApplyArgs {
            patch_path: None,
            patch: None,
        };
        assert_eq!(
            apply(&neither, &fixture.ctx()).kind(),
            Some(FailureKind::Validation)
        );
    }
}
