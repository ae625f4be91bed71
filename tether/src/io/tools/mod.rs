//! Tool registry and executors.
//!
//! Every executor takes validated arguments and returns a [`ToolResult`];
//! failures are converted to data, never propagated as errors or panics.

use std::path::{Path, PathBuf};

use crate::core::cancel::CancelToken;
use crate::core::path::{PathError, resolve_in_root};
use crate::core::types::{FailureKind, ToolCall, ToolName, ToolResult};
use crate::io::config::ToolsConfig;
use crate::io::context::IgnoreList;

pub mod fs;
pub mod patch;
pub mod scan;
pub mod shell;

/// Shape and purpose of one tool, as presented to the model.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: ToolName,
    pub args: &'static str,
    pub description: &'static str,
}

const CATALOG: [ToolSpec; 10] = [
    ToolSpec {
        name: ToolName::Scan,
        args: r#"{"path"?: string}"#,
        description: "List files and directories under a path with per-extension counts.",
    },
    ToolSpec {
        name: ToolName::Search,
        args: r#"{"pattern": string, "path"?: string, "max_results"?: integer}"#,
        description: "Case-insensitive regex search over text files; reports file, line number and line.",
    },
    ToolSpec {
        name: ToolName::Read,
        args: r#"{"path": string, "start"?: integer, "end"?: integer, "limit"?: integer}"#,
        description: "Read an inclusive, 1-indexed line range of a file with numbered lines.",
    },
    ToolSpec {
        name: ToolName::Write,
        args: r#"{"path": string, "content": string, "overwrite"?: boolean}"#,
        description: "Create a file (and its parent directories) with the given content.",
    },
    ToolSpec {
        name: ToolName::Edit,
        args: r#"{"path": string, "old_string": string, "new_string": string}"#,
        description: "Replace the single exact occurrence of old_string in a file.",
    },
    ToolSpec {
        name: ToolName::Delete,
        args: r#"{"path": string, "confirm": boolean}"#,
        description: "Delete a file or directory tree. Requires confirm=true.",
    },
    ToolSpec {
        name: ToolName::Move,
        args: r#"{"src": string, "dst": string, "overwrite"?: boolean}"#,
        description: "Move or rename a file or directory.",
    },
    ToolSpec {
        name: ToolName::Copy,
        args: r#"{"src": string, "dst": string, "overwrite"?: boolean}"#,
        description: "Copy a file or directory tree.",
    },
    ToolSpec {
        name: ToolName::Apply,
        args: r#"{"patch"?: string, "patch_path"?: string}"#,
        description: "Apply a unified diff to existing files, given inline or as a workspace file.",
    },
    ToolSpec {
        name: ToolName::Run,
        args: r#"{"command": string, "timeout_secs"?: integer, "allow_dangerous"?: boolean}"#,
        description: "Run a shell command in the workspace root; returns exit code, stdout and stderr.",
    },
];

/// The registered tools, in presentation order.
pub fn catalog() -> &'static [ToolSpec] {
    &CATALOG
}

/// Everything an executor may consult.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    pub root: &'a Path,
    pub config: &'a ToolsConfig,
    pub ignore: &'a IgnoreList,
    pub cancel: &'a CancelToken,
}

impl ToolContext<'_> {
    /// Resolve a tool path inside the workspace, or describe why it is invalid.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolResult> {
        resolve_in_root(self.root, raw).map_err(|err| path_failure(&err))
    }
}

fn path_failure(err: &PathError) -> ToolResult {
    ToolResult::failed(FailureKind::Validation, err.to_string())
}

/// Executes one validated tool call.
pub trait ToolExecutor {
    fn execute(&self, call: &ToolCall, ctx: &ToolContext<'_>) -> ToolResult;
}

/// The built-in executors, dispatched by variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct Toolbox;

impl ToolExecutor for Toolbox {
    fn execute(&self, call: &ToolCall, ctx: &ToolContext<'_>) -> ToolResult {
        match call {
            ToolCall::Scan(args) => scan::scan(args, ctx),
            ToolCall::Search(args) => scan::search(args, ctx),
            ToolCall::Read(args) => fs::read(args, ctx),
            ToolCall::Write(args) => fs::write(args, ctx),
            ToolCall::Edit(args) => fs::edit(args, ctx),
            ToolCall::Delete(args) => fs::delete(args, ctx),
            ToolCall::Move(args) => fs::move_path(args, ctx),
            ToolCall::Copy(args) => fs::copy_path(args, ctx),
            ToolCall::Apply(args) => patch::apply(args, ctx),
            ToolCall::Run(args) => shell::run(args, ctx),
        }
    }
}

/// True when the leading bytes contain a NUL, the usual binary heuristic.
pub(crate) fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|byte| *byte == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_every_tool_once() {
        let names: Vec<ToolName> = catalog().iter().map(|spec| spec.name).collect();
        assert_eq!(names, ToolName::ALL.to_vec());
    }

    #[test]
    fn binary_detection_uses_nul_bytes() {
        assert!(looks_binary(b"abc\0def"));
        assert!(!looks_binary("héllo\n".as_bytes()));
    }
}
