//! File executors: read, write, edit, delete, move, copy.

use std::fs;
use std::io;
use std::path::Path;

use serde_json::json;
use tracing::debug;
use walkdir::WalkDir;

use super::{ToolContext, looks_binary};
use crate::core::types::{
    DeleteArgs, EditArgs, FailureKind, ReadArgs, ToolResult, TransferArgs, WriteArgs,
};

fn execution(message: impl Into<String>) -> ToolResult {
    ToolResult::failed(FailureKind::Execution, message)
}

fn validation(message: impl Into<String>) -> ToolResult {
    ToolResult::failed(FailureKind::Validation, message)
}

fn io_failure(action: &str, path: &str, err: &io::Error) -> ToolResult {
    execution(format!("{action} {path}: {err}"))
}

pub fn read(args: &ReadArgs, ctx: &ToolContext<'_>) -> ToolResult {
    let path = match ctx.resolve(&args.path) {
        Ok(path) => path,
        Err(failure) => return failure,
    };
    if !path.exists() {
        return execution(format!("file not found: {}", args.path));
    }
    if path.is_dir() {
        return execution(format!("{} is a directory; use scan", args.path));
    }
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => return io_failure("read", &args.path, &err),
    };
    if looks_binary(&bytes) {
        return execution(format!("{} is a binary file", args.path));
    }
    if args.start == 0 {
        return validation("start must be >= 1");
    }

    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len();
    if args.start > total.max(1) {
        return execution(format!(
            "start line {} is past the end of {} ({total} lines)",
            args.start, args.path
        ));
    }
    if let Some(end) = args.end
        && end < args.start
    {
        return validation(format!(
            "end ({end}) must not be before start ({})",
            args.start
        ));
    }
    if args.limit == Some(0) {
        return validation("limit must be >= 1");
    }
    let end = args
        .end
        .or_else(|| args.limit.map(|limit| args.start.saturating_add(limit - 1)))
        .unwrap_or(total)
        .min(total);
    let content = lines
        .iter()
        .enumerate()
        .skip(args.start - 1)
        .take(end.saturating_sub(args.start - 1))
        .map(|(idx, line)| format!("{:>6}\t{line}", idx + 1))
        .collect::<Vec<_>>()
        .join("\n");

    ToolResult::ok(json!({
        "path": args.path,
        "content": content,
        "start": args.start,
        "end": end,
        "total_lines": total,
    }))
}

pub fn write(args: &WriteArgs, ctx: &ToolContext<'_>) -> ToolResult {
    let path = match ctx.resolve(&args.path) {
        Ok(path) => path,
        Err(failure) => return failure,
    };
    if path.is_dir() {
        return execution(format!("{} is a directory", args.path));
    }
    let existed = path.exists();
    if existed && !args.overwrite {
        return execution(format!("{} already exists", args.path));
    }
    if let Some(parent) = path.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        return io_failure("create parent of", &args.path, &err);
    }
    if let Err(err) = fs::write(&path, args.content.as_bytes()) {
        return io_failure("write", &args.path, &err);
    }
    debug!(path = %args.path, bytes = args.content.len(), "file written");
    ToolResult::ok(json!({
        "path": args.path,
        "bytes_written": args.content.len(),
        "created": !existed,
    }))
}

pub fn edit(args: &EditArgs, ctx: &ToolContext<'_>) -> ToolResult {
    let path = match ctx.resolve(&args.path) {
        Ok(path) => path,
        Err(failure) => return failure,
    };
    if args.old_string.is_empty() {
        return validation("old_string must not be empty");
    }
    if !path.is_file() {
        return execution(format!("file not found: {}", args.path));
    }
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) => return io_failure("read", &args.path, &err),
    };
    match content.matches(args.old_string.as_str()).count() {
        0 => {
            return execution(format!("old_string not found in {}", args.path));
        }
        1 => {}
        count => {
            return execution(format!(
                "old_string matches {count} times in {}; include more surrounding text so it is unique",
                args.path
            ));
        }
    }
    let updated = content.replacen(args.old_string.as_str(), &args.new_string, 1);
    if let Err(err) = fs::write(&path, updated.as_bytes()) {
        return io_failure("write", &args.path, &err);
    }
    ToolResult::ok(json!({
        "path": args.path,
        "replacements": 1,
        "bytes_written": updated.len(),
    }))
}

pub fn delete(args: &DeleteArgs, ctx: &ToolContext<'_>) -> ToolResult {
    let path = match ctx.resolve(&args.path) {
        Ok(path) => path,
        Err(failure) => return failure,
    };
    if path == ctx.root {
        return validation("refusing to delete the workspace root");
    }
    if !args.confirm {
        return validation("delete requires confirm=true");
    }
    let metadata = match fs::symlink_metadata(&path) {
        Ok(metadata) => metadata,
        Err(_) => return execution(format!("path not found: {}", args.path)),
    };
    let (kind, removed) = if metadata.is_dir() {
        ("directory", fs::remove_dir_all(&path))
    } else {
        ("file", fs::remove_file(&path))
    };
    if let Err(err) = removed {
        return io_failure("delete", &args.path, &err);
    }
    ToolResult::ok(json!({"path": args.path, "kind": kind}))
}

pub fn move_path(args: &TransferArgs, ctx: &ToolContext<'_>) -> ToolResult {
    let (src, dst) = match prepare_transfer(args, ctx) {
        Ok(paths) => paths,
        Err(failure) => return failure,
    };
    if let Err(err) = fs::rename(&src, &dst) {
        return io_failure("move", &args.src, &err);
    }
    ToolResult::ok(json!({"src": args.src, "dst": args.dst}))
}

pub fn copy_path(args: &TransferArgs, ctx: &ToolContext<'_>) -> ToolResult {
    let (src, dst) = match prepare_transfer(args, ctx) {
        Ok(paths) => paths,
        Err(failure) => return failure,
    };
    let copied = if src.is_dir() {
        copy_tree(&src, &dst)
    } else {
        fs::copy(&src, &dst)
    };
    match copied {
        Ok(bytes) => ToolResult::ok(json!({
            "src": args.src,
            "dst": args.dst,
            "bytes_copied": bytes,
        })),
        Err(err) => io_failure("copy", &args.src, &err),
    }
}

/// Resolve both ends, clear an overwritable destination, and create its parent.
fn prepare_transfer(
    args: &TransferArgs,
    ctx: &ToolContext<'_>,
) -> Result<(std::path::PathBuf, std::path::PathBuf), ToolResult> {
    let src = ctx.resolve(&args.src)?;
    let dst = ctx.resolve(&args.dst)?;
    if !src.exists() {
        return Err(execution(format!("source not found: {}", args.src)));
    }
    if src == ctx.root || dst == ctx.root {
        return Err(validation("the workspace root cannot be moved or copied"));
    }
    if src == dst || dst.starts_with(&src) {
        return Err(validation(format!(
            "destination {} is inside source {}",
            args.dst, args.src
        )));
    }
    if dst.exists() {
        if !args.overwrite {
            return Err(execution(format!("{} already exists", args.dst)));
        }
        let cleared = if dst.is_dir() {
            fs::remove_dir_all(&dst)
        } else {
            fs::remove_file(&dst)
        };
        cleared.map_err(|err| io_failure("replace", &args.dst, &err))?;
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|err| io_failure("create parent of", &args.dst, &err))?;
    }
    Ok((src, dst))
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut bytes = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            bytes += fs::copy(entry.path(), &target)?;
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ToolFixture;

    #[test]
    fn read_returns_numbered_window() {
        let fixture = ToolFixture::new();
        fixture.file("notes.txt", "one\ntwo\nthree\nfour\n");
        let result = read(
            &ReadArgs {
                path: "notes.txt".to_string(),
                start: 2,
                end: Some(3),
                limit: None,
            },
            &fixture.ctx(),
        );
        assert!(result.success());
        let fields = result.fields();
        assert_eq!(fields["content"], "     2\ttwo\n     3\tthree");
        assert_eq!(fields["total_lines"], 4);
        assert_eq!(fields["end"], 3);
    }

    #[test]
    fn read_limit_is_clamped_to_file_length() {
        let fixture = ToolFixture::new();
        fixture.file("a.txt", "x\ny\n");
        let result = read(
            &ReadArgs {
                path: "a.txt".to_string(),
                start: 2,
                end: None,
                limit: Some(10),
            },
            &fixture.ctx(),
        );
        assert_eq!(result.fields()["end"], 2);
    }

    #[test]
    fn read_with_huge_limit_reads_to_end_of_file() {
        let fixture = ToolFixture::new();
        fixture.file("a.txt", "x\ny\nz\n");
        let result = read(
            &ReadArgs {
                path: "a.txt".to_string(),
                start: 2,
                end: None,
                limit: Some(usize::MAX),
            },
            &fixture.ctx(),
        );
        assert!(result.success());
        assert_eq!(result.fields()["end"], 3);
        assert_eq!(result.fields()["content"], "     2\ty\n     3\tz");
    }

    #[test]
    fn read_errors_on_missing_file_and_bad_start() {
        let fixture = ToolFixture::new();
        fixture.file("a.txt", "x\n");
        let missing = read(
            &ReadArgs {
                path: "nope.txt".to_string(),
                start: 1,
                end: None,
                limit: None,
            },
            &fixture.ctx(),
        );
        assert_eq!(missing.kind(), Some(FailureKind::Execution));
        let past_end = read(
            &ReadArgs {
                path: "a.txt".to_string(),
                start: 5,
                end: None,
                limit: None,
            },
            &fixture.ctx(),
        );
        assert!(!past_end.success());
        assert!(past_end.error().expect("error").contains("past the end"));
    }

    #[test]
    fn write_creates_parents() {
        let fixture = ToolFixture::new();
        let result = write(
            &WriteArgs {
                path: "deep/dir/new.txt".to_string(),
                content: "hello".to_string(),
                overwrite: false,
            },
            &fixture.ctx(),
        );
        assert!(result.success());
        assert_eq!(result.fields()["bytes_written"], 5);
        assert_eq!(fixture.read("deep/dir/new.txt"), "hello");
    }

    #[test]
    fn write_refuses_existing_file_without_overwrite() {
        let fixture = ToolFixture::new();
        fixture.file("a.txt", "keep");
        let result = write(
            &WriteArgs {
                path: "a.txt".to_string(),
                content: "clobber".to_string(),
                overwrite: false,
            },
            &fixture.ctx(),
        );
        assert!(!result.success());
        assert_eq!(fixture.read("a.txt"), "keep");
    }

    #[test]
    fn edit_replaces_unique_match() {
        let fixture = ToolFixture::new();
        fixture.file("lib.rs", "fn a() {}\nfn b() {}\n");
        let result = edit(
            &EditArgs {
                path: "lib.rs".to_string(),
                old_string: "fn b()".to_string(),
                new_string: "fn c()".to_string(),
            },
            &fixture.ctx(),
        );
        assert!(result.success());
        assert_eq!(fixture.read("lib.rs"), "fn a() {}\nfn c() {}\n");
    }

    #[test]
    fn edit_leaves_file_unchanged_on_zero_or_many_matches() {
        let fixture = ToolFixture::new();
        let original = "let x = 1;\nlet x = 1;\n";
        fixture.file("dup.rs", original);
        for old in ["let x = 1;", "let y = 2;"] {
            let result = edit(
                &EditArgs {
                    path: "dup.rs".to_string(),
                    old_string: old.to_string(),
                    new_string: "changed".to_string(),
                },
                &fixture.ctx(),
            );
            assert!(!result.success(), "{old}");
            assert_eq!(fixture.read("dup.rs"), original);
        }
    }

    #[test]
    fn delete_requires_confirmation() {
        let fixture = ToolFixture::new();
        fixture.file("a.txt", "x");
        let denied = delete(
            &DeleteArgs {
                path: "a.txt".to_string(),
                confirm: false,
            },
            &fixture.ctx(),
        );
        assert!(!denied.success());
        assert!(fixture.path("a.txt").exists());

        let removed = delete(
            &DeleteArgs {
                path: "a.txt".to_string(),
                confirm: true,
            },
            &fixture.ctx(),
        );
        assert!(removed.success());
        assert!(!fixture.path("a.txt").exists());
    }

    #[test]
    fn delete_removes_directories() {
        let fixture = ToolFixture::new();
        fixture.file("dir/inner/a.txt", "x");
        let result = delete(
            &DeleteArgs {
                path: "dir".to_string(),
                confirm: true,
            },
            &fixture.ctx(),
        );
        assert_eq!(result.fields()["kind"], "directory");
        assert!(!fixture.path("dir").exists());
    }

    #[test]
    fn move_renames_file() {
        let fixture = ToolFixture::new();
        fixture.file("a.txt", "payload");
        let result = move_path(
            &TransferArgs {
                src: "a.txt".to_string(),
                dst: "sub/b.txt".to_string(),
                overwrite: false,
            },
            &fixture.ctx(),
        );
        assert!(result.success());
        assert!(!fixture.path("a.txt").exists());
        assert_eq!(fixture.read("sub/b.txt"), "payload");
    }

    #[test]
    fn copy_duplicates_directory_tree() {
        let fixture = ToolFixture::new();
        fixture.file("src/a.txt", "abc");
        fixture.file("src/nested/b.txt", "de");
        let result = copy_path(
            &TransferArgs {
                src: "src".to_string(),
                dst: "backup".to_string(),
                overwrite: false,
            },
            &fixture.ctx(),
        );
        assert!(result.success());
        assert_eq!(result.fields()["bytes_copied"], 5);
        assert_eq!(fixture.read("backup/nested/b.txt"), "de");
        assert_eq!(fixture.read("src/a.txt"), "abc");
    }

    #[test]
    fn escaping_paths_fail_validation() {
        let fixture = ToolFixture::new();
        let result = write(
            &WriteArgs {
                path: "../outside.txt".to_string(),
                content: "x".to_string(),
                overwrite: false,
            },
            &fixture.ctx(),
        );
        assert_eq!(result.kind(), Some(FailureKind::Validation));
    }
}
