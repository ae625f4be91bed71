//! Listing and searching executors.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::RegexBuilder;
use serde_json::{Value, json};
use walkdir::{DirEntry, WalkDir};

use super::{ToolContext, looks_binary};
use crate::core::path::display_relative;
use crate::core::redact::clip;
use crate::core::types::{FailureKind, ScanArgs, SearchArgs, ToolResult};

const MATCH_LINE_CHARS: usize = 200;

/// Walk `start` depth-first in name order, pruning ignored entries.
fn walk<'a>(start: &Path, ctx: &'a ToolContext<'a>) -> impl Iterator<Item = DirEntry> + 'a {
    let root = ctx.root;
    let ignore = ctx.ignore;
    WalkDir::new(start)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| {
            let relative = relative_to(root, entry.path());
            !ignore.is_ignored(&relative, entry.file_type().is_dir())
        })
        .filter_map(Result::ok)
}

fn relative_to(root: &Path, path: &Path) -> String {
    display_relative(path.strip_prefix(root).unwrap_or(path))
}

pub fn scan(args: &ScanArgs, ctx: &ToolContext<'_>) -> ToolResult {
    let start = match ctx.resolve(&args.path) {
        Ok(path) => path,
        Err(failure) => return failure,
    };
    if !start.is_dir() {
        return ToolResult::failed(
            FailureKind::Execution,
            format!("not a directory: {}", args.path),
        );
    }

    let cap = ctx.config.scan_listing_cap;
    let mut files = 0usize;
    let mut directories = 0usize;
    let mut extensions: BTreeMap<String, usize> = BTreeMap::new();
    let mut entries: Vec<String> = Vec::new();
    for entry in walk(&start, ctx) {
        let mut relative = relative_to(ctx.root, entry.path());
        if entry.file_type().is_dir() {
            directories += 1;
            relative.push('/');
        } else {
            files += 1;
            let extension = entry
                .path()
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "(none)".to_string());
            *extensions.entry(extension).or_default() += 1;
        }
        if entries.len() < cap {
            entries.push(relative);
        }
    }

    ToolResult::ok(json!({
        "path": args.path,
        "files": files,
        "directories": directories,
        "extensions": extensions,
        "entries": entries,
        "truncated": files + directories > cap,
    }))
}

pub fn search(args: &SearchArgs, ctx: &ToolContext<'_>) -> ToolResult {
    let regex = match RegexBuilder::new(&args.pattern)
        .case_insensitive(true)
        .build()
    {
        Ok(regex) => regex,
        Err(err) => {
            return ToolResult::failed(
                FailureKind::Validation,
                format!("invalid pattern: {err}"),
            );
        }
    };
    let start = match ctx.resolve(&args.path) {
        Ok(path) => path,
        Err(failure) => return failure,
    };
    if !start.exists() {
        return ToolResult::failed(
            FailureKind::Execution,
            format!("path not found: {}", args.path),
        );
    }

    let max_results = args
        .max_results
        .filter(|max| *max > 0)
        .unwrap_or(ctx.config.max_search_results)
        .min(ctx.config.max_search_results);
    let candidates: Vec<std::path::PathBuf> = if start.is_file() {
        vec![start]
    } else {
        walk(&start, ctx)
            .filter(|entry| entry.file_type().is_file())
            .map(DirEntry::into_path)
            .collect()
    };

    let mut matches: Vec<Value> = Vec::new();
    let mut total_matches = 0usize;
    let mut files_searched = 0usize;
    for path in candidates {
        let Ok(bytes) = fs::read(&path) else {
            continue;
        };
        if looks_binary(&bytes) {
            continue;
        }
        files_searched += 1;
        let text = String::from_utf8_lossy(&bytes);
        let file = relative_to(ctx.root, &path);
        for (idx, line) in text.lines().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            total_matches += 1;
            if matches.len() < max_results {
                matches.push(json!({
                    "file": file,
                    "line": idx + 1,
                    "text": clip(line.trim_end(), MATCH_LINE_CHARS),
                }));
            }
        }
    }

    ToolResult::ok(json!({
        "pattern": args.pattern,
        "matches": matches,
        "total_matches": total_matches,
        "truncated": total_matches > max_results,
        "files_searched": files_searched,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::ToolsConfig;
    use crate::test_support::ToolFixture;

    fn scan_root(fixture: &ToolFixture) -> ToolResult {
        scan(
            &ScanArgs {
                path: ".".to_string(),
            },
            &fixture.ctx(),
        )
    }

    #[test]
    fn scan_counts_files_and_extensions() {
        let fixture = ToolFixture::new();
        fixture.file("src/main.rs", "fn main() {}");
        fixture.file("src/lib.rs", "");
        fixture.file("README", "hi");
        fixture.file(".hidden", "x");
        fixture.file("target/debug/out", "x");
        let result = scan_root(&fixture);
        let fields = result.fields();
        assert_eq!(fields["files"], 3);
        assert_eq!(fields["directories"], 1);
        assert_eq!(fields["extensions"], json!({"rs": 2, "(none)": 1}));
        assert_eq!(
            fields["entries"],
            json!(["README", "src/", "src/lib.rs", "src/main.rs"])
        );
        assert_eq!(fields["truncated"], false);
    }

    #[test]
    fn scan_honors_ignore_list_and_cap() {
        let mut fixture = ToolFixture::new().with_ignore("*.log\n");
        fixture.config = ToolsConfig {
            scan_listing_cap: 2,
            ..ToolsConfig::default()
        };
        for name in ["a.txt", "b.txt", "c.txt", "debug.log"] {
            fixture.file(name, "x");
        }
        let result = scan_root(&fixture);
        let fields = result.fields();
        assert_eq!(fields["files"], 3);
        assert_eq!(fields["entries"], json!(["a.txt", "b.txt"]));
        assert_eq!(fields["truncated"], true);
    }

    #[test]
    fn search_is_case_insensitive_and_reports_lines() {
        let fixture = ToolFixture::new();
        fixture.file("a.rs", "fn main() {\n    TODO: fix\n}\n");
        fixture.file("b.bin", "todo\0binary");
        let result = search(
            &SearchArgs {
                pattern: "todo".to_string(),
                path: ".".to_string(),
                max_results: None,
            },
            &fixture.ctx(),
        );
        let fields = result.fields();
        assert_eq!(
            fields["matches"],
            json!([{"file": "a.rs", "line": 2, "text": "    TODO: fix"}])
        );
        assert_eq!(fields["files_searched"], 1);
    }

    #[test]
    fn search_caps_results_and_flags_truncation() {
        let fixture = ToolFixture::new();
        fixture.file("many.txt", &"hit\n".repeat(10));
        let result = search(
            &SearchArgs {
                pattern: "hit".to_string(),
                path: "many.txt".to_string(),
                max_results: Some(3),
            },
            &fixture.ctx(),
        );
        let fields = result.fields();
        assert_eq!(fields["matches"].as_array().map(Vec::len), Some(3));
        assert_eq!(fields["total_matches"], 10);
        assert_eq!(fields["truncated"], true);
    }

    #[test]
    fn search_rejects_invalid_regex() {
        let fixture = ToolFixture::new();
        let result = search(
            &SearchArgs {
                pattern: "(".to_string(),
                path: ".".to_string(),
                max_results: None,
            },
            &fixture.ctx(),
        );
        assert_eq!(result.kind(), Some(FailureKind::Validation));
    }
}
