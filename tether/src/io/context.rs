//! Workspace context handed to the core as plain data.
//!
//! - `TETHER.md`: free-text project context injected into the system prompt.
//! - `.tetherignore`: one glob per line, `#` comments, trailing `/` marks a
//!   directory-only pattern. Honored by `scan` and `search`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::{debug, warn};

pub const PROJECT_CONTEXT_FILE: &str = "TETHER.md";
pub const IGNORE_FILE: &str = ".tetherignore";

/// Directories skipped by every listing regardless of the ignore file.
const BUILTIN_SKIP_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
    ".idea",
    ".vscode",
];

#[derive(Debug, Clone)]
struct IgnoreRule {
    pattern: Pattern,
    dir_only: bool,
    anchored: bool,
}

/// Compiled ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    rules: Vec<IgnoreRule>,
}

impl IgnoreList {
    /// Parse ignore-file contents. Invalid globs are skipped with a warning.
    pub fn parse(contents: &str) -> Self {
        let rules = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let dir_only = line.ends_with('/');
                let body = line.trim_end_matches('/').trim_start_matches('/');
                match Pattern::new(body) {
                    Ok(pattern) => Some(IgnoreRule {
                        pattern,
                        dir_only,
                        anchored: body.contains('/'),
                    }),
                    Err(err) => {
                        warn!(pattern = line, err = %err, "skipping invalid ignore pattern");
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether a workspace-relative entry (`/`-separated) should be skipped.
    pub fn is_ignored(&self, relative: &str, is_dir: bool) -> bool {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        if name.starts_with('.') && name != "." {
            return true;
        }
        if is_dir && BUILTIN_SKIP_DIRS.contains(&name) {
            return true;
        }
        self.rules.iter().any(|rule| {
            if rule.dir_only && !is_dir {
                return false;
            }
            if rule.anchored {
                rule.pattern.matches(relative)
            } else {
                rule.pattern.matches(name)
            }
        })
    }
}

/// Persisted state read from the workspace root.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceContext {
    pub project_context: Option<String>,
    pub ignore: IgnoreList,
}

impl WorkspaceContext {
    pub fn load(root: &Path) -> Result<Self> {
        let project_context = read_optional(&root.join(PROJECT_CONTEXT_FILE))?
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        let ignore = read_optional(&root.join(IGNORE_FILE))?
            .map(|text| IgnoreList::parse(&text))
            .unwrap_or_default();
        debug!(
            has_project_context = project_context.is_some(),
            ignore_patterns = ignore.len(),
            "workspace context loaded"
        );
        Ok(Self {
            project_context,
            ignore,
        })
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_and_directory_patterns() {
        let ignore = IgnoreList::parse("# comment\n\n*.log\nfixtures/\ndocs/generated/*.md\n");
        assert_eq!(ignore.len(), 3);
        assert!(ignore.is_ignored("app.log", false));
        assert!(ignore.is_ignored("nested/app.log", false));
        assert!(ignore.is_ignored("tests/fixtures", true));
        assert!(!ignore.is_ignored("fixtures", false));
        assert!(ignore.is_ignored("docs/generated/api.md", false));
        assert!(!ignore.is_ignored("docs/api.md", false));
    }

    #[test]
    fn skips_hidden_and_builtin_directories() {
        let ignore = IgnoreList::default();
        assert!(ignore.is_ignored(".env", false));
        assert!(ignore.is_ignored("target", true));
        assert!(ignore.is_ignored("web/node_modules", true));
        assert!(!ignore.is_ignored("src/main.rs", false));
        assert!(!ignore.is_ignored("target", false));
    }

    #[test]
    fn loads_project_context_and_ignore_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(PROJECT_CONTEXT_FILE), "  Use tabs.\n").expect("write");
        fs::write(temp.path().join(IGNORE_FILE), "*.tmp\n").expect("write");
        let context = WorkspaceContext::load(temp.path()).expect("load");
        assert_eq!(context.project_context.as_deref(), Some("Use tabs."));
        assert!(context.ignore.is_ignored("x.tmp", false));
    }

    #[test]
    fn missing_files_yield_empty_context() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = WorkspaceContext::load(temp.path()).expect("load");
        assert!(context.project_context.is_none());
        assert!(context.ignore.is_empty());
    }
}
