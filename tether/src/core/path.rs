//! Lexical normalization of tool paths against the workspace root.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path `{0}` escapes the workspace root")]
    EscapesRoot(String),
}

/// Normalize `raw` into a path relative to `root`, without touching the filesystem.
///
/// Relative inputs are joined onto the root; absolute inputs must already live
/// under it. `.` and `..` are folded lexically and any `..` that would climb
/// above the root is an error. The empty relative path denotes the root itself.
pub fn normalize_relative(root: &Path, raw: &str) -> Result<PathBuf, PathError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    let candidate = Path::new(trimmed);
    let relative = if candidate.is_absolute() {
        let root = fold(root).ok_or_else(|| PathError::EscapesRoot(raw.to_string()))?;
        let absolute = fold(candidate).ok_or_else(|| PathError::EscapesRoot(raw.to_string()))?;
        absolute
            .strip_prefix(&root)
            .map(Path::to_path_buf)
            .map_err(|_| PathError::EscapesRoot(raw.to_string()))?
    } else {
        candidate.to_path_buf()
    };

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(PathError::EscapesRoot(raw.to_string()));
                }
            }
            Component::Normal(part) => parts.push(part),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::EscapesRoot(raw.to_string()));
            }
        }
    }
    Ok(parts.into_iter().collect())
}

/// Resolve `raw` to an absolute path inside `root`.
pub fn resolve_in_root(root: &Path, raw: &str) -> Result<PathBuf, PathError> {
    Ok(root.join(normalize_relative(root, raw)?))
}

/// Render a workspace-relative path with `/` separators; the root renders as `.`.
pub fn display_relative(path: &Path) -> String {
    let rendered = path
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if rendered.is_empty() {
        ".".to_string()
    } else {
        rendered
    }
}

fn fold(path: &Path) -> Option<PathBuf> {
    let mut folded = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !folded.pop() {
                    return None;
                }
            }
            other => folded.push(other.as_os_str()),
        }
    }
    Some(folded)
}
