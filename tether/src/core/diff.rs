//! Unified-diff header inspection.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    #[error("patch contains no file headers")]
    NoFiles,
    #[error("patch would create `{0}`; use write for new files")]
    CreatesFile(String),
}

/// Files a unified diff touches and the strip level needed to apply it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTargets {
    /// Paths relative to the working directory after stripping, in order of appearance.
    pub files: Vec<String>,
    pub strip: u32,
}

/// Inspect the `---`/`+++` headers of `patch`.
///
/// Headers using git's `a/` and `b/` prefixes select `-p1`; plain headers select `-p0`.
/// A `/dev/null` source marks file creation, which is refused.
pub fn inspect_patch(patch: &str) -> Result<PatchTargets, DiffError> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut pending_old: Option<String> = None;
    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("--- ") {
            pending_old = Some(header_path(rest));
        } else if let Some(rest) = line.strip_prefix("+++ ")
            && let Some(old) = pending_old.take()
        {
            pairs.push((old, header_path(rest)));
        }
    }
    if pairs.is_empty() {
        return Err(DiffError::NoFiles);
    }

    let prefixed = pairs.iter().all(|(old, new)| {
        (old == "/dev/null" || old.starts_with("a/")) && (new == "/dev/null" || new.starts_with("b/"))
    });
    let strip = u32::from(prefixed);

    let mut files: Vec<String> = Vec::new();
    for (old, new) in pairs {
        if old == "/dev/null" {
            return Err(DiffError::CreatesFile(strip_components(&new, strip)));
        }
        let target = if new == "/dev/null" { &old } else { &new };
        let stripped = strip_components(target, strip);
        if !files.contains(&stripped) {
            files.push(stripped);
        }
    }
    Ok(PatchTargets { files, strip })
}

/// Path token of a header line, without any trailing timestamp.
fn header_path(rest: &str) -> String {
    let token = rest.split('\t').next().unwrap_or(rest).trim_end();
    token
        .strip_prefix('"')
        .and_then(|quoted| quoted.strip_suffix('"'))
        .unwrap_or(token)
        .to_string()
}

fn strip_components(path: &str, strip: u32) -> String {
    let mut rest = path;
    for _ in 0..strip {
        match rest.split_once('/') {
            Some((_, tail)) => rest = tail,
            None => break,
        }
    }
    rest.to_string()
}
