//! Append-only audit log in `<log_dir>/audit-YYYY-MM-DD.jsonl`.
//!
//! One JSON object per line. Inputs and results are redacted and bounded
//! before serialization. Each line is written with a single `write_all`
//! under an exclusive advisory lock, so concurrent runs sharing a log
//! directory never interleave partial records.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::redact::{bound_inputs, bound_result, redact};

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: String,
    pub session_id: String,
    pub action: String,
    pub inputs: Value,
    pub result: Value,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Event to record; redaction and bounding happen in [`AuditLog::append`].
#[derive(Debug, Clone, Copy)]
pub struct AuditEntry<'a> {
    pub action: &'a str,
    pub inputs: &'a Value,
    pub result: &'a Value,
    pub success: bool,
    pub duration: Duration,
    pub warnings: &'a [String],
}

/// Generate a session id such as `run-20260102T030405-4242`.
pub fn new_session_id() -> String {
    format!(
        "run-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        std::process::id()
    )
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
    session_id: String,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Log file receiving today's (UTC) records.
    pub fn current_path(&self) -> PathBuf {
        self.dir
            .join(format!("audit-{}.jsonl", Utc::now().format("%Y-%m-%d")))
    }

    #[instrument(skip_all, fields(action = entry.action, success = entry.success))]
    pub fn append(&self, entry: AuditEntry<'_>) -> Result<()> {
        let record = AuditRecord {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            session_id: self.session_id.clone(),
            action: entry.action.to_string(),
            inputs: bound_inputs(&redact(entry.inputs)),
            result: bound_result(&redact(entry.result)),
            success: entry.success,
            duration_ms: u64::try_from(entry.duration.as_millis()).unwrap_or(u64::MAX),
            warnings: entry.warnings.to_vec(),
        };
        let mut line = serde_json::to_string(&record).context("serialize audit record")?;
        line.push('\n');

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create audit dir {}", self.dir.display()))?;
        let path = self.current_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open audit log {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock audit log {}", path.display()))?;
        let written = file
            .write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("append audit log {}", path.display()));
        FileExt::unlock(&file).with_context(|| format!("unlock audit log {}", path.display()))?;
        written?;
        debug!(path = %path.display(), "audit record appended");
        Ok(())
    }
}

/// Parse every record in an audit log file.
pub fn read_records(path: &Path) -> Result<Vec<AuditRecord>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read audit log {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse audit record {} in {}", idx + 1, path.display()))
        })
        .collect()
}
