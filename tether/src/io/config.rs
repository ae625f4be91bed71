//! Tether configuration stored in `tether.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::danger::{DangerClassifier, DangerPattern, default_patterns};
use crate::core::limits::RunLimits;

/// Tether configuration (TOML).
///
/// Every section is optional; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TetherConfig {
    pub model: ModelConfig,
    pub limits: RunLimits,
    pub tools: ToolsConfig,
    pub safety: SafetyConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// HTTP endpoint accepting decision requests.
    pub endpoint: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub default_model: String,
    /// Models known to honor the structured-output contract.
    pub allowed_models: Vec<String>,
    pub timeout_secs: u64,
    /// Total attempts per model call, including the first.
    pub retry_attempts: u32,
    /// Delay before the first retry; doubled for each later retry.
    pub retry_base_delay_ms: u64,
    pub temperature: f32,
    /// Re-prompts allowed after a malformed reply before the run fails.
    pub max_decision_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key_env: "TETHER_API_KEY".to_string(),
            default_model: "gpt-4.1".to_string(),
            allowed_models: ["gpt-4.1", "gpt-5", "o1", "o3-mini"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            timeout_secs: 120,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            temperature: 0.2,
            max_decision_retries: 2,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Default `run` timeout when the call does not name one.
    pub command_timeout_secs: u64,
    /// Upper bound applied to any requested `run` timeout.
    pub max_command_timeout_secs: u64,
    pub max_search_results: usize,
    pub scan_listing_cap: usize,
    /// Bytes of stdout/stderr kept per stream.
    pub output_limit_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            max_command_timeout_secs: 600,
            max_search_results: 50,
            scan_listing_cap: 200,
            output_limit_bytes: 10_000,
        }
    }
}

impl ToolsConfig {
    /// Effective timeout for a `run` call.
    pub fn command_timeout(&self, requested_secs: Option<u64>) -> Duration {
        let secs = requested_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(self.command_timeout_secs)
            .min(self.max_command_timeout_secs);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    /// Snapshot the workspace before every destructive action.
    pub auto_snapshot: bool,
    pub dangerous_patterns: Vec<DangerPattern>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            auto_snapshot: true,
            dangerous_patterns: default_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Audit log directory; relative paths resolve against the workspace root.
    pub log_dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl AuditConfig {
    pub fn resolve_log_dir(&self, workspace: &Path) -> PathBuf {
        if self.log_dir.is_absolute() {
            self.log_dir.clone()
        } else {
            workspace.join(&self.log_dir)
        }
    }
}

impl TetherConfig {
    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        if model.allowed_models.is_empty() {
            return Err(anyhow!("model.allowed_models must not be empty"));
        }
        if !model.allowed_models.contains(&model.default_model) {
            return Err(anyhow!(
                "model.default_model `{}` is not in model.allowed_models",
                model.default_model
            ));
        }
        if model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if model.retry_attempts == 0 {
            return Err(anyhow!("model.retry_attempts must be > 0"));
        }
        if model.api_key_env.trim().is_empty() {
            return Err(anyhow!("model.api_key_env must not be empty"));
        }

        let limits = &self.limits;
        if limits.max_iterations == 0 {
            return Err(anyhow!("limits.max_iterations must be > 0"));
        }
        if limits.max_tool_calls_per_session == 0 {
            return Err(anyhow!("limits.max_tool_calls_per_session must be > 0"));
        }
        if limits.max_files_touched_per_run == 0 {
            return Err(anyhow!("limits.max_files_touched_per_run must be > 0"));
        }

        let tools = &self.tools;
        if tools.command_timeout_secs == 0 || tools.max_command_timeout_secs == 0 {
            return Err(anyhow!("tools command timeouts must be > 0"));
        }
        if tools.max_search_results == 0 || tools.scan_listing_cap == 0 {
            return Err(anyhow!(
                "tools.max_search_results and tools.scan_listing_cap must be > 0"
            ));
        }
        if tools.output_limit_bytes == 0 {
            return Err(anyhow!("tools.output_limit_bytes must be > 0"));
        }

        DangerClassifier::compile(&self.safety.dangerous_patterns)
            .context("safety.dangerous_patterns")?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TetherConfig::default()`.
pub fn load_config(path: &Path) -> Result<TetherConfig> {
    if !path.exists() {
        let cfg = TetherConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TetherConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
