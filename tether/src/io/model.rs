//! Model client: one structured decision request per call, with retry.
//!
//! The wire contract is deliberately small. Requests are a JSON POST of
//!
//! ```json
//! {"model": "...", "messages": [{"role": "system", "content": "..."}],
//!  "response_schema": {...}, "temperature": 0.2}
//! ```
//!
//! and a successful response is either `{"content": "<decision json>"}` or the
//! decision object itself. Anything else is handed to the decision parser
//! verbatim, where it fails as a malformed decision.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::conversation::Message;
use crate::io::config::ModelConfig;

/// Typed failure of a model call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model `{model}` is not in the allow-list ({})", allowed.join(", "))]
    UnsupportedModel { model: String, allowed: Vec<String> },
    #[error("model endpoint rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("model call timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("model transport failed after {attempts} attempt(s): {last_error}")]
    FatalTransport { attempts: u32, last_error: String },
    #[error("model call cancelled")]
    Cancelled,
}

/// One decision request.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub response_schema: &'a Value,
    pub temperature: f32,
}

/// Seam between the orchestrator and whatever produces decisions.
pub trait ModelClient {
    /// Return the raw decision text for `request`.
    fn complete(&self, request: &ModelRequest<'_>, cancel: &CancelToken)
    -> Result<String, ModelError>;
}

/// Attempt budget and exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base_delay * 2^(retry - 1)`.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

enum AttemptError {
    Transient { timed_out: bool, detail: String },
    Rejected { status: u16, body: String },
}

/// Blocking HTTP implementation of [`ModelClient`].
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    allowed_models: Vec<String>,
    retry: RetryPolicy,
}

impl HttpModelClient {
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(anyhow!("model.endpoint is not configured"));
        }
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "no API key set, sending unauthenticated requests");
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key,
            allowed_models: config.allowed_models.clone(),
            retry: RetryPolicy {
                attempts: config.retry_attempts.max(1),
                base_delay: config.retry_base_delay(),
            },
        })
    }

    fn attempt(&self, request: &ModelRequest<'_>) -> Result<String, AttemptError> {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().map_err(|err| AttemptError::Transient {
            timed_out: err.is_timeout(),
            detail: err.to_string(),
        })?;
        let status = response.status();
        let body = response.text().map_err(|err| AttemptError::Transient {
            timed_out: err.is_timeout(),
            detail: err.to_string(),
        })?;
        if status.is_client_error() {
            return Err(AttemptError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(AttemptError::Transient {
                timed_out: false,
                detail: format!("status {}: {}", status.as_u16(), body.trim()),
            });
        }
        Ok(extract_content(&body))
    }
}

impl ModelClient for HttpModelClient {
    #[instrument(skip_all, fields(model = request.model, attempts = self.retry.attempts))]
    fn complete(
        &self,
        request: &ModelRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<String, ModelError> {
        if !self.allowed_models.iter().any(|model| model == request.model) {
            return Err(ModelError::UnsupportedModel {
                model: request.model.to_string(),
                allowed: self.allowed_models.clone(),
            });
        }

        let mut last_timed_out = false;
        let mut last_error = String::new();
        for attempt in 1..=self.retry.attempts {
            if attempt > 1 {
                let delay = self.retry.delay_before_retry(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                sleep_unless_cancelled(delay, cancel)?;
            }
            if cancel.is_cancelled() {
                return Err(ModelError::Cancelled);
            }
            match self.attempt(request) {
                Ok(content) => {
                    debug!(attempt, "model call succeeded");
                    return Ok(content);
                }
                Err(AttemptError::Rejected { status, body }) => {
                    warn!(status, "model endpoint rejected request");
                    return Err(ModelError::Rejected { status, body });
                }
                Err(AttemptError::Transient { timed_out, detail }) => {
                    warn!(attempt, timed_out, err = %detail, "transient model failure");
                    last_timed_out = timed_out;
                    last_error = detail;
                }
            }
        }

        let attempts = self.retry.attempts;
        if last_timed_out {
            Err(ModelError::Timeout { attempts })
        } else {
            Err(ModelError::FatalTransport {
                attempts,
                last_error,
            })
        }
    }
}

/// Unwrap the `{"content": "..."}` envelope when present.
fn extract_content(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("content") {
            Some(Value::String(content)) => content.clone(),
            _ => body.to_string(),
        },
        _ => body.to_string(),
    }
}

fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) -> Result<(), ModelError> {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        thread::sleep(remaining.min(Duration::from_millis(50)));
    }
}
