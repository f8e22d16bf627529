//! Anthropic Messages API client shared by resume parsing and profile analysis.
//!
//! Every call names its `LlmTask`, which fixes the output budget and tags the
//! logs. Batch runs put several calls in flight at once, so 429s are routine:
//! they are retried after `retry-after` when the API sends one, otherwise with
//! jittered exponential backoff.

use std::time::Duration;

use rand::Rng;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

pub mod prompts;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Pinned so scores stay comparable across profile versions.
pub const MODEL: &str = "claude-sonnet-4-5";

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(20);
const JITTER_MAX_MS: u64 = 250;

/// What a call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmTask {
    ResumeParse,
    ProfileAnalysis,
}

impl LlmTask {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmTask::ResumeParse => "resume_parse",
            LlmTask::ProfileAnalysis => "profile_analysis",
        }
    }

    /// A parsed resume is a handful of fields; a profile carries every section.
    fn max_tokens(self) -> u32 {
        match self {
            LlmTask::ResumeParse => 1024,
            LlmTask::ProfileAnalysis => 4096,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("{task} answer is not the expected JSON: {source}")]
    Parse {
        task: &'static str,
        source: serde_json::Error,
    },

    #[error("{task} answer has no text content")]
    EmptyContent { task: &'static str },

    #[error("{task} gave up after {attempts} attempts: {last}")]
    Exhausted {
        task: &'static str,
        attempts: u32,
        last: Box<LlmError>,
    },
}

/// Connection settings, read from `Config`.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_url: String,
    /// Total attempts per call, first one included.
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl LlmSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_url: config.llm_api_url.clone(),
            max_attempts: config.llm_max_attempts,
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Text of the first text block, if any.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// One failed attempt, and whether another attempt may help.
enum Attempt {
    Retry {
        error: LlmError,
        retry_after: Option<Duration>,
    },
    Fail(LlmError),
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(api_key: String, settings: LlmSettings) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(settings.timeout).build()?,
            api_key,
            settings,
        })
    }

    pub async fn call(
        &self,
        task: LlmTask,
        prompt: &str,
        system: &str,
    ) -> Result<LlmResponse, LlmError> {
        let body = MessagesRequest {
            model: MODEL,
            max_tokens: task.max_tokens(),
            system,
            messages: [UserMessage {
                role: "user",
                content: prompt,
            }],
        };
        let attempts = self.settings.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            let (error, retry_after) = match self.send(&body).await {
                Ok(response) => {
                    debug!(
                        task = task.as_str(),
                        attempt,
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        "LLM call succeeded"
                    );
                    return Ok(response);
                }
                Err(Attempt::Fail(error)) => return Err(error),
                Err(Attempt::Retry { error, retry_after }) => (error, retry_after),
            };

            if attempt >= attempts {
                return Err(LlmError::Exhausted {
                    task: task.as_str(),
                    attempts,
                    last: Box::new(error),
                });
            }

            let delay = retry_delay(attempt, retry_after, random_jitter());
            warn!(
                task = task.as_str(),
                attempt,
                "LLM call failed ({error}), retrying in {}ms",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> Result<LlmResponse, Attempt> {
        let response = self
            .client
            .post(&self.settings.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Attempt::Retry {
                        error: LlmError::Http(e),
                        retry_after: None,
                    }
                } else {
                    Attempt::Fail(LlmError::Http(e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<LlmResponse>()
                .await
                .map_err(|e| Attempt::Fail(LlmError::Http(e)));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let raw = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorEnvelope>(&raw)
            .map(|e| e.error.message)
            .unwrap_or(raw);
        let error = LlmError::Api {
            status: status.as_u16(),
            message,
        };

        if is_retryable(status) {
            Err(Attempt::Retry { error, retry_after })
        } else {
            Err(Attempt::Fail(error))
        }
    }

    /// Calls the model and deserializes its text answer as `T`.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        task: LlmTask,
        prompt: &str,
        system: &str,
    ) -> Result<T, LlmError> {
        let response = self.call(task, prompt, system).await?;
        let text = response.text().ok_or(LlmError::EmptyContent {
            task: task.as_str(),
        })?;
        serde_json::from_str(strip_json_fences(text)).map_err(|source| LlmError::Parse {
            task: task.as_str(),
            source,
        })
    }
}

/// Rate limits, overload (529) and other server errors.
fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// `retry-after` in seconds; the HTTP-date form is ignored.
fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Delay before attempt `attempt + 1`. Both paths are capped at `BACKOFF_CAP`.
fn retry_delay(attempt: u32, retry_after: Option<Duration>, jitter: Duration) -> Duration {
    let base = retry_after.unwrap_or_else(|| {
        let exponent = attempt.saturating_sub(1).min(16);
        BACKOFF_BASE.saturating_mul(1u32 << exponent)
    });
    base.min(BACKOFF_CAP) + jitter
}

fn random_jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MAX_MS))
}

/// Strips ```json ... ``` or ``` ... ``` fences the model sometimes adds.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(stripped) => stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start()),
        None => text,
    }
}
