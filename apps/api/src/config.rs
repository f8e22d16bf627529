use anyhow::{Context, Result};

use crate::llm_client::DEFAULT_API_URL;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Concurrency used when a batch request does not specify one.
    pub batch_default_concurrency: usize,
    /// Upper bound accepted from batch requests.
    pub batch_max_concurrency: usize,
    /// Seconds a finished batch stays readable.
    pub batch_retention_secs: u64,
    /// Finished batches kept at most; the oldest go first.
    pub batch_max_finished: usize,
    pub llm_api_url: String,
    /// Attempts per model call, first one included.
    pub llm_max_attempts: u32,
    pub llm_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let batch_default_concurrency = optional_env("BATCH_DEFAULT_CONCURRENCY", 3)?;
        let batch_max_concurrency = optional_env("BATCH_MAX_CONCURRENCY", 10)?;
        anyhow::ensure!(
            batch_default_concurrency >= 1 && batch_default_concurrency <= batch_max_concurrency,
            "BATCH_DEFAULT_CONCURRENCY must be between 1 and BATCH_MAX_CONCURRENCY"
        );

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: optional_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            batch_default_concurrency,
            batch_max_concurrency,
            batch_retention_secs: optional_env("BATCH_RETENTION_SECS", 3600)?,
            batch_max_finished: optional_env("BATCH_MAX_FINISHED", 100)?,
            llm_api_url: std::env::var("LLM_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            llm_max_attempts: optional_env("LLM_MAX_ATTEMPTS", 4)?,
            llm_timeout_secs: optional_env("LLM_TIMEOUT_SECS", 90)?,
        })
    }

    /// Resolves a requested batch concurrency against the configured default and cap.
    pub fn batch_concurrency(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.batch_default_concurrency)
            .min(self.batch_max_concurrency)
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
