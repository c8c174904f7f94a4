use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::extraction::client::GenerationSettings;
use crate::extraction::jobs::DEFAULT_RETENTION;
use crate::extraction::orchestrator::{BatchOptions, DEFAULT_MAX_CONCURRENCY};
use crate::extraction::retry::RetryPolicy;
use crate::llm_client::openai::DEFAULT_API_BASE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(LlmProvider::Anthropic),
            "openai" => Ok(LlmProvider::OpenAi),
            other => bail!("LLM_PROVIDER must be 'anthropic' or 'openai', got '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if the selected provider has no API key.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: LlmProvider,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    /// `None` uses the provider's default model.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub transport_retries: u32,
    pub batch_deadline_secs: Option<u64>,
    pub max_files_per_batch: usize,
    /// How long finished batches stay pollable.
    pub batch_retention_secs: u64,
    pub default_schema_path: Option<PathBuf>,
    pub port: u16,
    pub rust_log: String,
}

impl Default for Config {
    fn default() -> Self {
        let generation = GenerationSettings::default();
        let policy = RetryPolicy::default();
        Self {
            provider: LlmProvider::Anthropic,
            anthropic_api_key: None,
            openai_api_key: None,
            openai_api_base: DEFAULT_API_BASE.to_string(),
            model: None,
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
            request_timeout_secs: 120,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_attempts: policy.max_attempts,
            transport_retries: policy.transport_retries,
            batch_deadline_secs: None,
            max_files_per_batch: 100,
            batch_retention_secs: DEFAULT_RETENTION.as_secs(),
            default_schema_path: None,
            port: 8080,
            rust_log: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Config {
            provider: parse_or(&var, "LLM_PROVIDER", defaults.provider)?,
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_api_base: var("OPENAI_API_BASE").unwrap_or(defaults.openai_api_base),
            model: var("LLM_MODEL"),
            temperature: parse_or(&var, "LLM_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_or(&var, "LLM_MAX_TOKENS", defaults.max_tokens)?,
            request_timeout_secs: parse_or(&var, "LLM_REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            max_concurrency: parse_or(&var, "MAX_CONCURRENCY", defaults.max_concurrency)?,
            max_attempts: parse_or(&var, "MAX_ATTEMPTS", defaults.max_attempts)?,
            transport_retries: parse_or(&var, "TRANSPORT_RETRIES", defaults.transport_retries)?,
            batch_deadline_secs: var("BATCH_DEADLINE_SECS")
                .map(|v| v.trim().parse::<u64>())
                .transpose()
                .context("BATCH_DEADLINE_SECS must be a whole number of seconds")?,
            max_files_per_batch: parse_or(&var, "MAX_FILES_PER_BATCH", defaults.max_files_per_batch)?,
            batch_retention_secs: parse_or(&var, "BATCH_RETENTION_SECS", defaults.batch_retention_secs)?,
            default_schema_path: var("DEFAULT_SCHEMA_PATH").map(PathBuf::from),
            port: parse_or(&var, "PORT", defaults.port)?,
            rust_log: var("RUST_LOG").unwrap_or(defaults.rust_log),
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            bail!("LLM_TEMPERATURE must be within [0, 1], got {}", self.temperature);
        }
        if !(500..=4000).contains(&self.max_tokens) {
            bail!("LLM_MAX_TOKENS must be within [500, 4000], got {}", self.max_tokens);
        }
        if self.max_attempts == 0 {
            bail!("MAX_ATTEMPTS must be at least 1");
        }
        if self.max_files_per_batch == 0 {
            bail!("MAX_FILES_PER_BATCH must be at least 1");
        }
        match self.provider {
            LlmProvider::Anthropic if self.anthropic_api_key.is_none() => {
                bail!("Required environment variable 'ANTHROPIC_API_KEY' is not set")
            }
            LlmProvider::OpenAi if self.openai_api_key.is_none() => {
                bail!("Required environment variable 'OPENAI_API_KEY' is not set")
            }
            _ => Ok(()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn batch_retention(&self) -> Duration {
        Duration::from_secs(self.batch_retention_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            transport_retries: self.transport_retries,
            ..RetryPolicy::default()
        }
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Batch defaults; requests may override both fields.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            max_concurrency: self.max_concurrency,
            deadline: self.batch_deadline_secs.map(Duration::from_secs),
        }
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}")),
        None => Ok(default),
    }
}
