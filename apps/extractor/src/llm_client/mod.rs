/// LLM Client: the provider boundary for résumé extraction.
///
/// ARCHITECTURAL RULE: No other module may call a model API directly.
/// `ExtractionClient` drives retries and repairs; a `Provider` makes exactly
/// one HTTP call per `call` and classifies its failure.
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::models::extraction::ProviderErrorKind;

pub mod anthropic;
pub mod openai;
pub mod prompts;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

// ────────────────────────────────────────────────────────────────────────────
// Provider interface
// ────────────────────────────────────────────────────────────────────────────

/// One provider call. The document travels separately from the prompts so
/// providers decide how to frame it (see `prompts::compose_user_message`).
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub document_text: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Request timed out or the provider was temporarily unavailable. Retryable.
    #[error("provider timeout: {0}")]
    Timeout(String),

    /// Provider asked us to slow down. Retryable.
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// Anything else: auth, bad request, unreadable response.
    #[error("provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::RateLimited(_))
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Timeout(_) => ProviderErrorKind::Timeout,
            ProviderError::RateLimited(_) => ProviderErrorKind::RateLimited,
            ProviderError::Fatal(_) => ProviderErrorKind::Fatal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Timeout(m) | ProviderError::RateLimited(m) | ProviderError::Fatal(m) => m,
        }
    }

    /// Maps a non-2xx status to an error kind.
    /// 429 and 529 (Anthropic "overloaded") are rate limits; gateway-style
    /// failures are treated like timeouts.
    pub fn from_status(status: u16, body: String) -> Self {
        let message = format!("status {status}: {body}");
        match status {
            429 | 529 => ProviderError::RateLimited(message),
            408 | 500 | 502 | 503 | 504 => ProviderError::Timeout(message),
            _ => ProviderError::Fatal(message),
        }
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProviderError::Timeout(err.to_string())
        } else {
            ProviderError::Fatal(err.to_string())
        }
    }
}

/// A model backend. Carried as `Arc<dyn Provider>` so tests can script responses.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Single call returning the model's raw text output.
    async fn call(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError>;
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
