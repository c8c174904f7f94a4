//! Core extraction records shared by the orchestrator, the pipeline and the HTTP layer.
//!
//! Records are immutable once built: a worker produces an `ExtractionResult`, the
//! orchestrator places it by submission index, and `BatchReport` only aggregates.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::ParseErrorKind;
use crate::extraction::prompts::PromptConfig;
use crate::extraction::validator::{ValidationError, ValidationWarning};
use crate::schema::Schema;

// ────────────────────────────────────────────────────────────────────────────
// Identity
// ────────────────────────────────────────────────────────────────────────────

/// Content hash of the raw document bytes (lowercase SHA-256 hex).
///
/// Byte-identical uploads share an id regardless of filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Task
// ────────────────────────────────────────────────────────────────────────────

/// One unit of work for the orchestrator. Schema and prompt configuration are
/// shared read-only across every task of a batch.
#[derive(Debug, Clone)]
pub struct ExtractionTask {
    pub document_id: DocumentId,
    /// Normalized document text (not yet truncated).
    pub raw_text: String,
    pub schema: Arc<Schema>,
    pub prompt_config: Arc<PromptConfig>,
}

// ────────────────────────────────────────────────────────────────────────────
// Result
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionStatus {
    Success,
    ValidationFailed,
    ProviderError,
    /// The upload never reached the model (unsupported, corrupt or empty file).
    ParseFailed,
}

/// Classification of a provider-side failure as reported in a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    Fatal,
    /// The batch deadline passed before the task could finish.
    Deadline,
}

/// Serializable failure detail carried by a non-success `ExtractionResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractionError {
    #[error("{0}")]
    Validation(ValidationError),

    #[error("provider error ({kind:?}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("parse error ({kind:?}): {message}")]
    Parse {
        kind: ParseErrorKind,
        message: String,
    },
}

/// Terminal outcome for one document. `data` is present only on `Success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub document_id: DocumentId,
    pub status: ExtractionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExtractionError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ValidationWarning>,
    /// Provider calls made for this document. Zero when it never reached the provider.
    pub attempts: u32,
}

impl ExtractionResult {
    pub fn success(
        document_id: DocumentId,
        data: Map<String, Value>,
        warnings: Vec<ValidationWarning>,
        attempts: u32,
    ) -> Self {
        Self {
            document_id,
            status: ExtractionStatus::Success,
            data: Some(data),
            error: None,
            warnings,
            attempts,
        }
    }

    pub fn validation_failed(document_id: DocumentId, error: ValidationError, attempts: u32) -> Self {
        Self {
            document_id,
            status: ExtractionStatus::ValidationFailed,
            data: None,
            error: Some(ExtractionError::Validation(error)),
            warnings: Vec::new(),
            attempts,
        }
    }

    pub fn provider_failed(
        document_id: DocumentId,
        kind: ProviderErrorKind,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            document_id,
            status: ExtractionStatus::ProviderError,
            data: None,
            error: Some(ExtractionError::Provider {
                kind,
                message: message.into(),
            }),
            warnings: Vec::new(),
            attempts,
        }
    }

    pub fn deadline_exceeded(document_id: DocumentId, attempts: u32) -> Self {
        Self::provider_failed(
            document_id,
            ProviderErrorKind::Deadline,
            "batch deadline exceeded",
            attempts,
        )
    }

    pub fn parse_failed(document_id: DocumentId, kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            document_id,
            status: ExtractionStatus::ParseFailed,
            data: None,
            error: Some(ExtractionError::Parse {
                kind,
                message: message.into(),
            }),
            warnings: Vec::new(),
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Success
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Batch report
// ────────────────────────────────────────────────────────────────────────────

/// Results in submission order plus aggregate counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<ExtractionResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub total_attempts: u32,
}

impl BatchReport {
    pub fn from_results(results: Vec<ExtractionResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let failed = results.len() - succeeded;
        let total_attempts = results.iter().map(|r| r.attempts).sum();
        Self {
            results,
            succeeded,
            failed,
            total_attempts,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }
}
