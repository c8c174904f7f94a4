//! LLM Extraction Client: one document → one terminal `ExtractionResult`.
//!
//! Two independent budgets share the attempt ceiling:
//! - transport retries for `Timeout`/`RateLimited`, with exponential backoff and jitter;
//! - repairs for malformed or invalid output, re-prompting with the rejected
//!   output and the validation error (no backoff).
//!
//! `extract` never returns an error: every failure is folded into the result.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::extraction::prompts::{self, repair_prompt, truncate_document};
use crate::extraction::retry::{Deadline, RetryClock, RetryPolicy, TokioClock};
use crate::extraction::validator::validate_with_rules;
use crate::llm_client::{CompletionRequest, Provider, ProviderError};
use crate::models::extraction::{ExtractionResult, ExtractionTask};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2000,
        }
    }
}

pub struct ExtractionClient {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    settings: GenerationSettings,
    clock: Arc<dyn RetryClock>,
}

impl ExtractionClient {
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy, settings: GenerationSettings) -> Self {
        Self {
            provider,
            policy,
            settings,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn RetryClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Single provider call with the document truncated for the context window.
    pub async fn extract_raw(
        &self,
        document_text: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        let request = CompletionRequest {
            system_prompt,
            user_prompt,
            document_text: truncate_document(document_text),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        self.provider.call(&request).await
    }

    /// Runs the retry/repair loop for one task. The deadline is checked before
    /// every attempt and bounds backoff sleeps; an in-flight call is never interrupted.
    pub async fn extract(&self, task: &ExtractionTask, deadline: Deadline) -> ExtractionResult {
        let id = &task.document_id;
        let prompts = prompts::build(&task.schema, &task.prompt_config);
        let rules = task.schema.to_validation_rules();

        let mut attempts = 0u32;
        let mut transport_retries = 0u32;
        let mut repairs = 0u32;
        let mut user_prompt = prompts.user.clone();

        loop {
            if deadline.is_expired() {
                warn!("Document {} hit the batch deadline after {} attempts", id.short(), attempts);
                return ExtractionResult::deadline_exceeded(id.clone(), attempts);
            }

            attempts += 1;
            debug!(
                "Extraction attempt {} for {} ({} chars)",
                attempts,
                id.short(),
                task.raw_text.len()
            );

            let raw = match self.extract_raw(&task.raw_text, &prompts.system, &user_prompt).await {
                Ok(raw) => raw,
                Err(err) if err.is_transient() => {
                    if attempts >= self.policy.max_attempts
                        || transport_retries >= self.policy.transport_retries
                    {
                        warn!("Document {} failed after {} attempts: {}", id.short(), attempts, err);
                        return ExtractionResult::provider_failed(
                            id.clone(),
                            err.kind(),
                            err.message(),
                            attempts,
                        );
                    }
                    transport_retries += 1;
                    let delay = {
                        let mut rng = rand::thread_rng();
                        self.policy.backoff_with_jitter(transport_retries, &mut rng)
                    };
                    warn!(
                        "Extraction attempt {} for {} failed ({}), retrying after {}ms...",
                        attempts,
                        id.short(),
                        err,
                        delay.as_millis()
                    );
                    if !self.wait(delay, deadline).await {
                        return ExtractionResult::deadline_exceeded(id.clone(), attempts);
                    }
                    continue;
                }
                Err(err) => {
                    warn!("Document {} failed with non-retryable error: {}", id.short(), err);
                    return ExtractionResult::provider_failed(id.clone(), err.kind(), err.message(), attempts);
                }
            };

            match validate_with_rules(&raw, &rules) {
                Ok(record) => {
                    for warning in &record.warnings {
                        warn!("Document {}: {}", id.short(), warning.message);
                    }
                    return ExtractionResult::success(id.clone(), record.data, record.warnings, attempts);
                }
                Err(error) => {
                    if attempts >= self.policy.max_attempts || repairs >= self.policy.repair_attempts {
                        warn!(
                            "Document {} rejected after {} attempts: {}",
                            id.short(),
                            attempts,
                            error
                        );
                        return ExtractionResult::validation_failed(id.clone(), error, attempts);
                    }
                    repairs += 1;
                    warn!("Document {} needs repair ({:?}): {}", id.short(), error.kind, error);
                    user_prompt = repair_prompt(&prompts.user, &raw, &error);
                }
            }
        }
    }

    /// Sleeps for the backoff unless the deadline would pass first.
    /// Returns false when there is no time left for another attempt.
    async fn wait(&self, delay: Duration, deadline: Deadline) -> bool {
        if deadline.remaining().is_some_and(|left| left <= delay) {
            return false;
        }
        self.clock.sleep(delay).await;
        !deadline.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::testing::{task, RecordingClock, ScriptedProvider};
    use crate::extraction::validator::ValidationErrorKind;
    use crate::models::extraction::{ExtractionError, ExtractionStatus, ProviderErrorKind};
    use serde_json::json;

    const SCHEMA: &str = "version: 1\nvariables:\n  - {name: nombre, type: string, required: true}\n  - {name: años_experiencia, type: integer, min: 0, max: 50}\n";

    fn client(provider: Arc<ScriptedProvider>, clock: Arc<RecordingClock>) -> ExtractionClient {
        ExtractionClient::new(provider, RetryPolicy::default(), GenerationSettings::default())
            .with_clock(clock)
    }

    fn rate_limited() -> Result<String, ProviderError> {
        Err(ProviderError::RateLimited("429".into()))
    }

    #[tokio::test]
    async fn test_end_to_end_single_attempt() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            r#"{"nombre":"Juan Pérez","años_experiencia":5}"#.into(),
        )]));
        let clock = Arc::new(RecordingClock::default());
        let result = client(provider.clone(), clock)
            .extract(&task(SCHEMA, "Juan Pérez, 5 años de experiencia"), Deadline::none())
            .await;

        assert_eq!(result.status, ExtractionStatus::Success);
        assert_eq!(result.attempts, 1);
        assert_eq!(
            serde_json::Value::Object(result.data.unwrap()),
            json!({"nombre": "Juan Pérez", "años_experiencia": 5})
        );
        assert_eq!(provider.calls(), 1);
        assert!(provider.documents()[0].contains("Juan Pérez, 5 años"));
    }

    #[tokio::test]
    async fn test_rate_limited_until_ceiling() {
        let provider = Arc::new(ScriptedProvider::always(rate_limited()));
        let clock = Arc::new(RecordingClock::default());
        let result = client(provider.clone(), clock.clone())
            .extract(&task(SCHEMA, "cv"), Deadline::none())
            .await;

        assert_eq!(result.status, ExtractionStatus::ProviderError);
        assert_eq!(result.attempts, 3);
        assert_eq!(provider.calls(), 3);
        assert!(matches!(
            result.error,
            Some(ExtractionError::Provider {
                kind: ProviderErrorKind::RateLimited,
                ..
            })
        ));

        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[0] >= Duration::from_secs(1) && sleeps[0] <= Duration::from_millis(1250));
        assert!(sleeps[1] >= Duration::from_secs(2) && sleeps[1] <= Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_repair_after_malformed_response() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("Aquí está el JSON: {nombre: Juan".into()),
            Ok(r#"{"nombre":"Juan"}"#.into()),
        ]));
        let clock = Arc::new(RecordingClock::default());
        let result = client(provider.clone(), clock.clone())
            .extract(&task(SCHEMA, "cv"), Deadline::none())
            .await;

        assert_eq!(result.status, ExtractionStatus::Success);
        assert_eq!(result.attempts, 2);
        assert!(clock.sleeps().is_empty());

        let prompts = provider.user_prompts();
        assert!(!prompts[0].contains("CORRECCIÓN REQUERIDA"));
        assert!(prompts[1].contains("CORRECCIÓN REQUERIDA"));
        assert!(prompts[1].contains("Aquí está el JSON: {nombre: Juan"));
    }

    #[tokio::test]
    async fn test_repair_budget_is_one() {
        let provider = Arc::new(ScriptedProvider::always(Ok(r#"{"años_experiencia": 3}"#.into())));
        let result = client(provider.clone(), Arc::new(RecordingClock::default()))
            .extract(&task(SCHEMA, "cv"), Deadline::none())
            .await;

        assert_eq!(result.status, ExtractionStatus::ValidationFailed);
        assert_eq!(result.attempts, 2);
        match result.error {
            Some(ExtractionError::Validation(err)) => {
                assert_eq!(err.kind, ValidationErrorKind::MissingField);
                assert_eq!(err.field.as_deref(), Some("nombre"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mixed_errors_respect_ceiling() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Timeout("slow".into())),
            Ok("not json".into()),
            Ok("still not json".into()),
            Ok(r#"{"nombre":"never reached"}"#.into()),
        ]));
        let result = client(provider.clone(), Arc::new(RecordingClock::default()))
            .extract(&task(SCHEMA, "cv"), Deadline::none())
            .await;

        assert_eq!(result.status, ExtractionStatus::ValidationFailed);
        assert_eq!(result.attempts, 3);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::always(Err(ProviderError::Fatal(
            "status 401: invalid x-api-key".into(),
        ))));
        let result = client(provider.clone(), Arc::new(RecordingClock::default()))
            .extract(&task(SCHEMA, "cv"), Deadline::none())
            .await;

        assert_eq!(result.status, ExtractionStatus::ProviderError);
        assert_eq!(result.attempts, 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_clamped_value_succeeds_with_warning() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            r#"{"nombre":"Ana","años_experiencia":75}"#.into(),
        )]));
        let result = client(provider, Arc::new(RecordingClock::default()))
            .extract(&task(SCHEMA, "cv"), Deadline::none())
            .await;

        assert_eq!(result.status, ExtractionStatus::Success);
        assert_eq!(result.data.unwrap()["años_experiencia"], json!(50));
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_makes_no_call() {
        let provider = Arc::new(ScriptedProvider::always(Ok("{}".into())));
        let deadline = Deadline::after(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;

        let result = client(provider.clone(), Arc::new(RecordingClock::default()))
            .extract(&task(SCHEMA, "cv"), deadline)
            .await;

        assert_eq!(result.attempts, 0);
        assert_eq!(provider.calls(), 0);
        assert!(matches!(
            result.error,
            Some(ExtractionError::Provider {
                kind: ProviderErrorKind::Deadline,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_longer_than_deadline_gives_up() {
        let provider = Arc::new(ScriptedProvider::always(rate_limited()));
        let clock = Arc::new(RecordingClock::default());
        let result = client(provider.clone(), clock.clone())
            .extract(&task(SCHEMA, "cv"), Deadline::after(Duration::from_millis(500)))
            .await;

        assert_eq!(result.attempts, 1);
        assert_eq!(result.status, ExtractionStatus::ProviderError);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_long_document_is_truncated() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(r#"{"nombre":"Ana"}"#.into())]));
        let text = "a".repeat(prompts::MAX_DOCUMENT_CHARS * 2);
        client(provider.clone(), Arc::new(RecordingClock::default()))
            .extract(&task(SCHEMA, &text), Deadline::none())
            .await;

        assert_eq!(provider.documents()[0].len(), prompts::MAX_DOCUMENT_CHARS);
    }
}
