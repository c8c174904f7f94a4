//! Batch pipeline: uploaded files → parse → normalize → orchestrator.
//!
//! Parse failures never reach the extraction client. They are merged back
//! into the report at their submission index as `ParseFailed` results.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use crate::document::hashing::content_id;
use crate::document::normalize::normalize;
use crate::document::{resolve_mime, DocumentParser, ParseError};
use crate::extraction::orchestrator::{BatchOptions, BatchProgress, Orchestrator, ProgressCallback};
use crate::extraction::prompts::PromptConfig;
use crate::models::extraction::{BatchReport, DocumentId, ExtractionResult, ExtractionTask};
use crate::schema::Schema;

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl DocumentInput {
    pub fn document_id(&self) -> DocumentId {
        content_id(&self.bytes)
    }
}

/// Filename to document id mapping reported back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub filename: String,
    pub document_id: DocumentId,
}

pub fn file_entries(documents: &[DocumentInput]) -> Vec<FileEntry> {
    documents
        .iter()
        .map(|doc| FileEntry {
            filename: doc.filename.clone(),
            document_id: doc.document_id(),
        })
        .collect()
}

/// Text handed to the model for a parsed document.
fn task_text(normalized: String, image_count: usize) -> String {
    if image_count == 0 {
        return normalized;
    }
    format!("[NOTA: Este CV contiene {image_count} imagen(es)/foto(s)]\n\n{normalized}")
}

pub struct Pipeline {
    parser: Arc<dyn DocumentParser>,
    orchestrator: Arc<Orchestrator>,
}

impl Pipeline {
    pub fn new(parser: Arc<dyn DocumentParser>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            parser,
            orchestrator,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.orchestrator.client().provider_name()
    }

    /// Parses and normalizes one file off the async runtime.
    async fn prepare_text(&self, doc: &DocumentInput) -> Result<String, ParseError> {
        let parser = self.parser.clone();
        let bytes = doc.bytes.clone();
        let mime = resolve_mime(doc.content_type.as_deref(), &doc.filename);

        let parsed = tokio::task::spawn_blocking(move || parser.parse(&bytes, &mime))
            .await
            .map_err(|e| ParseError::CorruptDocument(format!("parser task failed: {e}")))??;

        let text = normalize(&parsed.text);
        if text.trim().is_empty() {
            return Err(ParseError::EmptyDocument);
        }
        Ok(task_text(text, parsed.image_count))
    }

    /// Builds one task per parsed document. Entries keep submission order;
    /// `Err` holds the `ParseFailed` result for that slot.
    pub async fn prepare(
        &self,
        documents: &[DocumentInput],
        schema: Arc<Schema>,
        prompt_config: Arc<PromptConfig>,
    ) -> Vec<Result<ExtractionTask, ExtractionResult>> {
        let mut parsed: HashMap<DocumentId, Result<String, ParseError>> = HashMap::new();
        let mut prepared = Vec::with_capacity(documents.len());

        for doc in documents {
            let id = doc.document_id();
            let text = match parsed.get(&id) {
                Some(cached) => cached.clone(),
                None => {
                    let result = self.prepare_text(doc).await;
                    match &result {
                        Ok(text) => info!(
                            "Parsed {} ({}): {} chars",
                            doc.filename,
                            id.short(),
                            text.chars().count()
                        ),
                        Err(e) => warn!("Could not parse {} ({}): {}", doc.filename, id.short(), e),
                    }
                    parsed.insert(id.clone(), result.clone());
                    result
                }
            };

            prepared.push(match text {
                Ok(raw_text) => Ok(ExtractionTask {
                    document_id: id,
                    raw_text,
                    schema: schema.clone(),
                    prompt_config: prompt_config.clone(),
                }),
                Err(e) => Err(ExtractionResult::parse_failed(id, e.kind(), e.to_string())),
            });
        }

        prepared
    }

    /// Runs a whole batch. The deadline starts before parsing. Progress counts
    /// parse failures as already completed.
    pub async fn run(
        &self,
        documents: &[DocumentInput],
        schema: Arc<Schema>,
        prompt_config: Arc<PromptConfig>,
        options: BatchOptions,
        on_progress: Option<ProgressCallback>,
    ) -> BatchReport {
        let deadline = options.start_deadline();
        let prepared = self.prepare(documents, schema, prompt_config).await;
        let total = prepared.len();

        let mut slots: Vec<Option<ExtractionResult>> = Vec::with_capacity(total);
        let mut positions = Vec::new();
        let mut tasks = Vec::new();
        for (index, entry) in prepared.into_iter().enumerate() {
            match entry {
                Ok(task) => {
                    positions.push(index);
                    tasks.push(task);
                    slots.push(None);
                }
                Err(failed) => slots.push(Some(failed)),
            }
        }

        let parse_failures = total - tasks.len();
        if parse_failures > 0 {
            warn!("{} of {} documents could not be parsed", parse_failures, total);
            if let Some(callback) = &on_progress {
                callback(BatchProgress {
                    completed: parse_failures,
                    total,
                });
            }
        }

        let progress = on_progress.map(|callback| -> ProgressCallback {
            Arc::new(move |p: BatchProgress| {
                callback(BatchProgress {
                    completed: p.completed + parse_failures,
                    total,
                })
            })
        });

        let report = self
            .orchestrator
            .run(tasks, options.concurrency(), deadline, progress)
            .await;
        for (index, result) in positions.into_iter().zip(report.results) {
            slots[index] = Some(result);
        }

        BatchReport::from_results(slots.into_iter().flatten().collect())
    }
}
