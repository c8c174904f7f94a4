//! Concurrent Orchestrator: bounded-concurrency batch runs with per-document
//! failure isolation.
//!
//! # Scheduling
//! Every task is spawned onto a `JoinSet`. Before doing any work a task claims
//! its content hash in the `ResultCache`: the first claimant takes a semaphore
//! permit and runs the extraction, later tasks with the same hash wait on the
//! same `OnceCell` without holding a permit. Results are placed by submission
//! index, so report order never depends on completion order.
//!
//! # Deadline
//! The caller starts the deadline, so time spent before `run` (parsing) counts
//! against it. Permit acquisition is bounded by the deadline. Tasks still waiting when it
//! passes are marked `ProviderError(kind=Deadline)`; in-flight calls run to
//! completion and the client stops before its next attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::extraction::client::ExtractionClient;
use crate::extraction::retry::Deadline;
use crate::models::extraction::{
    BatchReport, DocumentId, ExtractionResult, ExtractionTask, ProviderErrorKind,
};

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
pub const MAX_CONCURRENCY_LIMIT: usize = 20;

/// Completed/total snapshot passed to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

/// Invoked after each task settles, with a strictly increasing `completed`.
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub max_concurrency: usize,
    /// Overall budget for the batch, parsing included, measured from
    /// `start_deadline`.
    pub deadline: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            deadline: None,
        }
    }
}

impl BatchOptions {
    /// Requested concurrency clamped to `[1, MAX_CONCURRENCY_LIMIT]`.
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_CONCURRENCY_LIMIT)
    }

    /// Starts the batch clock. Call once, before any per-document work.
    pub fn start_deadline(&self) -> Deadline {
        self.deadline.map_or_else(Deadline::none, Deadline::after)
    }
}

/// Content-hash keyed results with claim-or-wait semantics.
#[derive(Default)]
struct ResultCache {
    cells: Mutex<HashMap<DocumentId, Arc<OnceCell<ExtractionResult>>>>,
}

impl ResultCache {
    /// Returns the cell for `id`, creating it on first claim.
    fn claim(&self, id: &DocumentId) -> Arc<OnceCell<ExtractionResult>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.entry(id.clone()).or_default().clone()
    }

    fn len(&self) -> usize {
        self.cells.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct Orchestrator {
    client: Arc<ExtractionClient>,
}

impl Orchestrator {
    pub fn new(client: Arc<ExtractionClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ExtractionClient {
        &self.client
    }

    /// Runs every task and returns a report in submission order. Never fails:
    /// each document's outcome, including panics, lands in its own result.
    /// `concurrency` is clamped to `[1, MAX_CONCURRENCY_LIMIT]`.
    pub async fn run(
        &self,
        tasks: Vec<ExtractionTask>,
        concurrency: usize,
        deadline: Deadline,
        on_progress: Option<ProgressCallback>,
    ) -> BatchReport {
        let total = tasks.len();
        let concurrency = concurrency.clamp(1, MAX_CONCURRENCY_LIMIT);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let cache = ResultCache::default();

        info!(
            "Batch started: {} documents, concurrency {}, time left {:?}",
            total,
            concurrency,
            deadline.remaining()
        );

        let ids: Vec<DocumentId> = tasks.iter().map(|t| t.document_id.clone()).collect();
        let mut set = JoinSet::new();

        for (index, task) in tasks.into_iter().enumerate() {
            let cell = cache.claim(&task.document_id);
            let semaphore = semaphore.clone();
            let client = self.client.clone();

            set.spawn(async move {
                let result = cell
                    .get_or_init(|| run_claimed(client, semaphore, task, deadline))
                    .await
                    .clone();
                (index, result)
            });
        }

        let unique = cache.len();
        if unique < total {
            info!("Batch deduplicated: {} unique of {} documents", unique, total);
        }

        let mut slots: Vec<Option<ExtractionResult>> = vec![None; total];
        let mut completed = 0;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!("Extraction task aborted: {e}"),
            }
            completed += 1;
            if let Some(callback) = &on_progress {
                callback(BatchProgress { completed, total });
            }
        }

        let results: Vec<ExtractionResult> = slots
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| {
                slot.unwrap_or_else(|| {
                    ExtractionResult::provider_failed(id, ProviderErrorKind::Fatal, "extraction task panicked", 0)
                })
            })
            .collect();

        let report = BatchReport::from_results(results);
        info!(
            "Batch finished: {} succeeded, {} failed, {} provider calls",
            report.succeeded, report.failed, report.total_attempts
        );
        report
    }
}

/// Work done by the first claimant of a content hash.
async fn run_claimed(
    client: Arc<ExtractionClient>,
    semaphore: Arc<Semaphore>,
    task: ExtractionTask,
    deadline: Deadline,
) -> ExtractionResult {
    let acquire = semaphore.acquire_owned();
    let permit = match deadline.instant() {
        Some(at) => match tokio::time::timeout_at(at, acquire).await {
            Ok(permit) => permit,
            Err(_) => return ExtractionResult::deadline_exceeded(task.document_id, 0),
        },
        None => acquire.await,
    };

    let Ok(_permit) = permit else {
        return ExtractionResult::provider_failed(
            task.document_id,
            ProviderErrorKind::Fatal,
            "worker pool closed",
            0,
        );
    };

    client.extract(&task, deadline).await
}
