//! In-memory registry of submitted batches, polled by `GET /api/v1/batches/:id`.
//!
//! Running batches are kept until they finish. Finished batches are kept for
//! the retention window and pruned on the next submission.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::extraction::orchestrator::BatchProgress;
use crate::extraction::pipeline::FileEntry;
use crate::models::extraction::BatchReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Running,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchJob {
    pub batch_id: Uuid,
    pub state: BatchState,
    pub completed: usize,
    pub total: usize,
    pub files: Vec<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchReport>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

struct Entry {
    job: BatchJob,
    /// Set when the batch finishes.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Clone)]
pub struct BatchRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, Entry>>>,
    retention: Duration,
}

impl Default for BatchRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl BatchRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Registers a running batch and returns its id. Drops expired batches first.
    pub fn create(&self, files: Vec<FileEntry>) -> Uuid {
        let batch_id = Uuid::new_v4();
        let job = BatchJob {
            batch_id,
            state: BatchState::Running,
            completed: 0,
            total: files.len(),
            files,
            report: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.is_expired(now));
        if jobs.len() < before {
            debug!("Pruned {} expired batches", before - jobs.len());
        }
        jobs.insert(
            batch_id,
            Entry {
                job,
                expires_at: None,
            },
        );
        batch_id
    }

    /// Records progress. Never moves `completed` backwards.
    pub fn update_progress(&self, batch_id: Uuid, progress: BatchProgress) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = jobs.get_mut(&batch_id) {
            entry.job.completed = entry.job.completed.max(progress.completed);
        }
    }

    pub fn complete(&self, batch_id: Uuid, report: BatchReport) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = jobs.get_mut(&batch_id) {
            entry.job.state = BatchState::Completed;
            entry.job.completed = report.total();
            entry.job.report = Some(report);
            entry.job.finished_at = Some(Utc::now());
            entry.expires_at = Some(Instant::now() + self.retention);
        }
    }

    /// Returns `None` for unknown batches and for finished batches past retention.
    pub fn get(&self, batch_id: Uuid) -> Option<BatchJob> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(&batch_id)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::extraction::{DocumentId, ExtractionResult};

    fn files(n: usize) -> Vec<FileEntry> {
        (0..n)
            .map(|i| FileEntry {
                filename: format!("cv{i}.pdf"),
                document_id: DocumentId::new(format!("{i:064x}")),
            })
            .collect()
    }

    #[test]
    fn test_lifecycle() {
        let registry = BatchRegistry::default();
        let id = registry.create(files(2));

        let job = registry.get(id).unwrap();
        assert_eq!(job.state, BatchState::Running);
        assert_eq!((job.completed, job.total), (0, 2));

        registry.update_progress(id, BatchProgress { completed: 1, total: 2 });
        assert_eq!(registry.get(id).unwrap().completed, 1);

        let report = BatchReport::from_results(vec![
            ExtractionResult::deadline_exceeded(DocumentId::new("a"), 0),
            ExtractionResult::deadline_exceeded(DocumentId::new("b"), 0),
        ]);
        registry.complete(id, report);

        let job = registry.get(id).unwrap();
        assert_eq!(job.state, BatchState::Completed);
        assert_eq!(job.completed, 2);
        assert!(job.finished_at.is_some());
        assert_eq!(job.report.unwrap().failed, 2);
    }

    #[test]
    fn test_progress_never_regresses() {
        let registry = BatchRegistry::default();
        let id = registry.create(files(3));
        registry.update_progress(id, BatchProgress { completed: 2, total: 3 });
        registry.update_progress(id, BatchProgress { completed: 1, total: 3 });
        assert_eq!(registry.get(id).unwrap().completed, 2);
    }

    #[test]
    fn test_unknown_batch() {
        let registry = BatchRegistry::default();
        registry.update_progress(Uuid::new_v4(), BatchProgress { completed: 1, total: 1 });
        assert!(registry.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_running_job_omits_report() {
        let registry = BatchRegistry::default();
        let id = registry.create(files(1));
        let json = serde_json::to_value(registry.get(id).unwrap()).unwrap();
        assert_eq!(json["state"], "running");
        assert!(json.get("report").is_none());
        assert_eq!(json["files"][0]["filename"], "cv0.pdf");
    }

    fn finished_report() -> BatchReport {
        BatchReport::from_results(vec![ExtractionResult::deadline_exceeded(DocumentId::new("a"), 0)])
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_batch_expires_after_retention() {
        let registry = BatchRegistry::new(Duration::from_secs(60));
        let id = registry.create(files(1));
        registry.complete(id, finished_report());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(registry.get(id).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_batches_pruned_on_create() {
        let registry = BatchRegistry::new(Duration::from_secs(60));
        let finished = registry.create(files(1));
        registry.complete(finished, finished_report());
        let running = registry.create(files(1));

        tokio::time::advance(Duration::from_secs(3600)).await;
        let fresh = registry.create(files(1));

        let jobs = registry.jobs.read().unwrap();
        assert!(!jobs.contains_key(&finished));
        assert!(jobs.contains_key(&running));
        assert!(jobs.contains_key(&fresh));
    }
}
