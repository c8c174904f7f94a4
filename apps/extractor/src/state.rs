use std::sync::Arc;

use crate::config::Config;
use crate::extraction::jobs::BatchRegistry;
use crate::extraction::pipeline::Pipeline;
use crate::schema::Schema;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Parser + orchestrator shared by every batch.
    pub pipeline: Arc<Pipeline>,
    pub batches: BatchRegistry,
    /// Loaded from `DEFAULT_SCHEMA_PATH`. When unset, batches without a schema
    /// use the built-in default for their specialty.
    pub default_schema: Option<Arc<Schema>>,
}
