use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::extraction::jobs::BatchJob;
use crate::extraction::orchestrator::{BatchProgress, ProgressCallback};
use crate::extraction::pipeline::{file_entries, DocumentInput, FileEntry};
use crate::extraction::prompts::{PromptConfig, Specialty};
use crate::extraction::validator::{validate, ValidationError, ValidationWarning};
use crate::schema::defaults::{default_schema, default_schema_for};
use crate::schema::Schema;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Batches
// ────────────────────────────────────────────────────────────────────────────

/// Parsed multipart body of a batch submission.
#[derive(Default)]
struct BatchForm {
    documents: Vec<DocumentInput>,
    schema: Option<String>,
    prompt_config: Option<PromptConfig>,
    max_concurrency: Option<usize>,
    deadline_secs: Option<u64>,
}

async fn read_batch_form(multipart: &mut Multipart) -> Result<BatchForm, AppError> {
    let mut form = BatchForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read multipart: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "file" => {
                let filename = field.file_name().unwrap_or("unknown").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file '{filename}': {e}")))?;
                tracing::debug!("Received {} ({} bytes)", filename, bytes.len());
                form.documents.push(DocumentInput {
                    filename,
                    content_type,
                    bytes,
                });
            }
            "schema" => form.schema = Some(field_text(field, &name).await?),
            "prompt_config" => {
                let raw = field_text(field, &name).await?;
                let config = serde_json::from_str(&raw)
                    .map_err(|e| AppError::Validation(format!("Invalid prompt_config: {e}")))?;
                form.prompt_config = Some(config);
            }
            "max_concurrency" => form.max_concurrency = Some(parse_field(field, &name).await?),
            "deadline_secs" => form.deadline_secs = Some(parse_field(field, &name).await?),
            other => warn!("Ignoring unknown multipart field '{}'", other),
        }
    }

    Ok(form)
}

async fn field_text(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read field '{name}': {e}")))
}

async fn parse_field<T>(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
{
    let raw = field_text(field, name).await?;
    raw.trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("Field '{name}' must be a positive integer, got '{raw}'")))
}

/// Explicit schema, then the configured default file, then the built-in default.
fn resolve_schema(
    state: &AppState,
    explicit: Option<&str>,
    prompt_config: &PromptConfig,
) -> Result<Arc<Schema>, AppError> {
    if let Some(raw) = explicit.filter(|s| !s.trim().is_empty()) {
        return Ok(Arc::new(Schema::parse(raw)?));
    }
    if let Some(schema) = &state.default_schema {
        return Ok(schema.clone());
    }
    Ok(Arc::new(default_schema_for(prompt_config)?))
}

#[derive(Serialize)]
pub struct BatchAccepted {
    pub batch_id: Uuid,
    pub total: usize,
    pub files: Vec<FileEntry>,
}

/// POST /api/v1/batches
pub async fn handle_submit_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<BatchAccepted>), AppError> {
    let form = read_batch_form(&mut multipart).await?;

    let mut documents = form.documents;
    if documents.is_empty() {
        return Err(AppError::Validation("At least one file is required".to_string()));
    }
    let limit = state.config.max_files_per_batch;
    if documents.len() > limit {
        warn!(
            "Batch has {} files, processing only the first {}",
            documents.len(),
            limit
        );
        documents.truncate(limit);
    }

    let prompt_config = Arc::new(form.prompt_config.unwrap_or_default());
    let schema = resolve_schema(&state, form.schema.as_deref(), &prompt_config)?;

    let mut options = state.config.batch_options();
    if let Some(n) = form.max_concurrency {
        options.max_concurrency = n;
    }
    match form.deadline_secs {
        Some(0) => return Err(AppError::Validation("deadline_secs must be at least 1".to_string())),
        Some(secs) => options.deadline = Some(Duration::from_secs(secs)),
        None => {}
    }

    let files = file_entries(&documents);
    let batch_id = state.batches.create(files.clone());
    let total = documents.len();

    info!(
        "Batch {} accepted: {} files, schema v{} ({} fields), specialty {}",
        batch_id,
        total,
        schema.version,
        schema.variables.len(),
        prompt_config.specialty.as_str()
    );

    let registry = state.batches.clone();
    let on_progress: ProgressCallback =
        Arc::new(move |progress: BatchProgress| registry.update_progress(batch_id, progress));
    let pipeline = state.pipeline.clone();
    let batches = state.batches.clone();

    tokio::spawn(async move {
        let report = pipeline
            .run(&documents, schema, prompt_config, options, Some(on_progress))
            .await;
        info!(
            "Batch {} completed: {} succeeded, {} failed",
            batch_id, report.succeeded, report.failed
        );
        batches.complete(batch_id, report);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchAccepted {
            batch_id,
            total,
            files,
        }),
    ))
}

/// GET /api/v1/batches/:id
pub async fn handle_get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchJob>, AppError> {
    state
        .batches
        .get(batch_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Batch {batch_id} not found")))
}

// ────────────────────────────────────────────────────────────────────────────
// Schema tooling
// ────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SchemaCheckResponse {
    pub version: u32,
    pub variable_count: usize,
    pub required: Vec<String>,
    pub canonical_yaml: String,
}

/// POST /api/v1/schema/validate
/// Body is the schema YAML.
pub async fn handle_validate_schema(body: String) -> Result<Json<SchemaCheckResponse>, AppError> {
    let schema = Schema::parse(&body)?;
    Ok(Json(SchemaCheckResponse {
        version: schema.version,
        variable_count: schema.variables.len(),
        required: schema.required_names().map(str::to_string).collect(),
        canonical_yaml: schema.to_canonical_yaml()?,
    }))
}

#[derive(Deserialize)]
pub struct SpecialtyQuery {
    #[serde(default)]
    pub specialty: Specialty,
}

/// GET /api/v1/schema/default?specialty=electricista
pub async fn handle_default_schema(
    Query(params): Query<SpecialtyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let yaml = default_schema(params.specialty)?.to_canonical_yaml()?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml))
}

#[derive(Deserialize)]
pub struct ValidateOutputRequest {
    /// Schema YAML.
    pub schema: String,
    /// Raw model output, fenced or not.
    pub output: String,
}

#[derive(Serialize)]
pub struct ValidateOutputResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ValidationWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ValidationError>,
}

/// POST /api/v1/extractions/validate
/// Runs the Validator on a raw model output without calling a provider.
pub async fn handle_validate_output(
    Json(req): Json<ValidateOutputRequest>,
) -> Result<Json<ValidateOutputResponse>, AppError> {
    let schema = Schema::parse(&req.schema)?;
    let response = match validate(&req.output, &schema) {
        Ok(record) => ValidateOutputResponse {
            valid: true,
            data: Some(record.data),
            warnings: record.warnings,
            error: None,
        },
        Err(error) => ValidateOutputResponse {
            valid: false,
            data: None,
            warnings: Vec::new(),
            error: Some(error),
        },
    };
    Ok(Json(response))
}

/// GET /api/v1/specialties
pub async fn handle_list_specialties() -> Json<Value> {
    let specialties: Vec<Value> = Specialty::ALL
        .iter()
        .map(|s| {
            let template = s.template();
            json!({
                "specialty": s.as_str(),
                "title": template.title,
                "experience_field": template.experience_field,
            })
        })
        .collect();
    Json(json!({ "specialties": specialties }))
}
