pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::extraction::handlers;
use crate::state::AppState;

/// Upload ceiling for a whole batch request.
const MAX_BATCH_BODY_BYTES: usize = 256 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Batches
        .route(
            "/api/v1/batches",
            post(handlers::handle_submit_batch).layer(DefaultBodyLimit::max(MAX_BATCH_BODY_BYTES)),
        )
        .route("/api/v1/batches/:id", get(handlers::handle_get_batch))
        // Schema tooling
        .route(
            "/api/v1/schema/validate",
            post(handlers::handle_validate_schema),
        )
        .route(
            "/api/v1/schema/default",
            get(handlers::handle_default_schema),
        )
        .route(
            "/api/v1/extractions/validate",
            post(handlers::handle_validate_output),
        )
        .route(
            "/api/v1/specialties",
            get(handlers::handle_list_specialties),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::document::docx::tests::build_docx;
    use crate::document::{FileParser, DOCX_MIME};
    use crate::extraction::client::{ExtractionClient, GenerationSettings};
    use crate::extraction::jobs::BatchRegistry;
    use crate::extraction::orchestrator::Orchestrator;
    use crate::extraction::pipeline::Pipeline;
    use crate::extraction::retry::RetryPolicy;
    use crate::extraction::testing::ScriptedProvider;
    use crate::models::extraction::BatchReport;
    use crate::schema::Schema;

    const BOUNDARY: &str = "extractor-test-boundary";
    const SCHEMA: &str = "version: 1\nvariables:\n  - {name: nombre, type: string, required: true}\n";

    fn state_with(provider: Arc<ScriptedProvider>, config: Config) -> AppState {
        let client = ExtractionClient::new(provider, RetryPolicy::default(), GenerationSettings::default());
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(client)));
        AppState {
            config,
            pipeline: Arc::new(Pipeline::new(Arc::new(FileParser), orchestrator)),
            batches: BatchRegistry::new(Duration::from_secs(60)),
            default_schema: None,
        }
    }

    fn state() -> AppState {
        let provider = Arc::new(ScriptedProvider::always(Ok(r#"{"nombre": "Ana"}"#.into())));
        state_with(provider, Config::default())
    }

    enum Part<'a> {
        File(&'a str, &'a str, Vec<u8>),
        Text(&'a str, &'a str),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File(filename, content_type, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}").as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn submit(parts: &[Part<'_>]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/batches")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn send_json(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(router, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    /// Polls until the batch reports completion.
    async fn wait_for_batch(router: &Router, batch_id: &str) -> Value {
        for _ in 0..200 {
            let (status, job) = send_json(router.clone(), get(&format!("/api/v1/batches/{batch_id}"))).await;
            assert_eq!(status, StatusCode::OK);
            if job["state"] == "completed" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch {batch_id} did not complete");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send_json(build_router(state()), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["provider"], "scripted");
    }

    #[tokio::test]
    async fn test_batch_round_trip() {
        let router = build_router(state());
        let request = submit(&[
            Part::File("ana.docx", DOCX_MIME, build_docx(&["Ana Gómez", "Electricista"], 0)),
            Part::File("notas.txt", "text/plain", b"hola".to_vec()),
            Part::Text("schema", SCHEMA),
            Part::Text("max_concurrency", "2"),
        ]);

        let (status, accepted) = send_json(router.clone(), request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["total"], 2);
        assert_eq!(accepted["files"][0]["filename"], "ana.docx");

        let job = wait_for_batch(&router, accepted["batch_id"].as_str().unwrap()).await;
        assert_eq!(job["completed"], 2);
        let report = &job["report"];
        assert_eq!(report["succeeded"], 1);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["results"][0]["status"], "Success");
        assert_eq!(report["results"][0]["data"]["nombre"], "Ana");
        assert_eq!(report["results"][1]["status"], "ParseFailed");
        assert_eq!(
            report["results"][0]["document_id"],
            accepted["files"][0]["document_id"]
        );
    }

    #[tokio::test]
    async fn test_batch_truncated_to_file_limit() {
        let config = Config {
            max_files_per_batch: 1,
            ..Config::default()
        };
        let provider = Arc::new(ScriptedProvider::always(Ok(r#"{"nombre": "Ana"}"#.into())));
        let router = build_router(state_with(provider, config));
        let request = submit(&[
            Part::File("a.docx", DOCX_MIME, build_docx(&["Ana"], 0)),
            Part::File("b.docx", DOCX_MIME, build_docx(&["Luis"], 0)),
            Part::Text("schema", SCHEMA),
        ]);

        let (status, accepted) = send_json(router, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["total"], 1);
    }

    #[tokio::test]
    async fn test_batch_without_files_is_rejected() {
        let router = build_router(state());
        let (status, body) = send_json(router, submit(&[Part::Text("schema", SCHEMA)])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_batch_with_invalid_schema_is_rejected() {
        let router = build_router(state());
        let request = submit(&[
            Part::File("a.docx", DOCX_MIME, build_docx(&["Ana"], 0)),
            Part::Text("schema", "variables: []"),
        ]);
        let (status, body) = send_json(router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "SCHEMA_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_batch() {
        let router = build_router(state());
        let uri = format!("/api/v1/batches/{}", uuid::Uuid::new_v4());
        let (status, body) = send_json(router, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_batch_expires() {
        let state = state();
        let registry = state.batches.clone();
        let router = build_router(state);
        let batch_id = registry.create(Vec::new());
        registry.complete(batch_id, BatchReport::from_results(Vec::new()));
        let uri = format!("/api/v1/batches/{batch_id}");

        let (status, job) = send_json(router.clone(), get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["state"], "completed");

        tokio::time::advance(Duration::from_secs(61)).await;
        let (status, body) = send_json(router, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_validate_schema() {
        let router = build_router(state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/schema/validate")
            .body(Body::from(
                "version: 1\nvariables:\n  - {name: nombre, type: string, required: true}\n  - {name: idiomas, type: \"list[string]\"}\n",
            ))
            .unwrap();

        let (status, body) = send_json(router.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["variable_count"], 2);
        assert_eq!(body["required"], json!(["nombre"]));
        let canonical = body["canonical_yaml"].as_str().unwrap();
        assert!(canonical.contains("list_of_string"));
        assert!(Schema::parse(canonical).is_ok());

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/schema/validate")
            .body(Body::from("version: 1\n"))
            .unwrap();
        let (status, body) = send_json(router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "SCHEMA_ERROR");
    }

    #[tokio::test]
    async fn test_default_schema_per_specialty() {
        let router = build_router(state());
        let (status, body) = send(router, get("/api/v1/schema/default?specialty=mecanico")).await;
        assert_eq!(status, StatusCode::OK);

        let schema = Schema::parse(std::str::from_utf8(&body).unwrap()).unwrap();
        assert!(schema.variable("experiencia_mecanico_industrial_confirmada").is_some());
    }

    #[tokio::test]
    async fn test_validate_output() {
        let router = build_router(state());
        let request = |output: &str| {
            Request::builder()
                .method("POST")
                .uri("/api/v1/extractions/validate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "schema": SCHEMA, "output": output }).to_string(),
                ))
                .unwrap()
        };

        let (status, body) = send_json(router.clone(), request("```json\n{\"nombre\": \"Ana\"}\n```")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["data"]["nombre"], "Ana");

        let (status, body) = send_json(router, request("{}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], false);
        assert_eq!(body["error"]["kind"], "MissingField");
        assert_eq!(body["error"]["field"], "nombre");
    }

    #[tokio::test]
    async fn test_list_specialties() {
        let (status, body) = send_json(build_router(state()), get("/api/v1/specialties")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["specialties"].as_array().unwrap().len(), 5);
    }
}
