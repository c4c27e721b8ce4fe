//! Lifecycle tests against the in-process router with a stub OCR engine.
//!
//! A stub engine keeps these independent of model downloads and network:
//! the properties under test live in the task lifecycle, the validation
//! layer, and the extraction fallback, not in the recognizer.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use invoice_ocr_server::config::{AzureConfig, Config};
use invoice_ocr_server::engine::{OcrEngine, OcrOptions, PageDetections, TextRegion};
use invoice_ocr_server::error::ApiError;
use invoice_ocr_server::extract::llm::AzureExtractor;
use invoice_ocr_server::registry::TaskRegistry;
use invoice_ocr_server::server::{router, AppState};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct StubEngine;

impl OcrEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn process(
        &self,
        _path: &Path,
        _options: &OcrOptions,
    ) -> Result<Vec<PageDetections>, ApiError> {
        let lines = [
            "INVOICE",
            "Invoice No: INV-2024-001",
            "Invoice Date: 12/03/2024",
            "Vendor: Acme Supplies Ltd",
            "Bill To: Globex Corporation",
            "Total Amount: 1234.56",
            "Tax: 234.56",
        ];
        Ok(vec![PageDetections {
            regions: lines
                .iter()
                .map(|line| TextRegion {
                    text: line.to_string(),
                    confidence: 0.9,
                })
                .collect(),
        }])
    }

    fn supported_formats(&self) -> Vec<String> {
        vec!["image/png".to_string(), "application/pdf".to_string()]
    }

    fn supported_languages(&self) -> Vec<String> {
        vec!["en".to_string()]
    }
}

struct FailingEngine;

impl OcrEngine for FailingEngine {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn process(
        &self,
        _path: &Path,
        _options: &OcrOptions,
    ) -> Result<Vec<PageDetections>, ApiError> {
        Err(ApiError::ProcessingError("engine exploded".to_string()))
    }

    fn supported_formats(&self) -> Vec<String> {
        vec![]
    }

    fn supported_languages(&self) -> Vec<String> {
        vec![]
    }
}

/// Sleeps long enough for the test to observe the `processing` state.
struct SlowEngine;

impl OcrEngine for SlowEngine {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn process(
        &self,
        _path: &Path,
        _options: &OcrOptions,
    ) -> Result<Vec<PageDetections>, ApiError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(vec![PageDetections { regions: vec![] }])
    }

    fn supported_formats(&self) -> Vec<String> {
        vec![]
    }

    fn supported_languages(&self) -> Vec<String> {
        vec![]
    }
}

fn azure_unconfigured() -> AzureConfig {
    AzureConfig {
        endpoint: None,
        api_key: None,
        deployment: "gpt-4o".to_string(),
        api_version: "2024-08-01-preview".to_string(),
        request_timeout_secs: 5,
    }
}

fn test_app(engine: Arc<dyn OcrEngine>, dir: &TempDir, max_file_size: usize) -> Router {
    let upload_dir = dir.path().join("uploads");
    std::fs::create_dir_all(&upload_dir).unwrap();

    router(AppState {
        registry: Arc::new(TaskRegistry::new()),
        engine,
        extractor: Arc::new(AzureExtractor::new(azure_unconfigured())),
        config: Arc::new(Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            default_language: "en".to_string(),
            max_file_size,
            upload_dir,
            ocr_timeout_secs: 10,
            azure: azure_unconfigured(),
        }),
    })
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send_raw(app, request).await;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body was not JSON")
    };
    (status, body)
}

async fn send_raw(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

/// Write a fixture file and submit it via the JSON `file_path` form.
async fn submit_file(app: &Router, dir: &TempDir, name: &str, contents: &[u8]) -> (StatusCode, Value) {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    send(
        app,
        post_json(
            "/ocr/process",
            json!({"file_path": path.to_string_lossy(), "language": "en", "use_gpu": false}),
        ),
    )
    .await
}

async fn wait_for_terminal(app: &Router, task_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(app, get(&format!("/ocr/status/{task_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "processing" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

#[tokio::test]
async fn health_reports_llm_configuration() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["services"]["llm"], "not_configured");
}

#[tokio::test]
async fn info_reports_limits_and_engine() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    let (status, body) = send(&app, get("/info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["engine"], "stub");
    assert_eq!(body["max_file_size_bytes"], 1 << 20);
    assert_eq!(body["default_language"], "en");
}

#[tokio::test]
async fn submission_returns_unique_processing_tasks() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    let (status_a, body_a) = submit_file(&app, &dir, "a.png", b"png bytes").await;
    let (status_b, body_b) = submit_file(&app, &dir, "b.png", b"png bytes").await;

    assert_eq!(status_a, StatusCode::ACCEPTED);
    assert_eq!(status_b, StatusCode::ACCEPTED);
    assert_eq!(body_a["status"], "processing");
    assert_ne!(body_a["task_id"], body_b["task_id"]);

    // Each id is immediately queryable.
    let task_id = body_a["task_id"].as_str().unwrap();
    let (status, body) = send(&app, get(&format!("/ocr/status/{task_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task_id"], task_id);
}

#[tokio::test]
async fn full_lifecycle_submit_poll_result_extract() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    let (status, body) = submit_file(&app, &dir, "invoice.png", b"png bytes").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let terminal = wait_for_terminal(&app, &task_id).await;
    assert_eq!(terminal["status"], "completed");
    assert_eq!(terminal["error"], Value::Null);

    let (status, body) = send(&app, get(&format!("/ocr/result/{task_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    let results = &body["results"];
    assert_eq!(results["pages_processed"], 1);
    assert!(results["all_text"]
        .as_str()
        .unwrap()
        .contains("Invoice No: INV-2024-001"));
    let regions = results["detected_texts"].as_array().unwrap();
    assert!(!regions.is_empty());
    assert!(regions[0]["confidence"].as_f64().is_some());

    let (status, body) = send(
        &app,
        post_json("/invoice/extract", json!({"task_id": task_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["invoice_data"];
    for key in [
        "invoice_number",
        "invoice_date",
        "vendor_name",
        "customer_name",
        "total_amount",
        "tax_amount",
    ] {
        assert!(data.get(key).is_some(), "missing field {key}");
    }
    assert_eq!(data["_extraction_method"], "regex_fallback");
    assert_eq!(data["_extraction_status"], "fallback");
    assert_eq!(data["invoice_number"], "INV-2024-001");
    assert_eq!(data["invoice_date"], "12/03/2024");
    assert_eq!(data["vendor_name"], "Acme Supplies Ltd");
    assert_eq!(data["customer_name"], "Globex Corporation");
    assert_eq!(data["total_amount"], "1234.56");
    assert_eq!(data["tax_amount"], "234.56");
}

#[tokio::test]
async fn result_is_pending_before_terminal_state() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(SlowEngine), &dir, 1 << 20);

    let (_, body) = submit_file(&app, &dir, "slow.png", b"png bytes").await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&format!("/ocr/result/{task_id}"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "processing");
    assert!(body.get("results").is_none());

    // Extraction is refused while the task is still running.
    let (status, body) = send(
        &app,
        post_json("/invoice/extract", json!({"task_id": task_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "TASK_NOT_COMPLETED");
}

#[tokio::test]
async fn engine_failure_becomes_a_terminal_failed_task() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(FailingEngine), &dir, 1 << 20);

    let (_, body) = submit_file(&app, &dir, "bad.png", b"png bytes").await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let terminal = wait_for_terminal(&app, &task_id).await;
    assert_eq!(terminal["status"], "failed");
    assert!(terminal["error"]
        .as_str()
        .unwrap()
        .contains("engine exploded"));

    let (status, body) = send(&app, get(&format!("/ocr/result/{task_id}"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "PROCESSING_FAILED");

    let (status, body) = send(
        &app,
        post_json("/invoice/extract", json!({"task_id": task_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "TASK_NOT_COMPLETED");
}

#[tokio::test]
async fn unknown_task_ids_yield_not_found_everywhere() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    for request in [
        get("/ocr/status/deadbeef"),
        get("/ocr/result/deadbeef"),
        get("/files/deadbeef"),
        delete("/tasks/deadbeef"),
        post_json("/invoice/extract", json!({"task_id": "deadbeef"})),
    ] {
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "TASK_NOT_FOUND");
    }
}

#[tokio::test]
async fn unsupported_extension_is_rejected_before_task_creation() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    let (status, body) = submit_file(&app, &dir, "notes.txt", b"plain text").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNSUPPORTED_FORMAT");

    let (_, body) = send(&app, get("/tasks")).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn oversized_file_is_rejected_before_task_creation() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 100);

    let (status, body) = submit_file(&app, &dir, "big.png", &[0u8; 1024]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "FILE_TOO_LARGE");

    let (_, body) = send(&app, get("/tasks")).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn invalid_payloads_are_rejected_synchronously() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    // No body at all.
    let (status, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/ocr/process")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_FILE");

    // JSON without a usable file_path.
    let (status, body) = send(&app, post_json("/ocr/process", json!({"language": "en"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    // file_path pointing nowhere.
    let (status, body) = send(
        &app,
        post_json("/ocr/process", json!({"file_path": "/no/such/file.png"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    // Extraction without a task id.
    let (status, body) = send(&app, post_json("/invoice/extract", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn multipart_upload_stages_and_downloads_the_original_bytes() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"invoice.png\"\r\n\
         Content-Type: image/png\r\n\r\n\
         PNGDATA\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"language\"\r\n\r\n\
         en\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"use_gpu\"\r\n\r\n\
         true\r\n\
         --{b}--\r\n",
        b = boundary
    );

    let request = Request::builder()
        .method("POST")
        .uri("/ocr/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["task_id"].as_str().unwrap().to_string();

    wait_for_terminal(&app, &task_id).await;

    let (status, bytes) = send_raw(&app, get(&format!("/files/{task_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"PNGDATA");
}

#[tokio::test]
async fn multipart_without_file_field_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"language\"\r\n\r\n\
         en\r\n\
         --{b}--\r\n",
        b = boundary
    );

    let request = Request::builder()
        .method("POST")
        .uri("/ocr/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_FILE");
}

#[tokio::test]
async fn delete_removes_task_and_staged_file() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    let (_, body) = submit_file(&app, &dir, "gone.png", b"png bytes").await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_for_terminal(&app, &task_id).await;

    let upload_dir = dir.path().join("uploads");
    assert_eq!(std::fs::read_dir(&upload_dir).unwrap().count(), 1);

    let (status, _) = send(&app, delete(&format!("/tasks/{task_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(std::fs::read_dir(&upload_dir).unwrap().count(), 0);

    // A second delete sees nothing.
    let (status, _) = send(&app, delete(&format!("/tasks/{task_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn task_listing_is_newest_first_and_filterable() {
    let dir = TempDir::new().unwrap();
    let app = test_app(Arc::new(StubEngine), &dir, 1 << 20);

    let (_, first) = submit_file(&app, &dir, "first.png", b"png bytes").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (_, second) = submit_file(&app, &dir, "second.png", b"png bytes").await;

    let first_id = first["task_id"].as_str().unwrap().to_string();
    let second_id = second["task_id"].as_str().unwrap().to_string();
    wait_for_terminal(&app, &first_id).await;
    wait_for_terminal(&app, &second_id).await;

    let (status, body) = send(&app, get("/tasks")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["tasks"][0]["task_id"], second_id.as_str());

    let (_, body) = send(&app, get("/tasks?status=completed")).await;
    assert_eq!(body["total"], 2);

    let (_, body) = send(&app, get("/tasks?status=processing")).await;
    assert_eq!(body["total"], 0);

    let (status, body) = send(&app, get("/tasks?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}
