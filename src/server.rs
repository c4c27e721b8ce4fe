//! HTTP surface: intake, lifecycle queries, extraction, task management.

use crate::config::Config;
use crate::engine::{OcrEngine, OcrOptions};
use crate::engines::ocrs::OcrsEngine;
use crate::error::ApiError;
use crate::extract::{self, llm::AzureExtractor, InvoiceRecord};
use crate::ocr::{self, OcrResults};
use crate::registry::{Submission, TaskRegistry, TaskStatus, TaskSummary};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path as UrlPath, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// File extensions accepted by intake.
pub const ALLOWED_EXTENSIONS: &[&str] =
    &["pdf", "png", "jpg", "jpeg", "bmp", "tiff", "tif", "webp"];

/// Field names accepted for the multipart upload, first match wins.
const FILE_FIELDS: &[&str] = &["file", "pdf", "image", "upload"];

/// Upper bound on JSON request bodies; uploads go through multipart.
const JSON_BODY_LIMIT: usize = 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TaskRegistry>,
    pub engine: Arc<dyn OcrEngine>,
    pub extractor: Arc<AzureExtractor>,
    pub config: Arc<Config>,
}

/// Submission acknowledgement
#[derive(Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub message: String,
}

/// Status lookup response
#[derive(Serialize)]
pub struct StatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// Result lookup while the task is still running
#[derive(Serialize)]
pub struct PendingResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Result lookup once the task completed
#[derive(Serialize)]
pub struct ResultResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub results: OcrResults,
}

/// Extraction response
#[derive(Serialize)]
pub struct ExtractResponse {
    pub task_id: String,
    pub invoice_data: InvoiceRecord,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceStatus,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    pub llm: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub engine: String,
    pub supported_formats: Vec<String>,
    pub supported_languages: Vec<String>,
    pub max_file_size_bytes: usize,
    pub default_language: String,
}

/// Task listing response
#[derive(Serialize)]
pub struct TasksResponse {
    pub total: usize,
    pub tasks: Vec<TaskSummary>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub task_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    use_gpu: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

/// Build the application router around shared state.
pub fn router(state: AppState) -> Router {
    let max_file_size = state.config.max_file_size;

    Router::new()
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .route("/ocr/process", post(handle_process))
        .route("/ocr/status/:task_id", get(handle_status))
        .route("/ocr/result/:task_id", get(handle_result))
        .route("/invoice/extract", post(handle_extract))
        .route("/tasks", get(handle_list_tasks))
        .route("/tasks/:task_id", delete(handle_delete_task))
        .route("/files/:task_id", get(handle_download))
        .layer(DefaultBodyLimit::max(max_file_size))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server with the default engine
pub async fn run(config: Config) -> anyhow::Result<()> {
    let engine = OcrsEngine::new()?;
    run_with_engine(config, Arc::new(engine)).await
}

pub async fn run_with_engine(config: Config, engine: Arc<dyn OcrEngine>) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        registry: Arc::new(TaskRegistry::new()),
        extractor: Arc::new(AzureExtractor::new(config.azure.clone())),
        engine,
        config: Arc::new(config),
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Accept a submission, stage its file, and start OCR in the background.
async fn handle_process(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let submission = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &()).await.map_err(|e| {
            ApiError::InvalidRequest(format!("Failed to parse multipart body: {}", e))
        })?;
        stage_multipart(&state, multipart).await?
    } else {
        let body = axum::body::to_bytes(request.into_body(), JSON_BODY_LIMIT)
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to read request body: {}", e)))?;
        if body.is_empty() {
            return Err(ApiError::MissingFile);
        }
        let parsed: ProcessRequest = serde_json::from_slice(&body).map_err(|e| {
            ApiError::InvalidRequest(format!(
                "expected multipart upload or JSON with 'file_path': {}",
                e
            ))
        })?;
        stage_from_path(&state, parsed).await?
    };

    let task_id = state.registry.create(submission);
    spawn_ocr(state, task_id.clone());

    tracing::info!(task_id = %task_id, "OCR processing started");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id,
            status: TaskStatus::Processing,
            message: "OCR processing started".to_string(),
        }),
    )
        .into_response())
}

/// Run the OCR stage for a task and record its terminal state.
fn spawn_ocr(state: AppState, task_id: String) {
    tokio::spawn(async move {
        let Some(task) = state.registry.get(&task_id) else {
            return;
        };
        let options = OcrOptions {
            language: task.language.clone(),
            use_gpu: task.use_gpu,
        };
        let timeout = Duration::from_secs(state.config.ocr_timeout_secs);

        match ocr::run_ocr(state.engine.clone(), task.staged_path.clone(), options, timeout).await {
            Ok(results) => {
                tracing::info!(
                    task_id = %task_id,
                    pages = results.pages_processed,
                    regions = results.detected_texts.len(),
                    "OCR completed"
                );
                if !state.registry.complete(&task_id, results) {
                    tracing::warn!(task_id = %task_id, "task already terminal, result dropped");
                }
            }
            Err(err) => {
                tracing::error!(task_id = %task_id, error = %err, "OCR stage failed");
                state.registry.fail(&task_id, err.to_string());
            }
        }
    });
}

async fn handle_status(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| ApiError::TaskNotFound(task_id.clone()))?;

    Ok(Json(StatusResponse {
        task_id,
        status: task.status,
        error: task.error,
    }))
}

async fn handle_result(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<Response, ApiError> {
    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| ApiError::TaskNotFound(task_id.clone()))?;

    match task.status {
        TaskStatus::Processing => Ok((
            StatusCode::ACCEPTED,
            Json(PendingResponse {
                task_id,
                status: TaskStatus::Processing,
            }),
        )
            .into_response()),
        TaskStatus::Failed => Err(ApiError::ProcessingFailed(
            task.error.unwrap_or_else(|| "processing failed".to_string()),
        )),
        TaskStatus::Completed => {
            let results = task
                .result
                .ok_or_else(|| ApiError::Internal("completed task has no result".to_string()))?;
            Ok(Json(ResultResponse {
                task_id,
                status: TaskStatus::Completed,
                results,
            })
            .into_response())
        }
    }
}

/// Derive invoice fields from a completed task's OCR text.
async fn handle_extract(
    State(state): State<AppState>,
    payload: Option<Json<ExtractRequest>>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let task_id = payload
        .and_then(|Json(request)| request.task_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("task_id is required".to_string()))?;

    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| ApiError::TaskNotFound(task_id.clone()))?;
    if task.status != TaskStatus::Completed {
        return Err(ApiError::TaskNotCompleted(task_id));
    }
    let results = task
        .result
        .ok_or_else(|| ApiError::Internal("completed task has no result".to_string()))?;

    let invoice_data = extract::run_extraction(&state.extractor, &results.all_text).await;

    tracing::info!(
        task_id = %task_id,
        method = ?invoice_data.method,
        "invoice extraction finished"
    );

    Ok(Json(ExtractResponse {
        task_id,
        invoice_data,
    }))
}

async fn handle_list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TasksResponse>, ApiError> {
    let filter = match query.status.as_deref() {
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| ApiError::InvalidRequest(format!("unknown status filter: {raw}")))?,
        ),
        None => None,
    };

    let tasks = state.registry.summaries(filter);
    Ok(Json(TasksResponse {
        total: tasks.len(),
        tasks,
    }))
}

async fn handle_delete_task(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let task = state
        .registry
        .remove(&task_id)
        .ok_or_else(|| ApiError::TaskNotFound(task_id.clone()))?;

    if let Err(e) = tokio::fs::remove_file(&task.staged_path).await {
        tracing::warn!("Failed to remove staged file {:?}: {}", task.staged_path, e);
    }

    Ok(Json(DeleteResponse {
        task_id,
        message: "task deleted".to_string(),
    }))
}

/// Download the staged upload for a task.
async fn handle_download(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<Response, ApiError> {
    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| ApiError::TaskNotFound(task_id.clone()))?;

    let bytes = tokio::fs::read(&task.staged_path)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read staged file: {}", e)))?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        task.filename.replace('"', "_")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let llm = if state.extractor.is_configured() {
        "configured"
    } else {
        "not_configured"
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: ServiceStatus {
            llm: llm.to_string(),
        },
    })
}

async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine: state.engine.name().to_string(),
        supported_formats: state.engine.supported_formats(),
        supported_languages: state.engine.supported_languages(),
        max_file_size_bytes: state.config.max_file_size,
        default_language: state.config.default_language.clone(),
    })
}

/// Parse multipart fields and stage the upload under the upload directory.
async fn stage_multipart(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<Submission, ApiError> {
    let mut file_data: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut language: Option<String> = None;
    let mut use_gpu = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("Failed to parse multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if FILE_FIELDS.contains(&name.as_str()) && file_data.is_none() {
            file_name = field.file_name().map(str::to_string);
            file_data = Some(field.bytes().await.map_err(|e| {
                ApiError::InvalidRequest(format!("Failed to read file data: {}", e))
            })?);
        } else {
            match name.as_str() {
                "language" | "lang" => {
                    language = Some(field.text().await.map_err(|e| {
                        ApiError::InvalidRequest(format!("Invalid language: {}", e))
                    })?);
                }
                "use_gpu" => {
                    let raw = field.text().await.map_err(|e| {
                        ApiError::InvalidRequest(format!("Invalid use_gpu: {}", e))
                    })?;
                    use_gpu = parse_bool(&raw);
                }
                _ => {
                    // Ignore unknown fields
                }
            }
        }
    }

    let data = file_data.ok_or(ApiError::MissingFile)?;
    let filename = file_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("empty filename".to_string()))?;

    validate_upload(&filename, data.len(), state.config.max_file_size)?;

    let staged_path = state.config.upload_dir.join(staged_filename(&filename));
    tokio::fs::write(&staged_path, &data)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to stage upload: {}", e)))?;

    Ok(Submission {
        filename,
        staged_path,
        language: normalize_language(language, &state.config),
        use_gpu,
    })
}

/// Copy a caller-named local file into the upload directory.
async fn stage_from_path(
    state: &AppState,
    request: ProcessRequest,
) -> Result<Submission, ApiError> {
    let file_path = request.file_path.trim();
    if file_path.is_empty() {
        return Err(ApiError::InvalidRequest(
            "file is required: multipart key 'file' or JSON 'file_path'".to_string(),
        ));
    }

    let source = PathBuf::from(file_path);
    let metadata = tokio::fs::metadata(&source)
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("failed to read file_path: {}", e)))?;
    if !metadata.is_file() {
        return Err(ApiError::InvalidRequest(format!(
            "file_path is not a file: {}",
            file_path
        )));
    }

    let filename = source
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| ApiError::InvalidRequest("file_path has no filename".to_string()))?;

    validate_upload(&filename, metadata.len() as usize, state.config.max_file_size)?;

    let staged_path = state.config.upload_dir.join(staged_filename(&filename));
    tokio::fs::copy(&source, &staged_path)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to stage upload: {}", e)))?;

    Ok(Submission {
        filename,
        staged_path,
        language: normalize_language(request.language, &state.config),
        use_gpu: request.use_gpu.unwrap_or(false),
    })
}

/// Reject unsupported or oversized files before any task exists.
fn validate_upload(filename: &str, size: usize, max_file_size: usize) -> Result<(), ApiError> {
    if !is_allowed_extension(filename) {
        return Err(ApiError::UnsupportedFormat(filename.to_string()));
    }
    if size > max_file_size {
        return Err(ApiError::FileTooLarge {
            size,
            max: max_file_size,
        });
    }
    Ok(())
}

pub fn is_allowed_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Unique staged name keeping a sanitized stem and the original extension.
fn staged_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let stem = sanitize_stem(&stem);
    let unique = Uuid::new_v4().simple();
    if ext.is_empty() {
        format!("{stem}_{unique}")
    } else {
        format!("{stem}_{unique}.{ext}")
    }
}

fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

fn normalize_language(language: Option<String>, config: &Config) -> String {
    language
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
        .unwrap_or_else(|| config.default_language.clone())
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
