//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/documents` | Upload (or re-upload) a document |
//! | `GET`  | `/api/documents` | List documents |
//! | `GET`  | `/api/documents/{fileId}/chunks` | Chunks of one document |
//! | `DELETE` | `/api/documents/{fileId}` | Delete a document and its chunks |
//! | `POST` | `/api/retrieval/query` | Retrieve context for a question |
//! | `POST` | `/api/chat/send` | Answer a chat message |
//! | `GET`  | `/api/functions` | Function catalog |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unsupported_format", "message": "unsupported file format: .exe" } }
//! ```
//!
//! `/api/chat/send` never returns an error for a well-formed request; it
//! degrades to the fallback reply instead.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app::Services;
use crate::config::Config;
use crate::error::SupportError;
use crate::models::{Chunk, Document, RetrievalResult, UploadResponse};

/// Largest accepted request body. Uploads travel base64-encoded.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let services = Arc::new(Services::from_config(config).await?);

    let app = router(services);

    info!(bind = %bind_addr, "support API listening");
    println!("Support API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router over shared services.
pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/documents", post(handle_upload).get(handle_list_documents))
        .route("/api/documents/{file_id}", axum::routing::delete(handle_delete))
        .route("/api/documents/{file_id}/chunks", get(handle_get_chunks))
        .route("/api/retrieval/query", post(handle_retrieval))
        .route("/api/chat/send", post(handle_chat_send))
        .route("/api/functions", get(handle_list_functions))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(services)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SupportError> for AppError {
    fn from(err: SupportError) -> Self {
        let status = match &err {
            SupportError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            SupportError::ExtractionFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SupportError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SupportError::NotFound(_) => StatusCode::NOT_FOUND,
            SupportError::EmbeddingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest {
    file_name: String,
    content_base64: String,
    #[serde(default)]
    file_id: Option<String>,
}

async fn handle_upload(
    State(services): State<Arc<Services>>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.trim())
        .map_err(|e| bad_request(format!("contentBase64 is not valid base64: {}", e)))?;

    let response = match req.file_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(file_id) => services.pipeline.reingest(file_id, &req.file_name, &bytes).await?,
        None => services.pipeline.ingest(&req.file_name, &bytes).await?,
    };
    Ok(Json(response))
}

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<Document>,
}

async fn handle_list_documents(
    State(services): State<Arc<Services>>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let documents = services.store.list_documents().await?;
    Ok(Json(DocumentListResponse { documents }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkListResponse {
    file_id: String,
    chunks: Vec<Chunk>,
}

async fn handle_get_chunks(
    State(services): State<Arc<Services>>,
    Path(file_id): Path<String>,
) -> Result<Json<ChunkListResponse>, AppError> {
    if services.store.get_document(&file_id).await?.is_none() {
        return Err(not_found(format!("document not found: {}", file_id)));
    }
    let chunks = services.store.get_chunks(&file_id).await?;
    Ok(Json(ChunkListResponse { file_id, chunks }))
}

async fn handle_delete(
    State(services): State<Arc<Services>>,
    Path(file_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !services.pipeline.delete(&file_id).await? {
        return Err(not_found(format!("document not found: {}", file_id)));
    }
    Ok(Json(serde_json::json!({ "deleted": true, "fileId": file_id })))
}

// ============ POST /api/retrieval/query ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrievalRequest {
    question: String,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_retrieval(
    State(services): State<Arc<Services>>,
    Json(req): Json<RetrievalRequest>,
) -> Result<Json<RetrievalResult>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let result = services
        .retrieval
        .retrieve(&req.question, req.file_id.as_deref(), req.top_k)
        .await?;
    Ok(Json(result))
}

// ============ POST /api/chat/send ============

#[derive(Serialize)]
struct ChatSendResponse {
    reply: String,
}

async fn handle_chat_send(
    State(services): State<Arc<Services>>,
    Json(req): Json<crate::chat::ChatSendRequest>,
) -> Json<ChatSendResponse> {
    let reply = services.chat.send(&req).await;
    Json(ChatSendResponse { reply: reply.text })
}

// ============ GET /api/functions ============

async fn handle_list_functions(State(services): State<Arc<Services>>) -> Json<serde_json::Value> {
    let restricted: Vec<String> = services
        .executor
        .catalog()
        .descriptors(true)
        .into_iter()
        .map(|d| d.name)
        .collect();
    let functions: Vec<serde_json::Value> = services
        .executor
        .catalog()
        .descriptors(false)
        .into_iter()
        .map(|d| {
            serde_json::json!({
                "timeVariant": restricted.contains(&d.name),
                "name": d.name,
                "description": d.description,
                "parameters": d.parameters,
            })
        })
        .collect();
    Json(serde_json::json!({ "functions": functions }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_errors_map_to_status_and_code() {
        let err: AppError = SupportError::UnsupportedFormat(".exe".into()).into();
        assert_eq!(err.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(err.code, "unsupported_format");

        let err: AppError = SupportError::ExtractionFailure("bad zip".into()).into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let err: AppError = SupportError::NotFound("x".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "not_found");
    }
}
