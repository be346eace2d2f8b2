//! HTTP API for the SurgiSense dashboard.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/scan` | Extract surgical data from an upload and index it for chat |
//! | `POST` | `/api/digitize-record` | Digitize a discharge summary and index it for chat |
//! | `POST` | `/api/chat` | Answer a question from the indexed document |
//! | `POST` | `/api/voice-to-text` | Transcribe a clinical voice note |
//! | `POST` | `/api/analyze-wound` | Assess a wound photo with a severity score |
//! | `DELETE` | `/api/document` | Clear the indexed document |
//! | `GET`  | `/health` | Health check (version and document status) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `payload_too_large` (413),
//! `unsupported_media_type` (415), `upstream_error` (502),
//! `upstream_timeout` (504), `internal` (500).
//!
//! # CORS
//!
//! Only the origins listed in `[server].allowed_origins` are permitted.

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use surgisense_core::error::{ConfigurationError, InputError, RagError, UpstreamError};
use surgisense_core::llm::ChatModel;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::extract_text;
use crate::llm::HostedChatModel;
use crate::rag::RagService;
use crate::records::{digitize_discharge_summary, extract_surgical_data, DigitizeOutcome};
use crate::speech::{transcribe_note, SarvamTranscriber, Transcriber};
use crate::wound::analyze_wound;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The document session used by `/api/chat`.
    pub rag: Arc<RagService>,
    /// Hosted model for extraction and vision requests.
    pub llm: Arc<dyn ChatModel>,
    pub speech: Arc<dyn Transcriber>,
}

impl AppState {
    /// Build the production state: hosted chat model, Sarvam transcriber and
    /// the configured embedding provider.
    ///
    /// Fails when a required API key is missing or the configuration is invalid.
    pub fn from_config(config: &Config) -> Result<Self, ConfigurationError> {
        let llm: Arc<dyn ChatModel> = Arc::new(HostedChatModel::new(&config.llm)?);
        let speech: Arc<dyn Transcriber> = Arc::new(SarvamTranscriber::new(&config.speech)?);
        let embedder = create_embedder(&config.embedding)?;
        let rag = RagService::new(
            config.chunking.params()?,
            config.retrieval.top_k,
            embedder,
            llm.clone(),
        )?;

        Ok(Self {
            config: Arc::new(config.clone()),
            rag: Arc::new(rag),
            llm,
            speech,
        })
    }
}

/// Assemble the router with CORS, body-size limit and request tracing.
pub fn build_router(state: AppState) -> Result<Router, ConfigurationError> {
    let cors = cors_layer(&state.config.server.allowed_origins)?;
    let max_upload = state.config.server.max_upload_bytes;

    Ok(Router::new()
        .route("/api/scan", post(handle_scan))
        .route("/api/digitize-record", post(handle_digitize))
        .route("/api/chat", post(handle_chat))
        .route("/api/voice-to-text", post(handle_voice))
        .route("/api/analyze-wound", post(handle_wound))
        .route("/api/document", delete(handle_clear_document))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer, ConfigurationError> {
    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).map_err(|_| {
                ConfigurationError::Invalid(format!("server.allowed_origins: invalid origin '{}'", o))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated. Returns an error if a provider
/// cannot be constructed or binding fails.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let app = build_router(state)?;

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        addr = %bind_addr,
        embedding = %config.embedding.provider,
        "SurgiSense server listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<InputError> for AppError {
    fn from(e: InputError) -> Self {
        let (status, code) = match &e {
            InputError::UnsupportedContent(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type")
            }
            InputError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            _ => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        AppError {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl From<UpstreamError> for AppError {
    fn from(e: UpstreamError) -> Self {
        warn!(operation = e.operation(), retryable = e.is_retryable(), error = %e, "upstream call failed");
        let (status, code) = match &e {
            UpstreamError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
            _ => (StatusCode::BAD_GATEWAY, "upstream_error"),
        };
        AppError {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl From<RagError> for AppError {
    fn from(e: RagError) -> Self {
        match e {
            RagError::Input(e) => e.into(),
            RagError::Upstream(e) => e.into(),
            other => {
                error!(kind = other.kind(), error = %other, "request failed");
                internal(other.to_string())
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        let status = e.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "payload_too_large"
        } else {
            "bad_request"
        };
        AppError {
            status,
            code,
            message: format!("invalid multipart body: {}", e.body_text()),
        }
    }
}

// ============ Uploads ============

/// The `file` field of a multipart form.
struct Upload {
    bytes: Vec<u8>,
    file_name: Option<String>,
    content_type: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(InputError::MissingField("file").into());
        }
        return Ok(Upload {
            bytes: bytes.to_vec(),
            file_name,
            content_type,
        });
    }
    Err(InputError::MissingField("file").into())
}

/// Extract document text off the async runtime (PDF parsing is CPU-bound).
async fn upload_text(upload: Upload) -> Result<String, AppError> {
    let text = tokio::task::spawn_blocking(move || {
        extract_text(
            &upload.bytes,
            upload.content_type.as_deref(),
            upload.file_name.as_deref(),
        )
    })
    .await
    .map_err(|e| internal(format!("text extraction task failed: {}", e)))??;

    if text.trim().is_empty() {
        return Err(InputError::EmptyDocument.into());
    }
    Ok(text)
}

// ============ POST /api/scan ============

#[derive(Serialize)]
struct ScanResponse {
    status: &'static str,
    data: Value,
    /// Whether the document is now available to `/api/chat`.
    indexed: bool,
}

async fn handle_scan(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ScanResponse>, AppError> {
    let text = upload_text(read_upload(multipart).await?).await?;
    info!(chars = text.len(), "scan upload extracted");

    // Indexing does not depend on the extraction reply.
    let (data, indexed) = tokio::join!(
        extract_surgical_data(state.llm.as_ref(), &state.config.llm.extraction_model, &text),
        state.rag.ingest(&text),
    );
    let data = data.inspect_err(|_| warn!(indexed, "extraction failed"))?;

    Ok(Json(ScanResponse {
        status: "success",
        data,
        indexed,
    }))
}

// ============ POST /api/digitize-record ============

#[derive(Serialize)]
struct DigitizeResponse {
    status: &'static str,
    data: DigitizeOutcome,
    indexed: bool,
}

async fn handle_digitize(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DigitizeResponse>, AppError> {
    let text = upload_text(read_upload(multipart).await?).await?;
    info!(chars = text.len(), "discharge summary extracted");

    let (data, indexed) = tokio::join!(
        digitize_discharge_summary(state.llm.as_ref(), &state.config.llm.record_model, &text),
        state.rag.ingest(&text),
    );
    let data = data.inspect_err(|_| warn!(indexed, "extraction failed"))?;

    Ok(Json(DigitizeResponse {
        status: "success",
        data,
        indexed,
    }))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatBody {
    #[serde(default)]
    question: String,
}

#[derive(Serialize)]
struct ChatResponse {
    status: &'static str,
    answer: String,
}

/// Answers from the indexed document. Upstream failures degrade to a fixed
/// sentence rather than an error status.
async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    let question = body.question.trim();
    if question.is_empty() {
        return Err(InputError::EmptyQuestion.into());
    }

    let answer = state.rag.ask(question).await;
    Ok(Json(ChatResponse {
        status: "success",
        answer,
    }))
}

// ============ POST /api/voice-to-text ============

#[derive(Serialize)]
struct TranscriptResponse {
    status: &'static str,
    transcript: String,
}

async fn handle_voice(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<TranscriptResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    let file_name = upload
        .file_name
        .unwrap_or_else(|| "recording.wav".to_string());

    let transcript = transcribe_note(state.speech.as_ref(), upload.bytes, &file_name).await?;
    Ok(Json(TranscriptResponse {
        status: "success",
        transcript,
    }))
}

// ============ POST /api/analyze-wound ============

#[derive(Serialize)]
struct WoundResponse {
    status: &'static str,
    analysis: String,
    severity_score: Option<u8>,
}

async fn handle_wound(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<WoundResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    let assessment = analyze_wound(
        state.llm.as_ref(),
        &state.config.llm.vision_model,
        &upload.bytes,
        upload.content_type.as_deref(),
    )
    .await?;

    Ok(Json(WoundResponse {
        status: "success",
        analysis: assessment.analysis,
        severity_score: assessment.severity_score,
    }))
}

// ============ DELETE /api/document ============

async fn handle_clear_document(State(state): State<AppState>) -> Json<Value> {
    state.rag.reset().await;
    Json(serde_json::json!({ "status": "success" }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: &'static str,
    version: &'static str,
    document_loaded: bool,
    chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.rag.status();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        document_loaded: status.ready,
        chunks: status.chunks,
    })
}
