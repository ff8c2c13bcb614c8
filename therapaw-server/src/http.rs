//! Therapaw HTTP API
//!
//! Axum-based HTTP server for photo analysis, session retrieval and the
//! follow-up chat.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions are directly testable without axum dispatch
//! machinery.
//!
//! Endpoints:
//! - POST /api/analyze: multipart upload (`image`), returns a session id
//! - GET  /api/session/:id: stored evaluation for a session id
//! - POST /api/chat: follow-up conversation about an evaluation
//! - GET  /health: configuration and storage status
//! - GET  /version: server version info

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use therapaw_core::session::{CodecError, SessionError};
use therapaw_core::{
    ChatAgent, ChatMessage, GradientChatClient, MemoryTier, ReplicateVisionClient,
    SessionManager, TherapawConfig, TherapawError, VisionModel,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::analyze::{self, AnalyzeError, ImageUpload};
use crate::subsystems::consult;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub sessions: Arc<SessionManager>,
    pub vision: Option<Arc<dyn VisionModel>>,
    pub chat: Option<Arc<dyn ChatAgent>>,
    pub config: TherapawConfig,
}

impl HttpState {
    /// Wire the session tiers and the external clients from config.
    ///
    /// Missing vision or chat credentials disable that endpoint rather than
    /// failing startup.
    pub fn from_config(
        config: TherapawConfig,
        memory: Arc<MemoryTier>,
    ) -> std::result::Result<Self, TherapawError> {
        let sessions = Arc::new(SessionManager::from_config(&config.storage, memory)?);

        let vision = match ReplicateVisionClient::new(&config.vision) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn VisionModel>),
            Err(e) => {
                tracing::warn!("Vision model disabled: {}", e);
                None
            }
        };

        let chat = match GradientChatClient::new(&config.chat) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn ChatAgent>),
            Err(e) => {
                tracing::warn!("Chat agent disabled: {}", e);
                None
            }
        };

        Ok(Self {
            sessions,
            vision,
            chat,
            config,
        })
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let body_limit = state.config.http.max_upload_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/session/:id", get(session_handler))
        .route("/api/chat", post(chat_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Therapaw HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub behavioral_report: Option<String>,
    pub session_id: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }

    fn json(msg: impl Into<String>) -> serde_json::Value {
        serde_json::json!(Self::new(msg))
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: reports which tiers and clients are active.
pub fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let sessions = &state.sessions;
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": {
                "durable": sessions.is_durable_store_configured(),
                "backend": sessions.durable_backend_name().unwrap_or("memory"),
                "memory_sessions": sessions.memory().len(),
                "inline_image_cap": sessions.codec().inline_image_cap(),
                "oversize_image": sessions.codec().oversize_policy(),
            },
            "vision": state.vision.is_some(),
            "chat": state.chat.is_some(),
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "therapaw/1",
    })
}

/// Inner session lookup: 404 when no tier holds the id.
pub async fn session_inner(sessions: &SessionManager, id: &str) -> (StatusCode, serde_json::Value) {
    match sessions.retrieve(id).await {
        Some(record) => match serde_json::to_value(&record) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize session");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::json("Failed to retrieve session"),
                )
            }
        },
        None => (StatusCode::NOT_FOUND, ErrorResponse::json("Session not found")),
    }
}

/// Inner analyze: evaluates the upload and persists a new session.
pub async fn analyze_inner(
    state: &HttpState,
    upload: Option<ImageUpload>,
) -> (StatusCode, serde_json::Value) {
    let Some(upload) = upload else {
        return (StatusCode::BAD_REQUEST, ErrorResponse::json("No image provided"));
    };

    let Some(vision) = state.vision.as_deref() else {
        tracing::error!("Analyze requested but the vision model is not configured");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::json("Vision model not configured"),
        );
    };

    match analyze::analyze_image(&upload, vision, &state.sessions).await {
        Ok(persisted) => {
            let persistence = persisted
                .outcome
                .tier()
                .map(|t| t.as_str())
                .unwrap_or("none");
            let mut body = serde_json::json!({
                "sessionId": persisted.session_id,
                "persistence": persistence,
            });
            if persisted.degraded() {
                body["warning"] = serde_json::json!(
                    "Durable storage unavailable; this session lives in its link and may lose image detail"
                );
            }
            (StatusCode::OK, body)
        }
        Err(AnalyzeError::NoImage) => {
            (StatusCode::BAD_REQUEST, ErrorResponse::json("No image provided"))
        }
        Err(AnalyzeError::Vision(e)) => {
            tracing::error!(error = %e, "Analysis error");
            (
                StatusCode::BAD_GATEWAY,
                ErrorResponse::json("Failed to analyze image. Please try again."),
            )
        }
        Err(AnalyzeError::Session(SessionError::Codec(e @ CodecError::ImageTooLarge { .. }))) => {
            tracing::warn!(error = %e, "Image too large for a self-contained session");
            (StatusCode::PAYLOAD_TOO_LARGE, ErrorResponse::json(e.to_string()))
        }
        Err(AnalyzeError::Session(e)) => {
            tracing::error!(error = %e, "Failed to persist session");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::json("Failed to save analysis session"),
            )
        }
    }
}

/// Inner chat: validates the conversation and forwards it to the agent.
pub async fn chat_inner(state: &HttpState, req: ChatRequest) -> (StatusCode, serde_json::Value) {
    if req.messages.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::json("messages must not be empty"),
        );
    }

    let Some(agent) = state.chat.as_deref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::json(therapaw_core::ChatError::NotConfigured.to_string()),
        );
    };

    let report = consult::resolve_report(
        req.behavioral_report,
        req.session_id.as_deref(),
        &state.sessions,
    )
    .await;

    let Some(report) = report else {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::json("behavioralReport or a known sessionId is required"),
        );
    };

    match consult::consult(agent, &report, &req.messages).await {
        Ok(message) => (StatusCode::OK, serde_json::json!({ "message": message })),
        Err(e) => {
            tracing::error!(error = %e, "Chat error");
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::json(e.to_string()))
        }
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = session_inner(&state.sessions, &id).await;
    (status, Json(body))
}

pub async fn analyze_handler(
    State(state): State<Arc<HttpState>>,
    multipart: Multipart,
) -> impl IntoResponse {
    let upload = match read_image_field(multipart).await {
        Ok(upload) => upload,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected multipart upload");
            return (e.status(), Json(ErrorResponse::json(e.body_text())));
        }
    };
    let (status, body) = analyze_inner(&state, upload).await;
    (status, Json(body))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let (status, body) = chat_inner(&state, req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Pull the `image` field out of a multipart form, ignoring other fields.
pub async fn read_image_field(
    mut multipart: Multipart,
) -> std::result::Result<Option<ImageUpload>, axum::extract::multipart::MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await?;
        return Ok(Some(ImageUpload {
            content_type,
            bytes,
        }));
    }
    Ok(None)
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
