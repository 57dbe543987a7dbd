//! Sherd HTTP API
//!
//! Axum server for capture uploads and the recent-observations listing.
//! Each endpoint has a thin axum handler delegating to an inner function
//! that returns `(StatusCode, serde_json::Value)` and is testable directly.
//!
//! Endpoints:
//! - POST /api/analyze      — multipart upload (`photo` field), inference, persist
//! - GET  /api/observations — up to 100 most recent observations
//! - GET  /health           — health check with DB status
//! - GET  /version          — server version info
//! - GET  /uploads/*        — stored images

use std::sync::Arc;

use anyhow::Result;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sherd_core::{ObservationStore, SherdConfig, RECENT_LIMIT};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::subsystems::analyze::{AnalysisService, AnalyzeError, UploadedFile};
use crate::subsystems::uploads::PUBLIC_PREFIX;

/// Multipart field carrying the image.
pub const PHOTO_FIELD: &str = "photo";
const DEFAULT_UPLOAD_NAME: &str = "capture.png";

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub service: Arc<AnalysisService>,
    pub config: SherdConfig,
}

/// Build the Axum router with all endpoints, uploads and CORS.
pub fn build_router(state: Arc<HttpState>) -> Router {
    let uploads = ServeDir::new(state.service.uploads().root());
    let static_dir = state.config.http.static_dir.clone();
    let body_limit = state.config.http.max_upload_bytes;

    let router = Router::new()
        .route("/api/analyze", post(analyze_handler))
        .route("/api/observations", get(observations_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .nest_service(PUBLIC_PREFIX, uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(cors_layer()).layer(TraceLayer::new_for_http())
}

/// Mirrors the caller's origin; preflight `OPTIONS` gets an empty 200.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
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
    tracing::info!("Sherd HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    fn json(msg: impl Into<String>) -> serde_json::Value {
        serde_json::to_value(Self::new(msg)).unwrap_or_else(|_| serde_json::json!({}))
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner analyze — runs the upload through the analysis service.
pub async fn analyze_inner(
    service: &AnalysisService,
    file: Option<UploadedFile>,
) -> (StatusCode, serde_json::Value) {
    match service.analyze(file).await {
        Ok(resp) => match serde_json::to_value(&resp) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::json(e.to_string())),
        },
        Err(e) => {
            let status = analyze_status(&e);
            if status.is_server_error() {
                tracing::error!(error = %e, "Analyze request failed");
            }
            (status, ErrorResponse::json(e.to_string()))
        }
    }
}

pub fn analyze_status(error: &AnalyzeError) -> StatusCode {
    if error.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Inner observations — most recent rows, newest first.
pub async fn observations_inner(store: &ObservationStore) -> (StatusCode, serde_json::Value) {
    match store.recent(RECENT_LIMIT).await {
        Ok(rows) => (
            StatusCode::OK,
            serde_json::to_value(rows).unwrap_or_else(|_| serde_json::json!([])),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Listing observations failed");
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::json(e.to_string()))
        }
    }
}

/// Inner health check — queries DB and returns (status_code, json_body).
pub async fn health_inner(store: &ObservationStore) -> (StatusCode, serde_json::Value) {
    match sherd_core::db::health_check(store.pool()).await {
        Ok(v) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "database": format!("sqlite {}", v),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "sherd/1",
    })
}

/// Pull the first `photo` field out of a multipart body. Other fields are
/// drained and ignored.
pub async fn read_photo(mut multipart: Multipart) -> Result<Option<UploadedFile>, String> {
    let mut photo = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        if photo.is_some() || field.name() != Some(PHOTO_FIELD) {
            continue;
        }
        let original_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_UPLOAD_NAME)
            .to_string();
        let bytes = field.bytes().await.map_err(|e| e.to_string())?;
        photo = Some(UploadedFile {
            original_name,
            bytes,
        });
    }

    Ok(photo)
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn analyze_handler(
    State(state): State<Arc<HttpState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> impl IntoResponse {
    let file = match multipart {
        Ok(m) => match read_photo(m).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed multipart body");
                return (StatusCode::BAD_REQUEST, Json(ErrorResponse::json(e)));
            }
        },
        // Not multipart at all: there is no file.
        Err(_) => None,
    };

    let (status, body) = analyze_inner(&state.service, file).await;
    (status, Json(body))
}

pub async fn observations_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = observations_inner(state.service.store()).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.service.store()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================
