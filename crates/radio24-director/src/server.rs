//! Admin and status surface of the Director.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use radio24_core::protocol::QueueSnapshot;
use radio24_core::shutdown::shutdown_signal;

use crate::director::Director;
use crate::sink::ProgramSink;

#[derive(Clone)]
pub struct DirectorState {
    pub director: Arc<Director>,
    pub sink: Arc<dyn ProgramSink>,
    pub allowed_origin: String,
}

pub async fn start_director(
    state: DirectorState,
    port: u16,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Director listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;
    Ok(())
}

pub fn router(state: DirectorState) -> Router {
    let allow_origin = match HeaderValue::from_str(&state.allowed_origin) {
        Ok(value) => AllowOrigin::exact(value),
        Err(_) => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/now", get(now_handler))
        .route("/v1/status", get(status_handler))
        .route("/v1/admin/advance", post(advance_handler))
        .route("/v1/admin/theme", post(theme_handler))
        .route("/v1/admin/prompt", post(prompt_handler))
        .route("/v1/admin/queue", post(queue_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn health_handler() -> Response {
    Json(json!({
        "status": "healthy",
        "service": "director",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

async fn now_handler(State(state): State<DirectorState>) -> Response {
    Json(state.director.now_playing().await).into_response()
}

async fn status_handler(State(state): State<DirectorState>) -> Response {
    Json(state.director.status().await).into_response()
}

async fn advance_handler(State(state): State<DirectorState>) -> Response {
    Json(state.director.advance().await).into_response()
}

#[derive(Deserialize)]
struct ThemeRequest {
    #[serde(default)]
    theme: String,
}

async fn theme_handler(
    State(state): State<DirectorState>,
    payload: Result<Json<ThemeRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
    };
    if req.theme.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Theme is required");
    }
    match state.director.set_theme(&req.theme).await {
        Some(now) => Json(now).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Unknown theme"),
    }
}

#[derive(Deserialize)]
struct PromptRequest {
    prompt: String,
}

/// Forward an operator prompt to the host verbatim.
async fn prompt_handler(
    State(state): State<DirectorState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
    };
    match state.sink.prompt(&req.prompt).await {
        Ok(()) => Json(json!({ "status": "updated" })).into_response(),
        Err(e) => {
            warn!(%e, "Failed to forward prompt to host");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update prompt")
        }
    }
}

async fn queue_handler(
    State(state): State<DirectorState>,
    payload: Result<Json<QueueSnapshot>, JsonRejection>,
) -> Response {
    let Ok(Json(snapshot)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
    };
    state.director.set_queue(snapshot).await;
    Json(json!({ "status": "updated" })).into_response()
}
