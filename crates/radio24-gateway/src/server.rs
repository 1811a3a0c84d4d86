//! Axum HTTP/WebSocket surface for listeners.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Timelike;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use radio24_core::program::theme_for_hour;
use radio24_core::protocol::kinds;
use radio24_core::shutdown::shutdown_signal;
use radio24_core::submission::{Submission, SubmissionKind};
use radio24_core::token::ROOM_NAME;

use crate::connection::{MAX_READ_BYTES, handle_broadcast_connection};
use crate::peers::PeerReply;
use crate::ptt::handle_ptt_connection;
use crate::state::GatewayState;

/// Nearest submissions returned with every saved submission.
const RECOMMENDATIONS: usize = 3;

/// Bind `0.0.0.0:port` and serve until `cancel` fires or Ctrl-C arrives.
pub async fn start_gateway(
    state: Arc<GatewayState>,
    port: u16,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    #[cfg(feature = "metrics")]
    crate::metrics::prometheus_handle();

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;
    Ok(())
}

pub fn router(state: Arc<GatewayState>) -> Router {
    let cors = cors_layer(&state.config.http.allowed_origin);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ws/broadcast", get(broadcast_ws_handler))
        .route("/ws/ptt", get(ptt_ws_handler))
        .route("/v1/room/join", post(room_join_handler))
        .route("/v1/realtime/ephemeral", post(ephemeral_handler))
        .route("/v1/submission", post(submission_handler))
        .route("/v1/theme/rotate", post(theme_rotate_handler))
        .route("/v1/queue/peek", get(queue_peek_handler))
        .route("/v1/queue/dequeue", post(queue_dequeue_handler))
        .route("/v1/broadcast", post(broadcast_handler))
        .route("/v1/subtitle", post(subtitle_handler))
        .route("/v1/now", get(now_handler))
        .route("/v1/admin/advance", post(advance_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = match HeaderValue::from_str(origin) {
        Ok(value) => AllowOrigin::exact(value),
        Err(_) => {
            warn!(origin, "ALLOWED_ORIGIN is not a valid header value, allowing any origin");
            AllowOrigin::any()
        }
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn relay(reply: PeerReply) -> Response {
    (reply.status, Json(reply.body)).into_response()
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "listeners": state.hub.client_count(),
        }))
        .into_response(),
        Err(e) => {
            warn!(%e, "Store ping failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Database connection failed")
        }
    }
}

async fn broadcast_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.max_message_size(MAX_READ_BYTES)
        .max_frame_size(MAX_READ_BYTES)
        .on_upgrade(move |socket| handle_broadcast_connection(hub, socket))
}

async fn ptt_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let client_id = params
        .get("client_id")
        .filter(|id| !id.is_empty())
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_ptt_connection(state, socket, client_id))
}

#[derive(Deserialize)]
struct JoinRequest {
    #[serde(default)]
    identity: String,
}

async fn room_join_handler(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<JoinRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
    };
    if req.identity.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Identity is required");
    }
    match state.minter.join(&req.identity, &state.config.livekit.url) {
        Ok(join) => {
            info!(identity = %req.identity, room = ROOM_NAME, "Issued listener token");
            Json(join).into_response()
        }
        Err(e) => {
            warn!(%e, "Failed to mint join token");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate token")
        }
    }
}

async fn ephemeral_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match state.ephemeral.issue().await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            warn!(%e, "Failed to issue realtime client secret");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct SubmissionRequest {
    #[serde(default)]
    text: String,
    #[serde(rename = "type", default)]
    kind: Option<SubmissionKind>,
}

async fn submission_handler(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<SubmissionRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
    };
    if req.text.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Text is required");
    }

    let embedding = match state.embedder.embed(&req.text).await {
        Ok(embedding) => embedding,
        Err(e) => {
            warn!(%e, "Failed to embed submission");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process text");
        }
    };

    let submission = Submission {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: "anonymous".to_string(),
        kind: req.kind.unwrap_or(SubmissionKind::Text),
        text: req.text,
        embedding,
        created_at: chrono::Utc::now(),
    };
    if let Err(e) = state.store.save(&submission).await {
        warn!(%e, "Failed to save submission");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save submission");
    }

    let recommendations = match state
        .store
        .nearest(&submission.embedding, RECOMMENDATIONS)
        .await
    {
        Ok(found) => found,
        Err(e) => {
            warn!(%e, "Failed to look up similar submissions");
            Vec::new()
        }
    };

    Json(json!({
        "status": "saved",
        "id": submission.id,
        "text": submission.text,
        "recommendations": recommendations,
    }))
    .into_response()
}

async fn theme_rotate_handler() -> Json<Value> {
    let theme = theme_for_hour(chrono::Local::now().hour());
    Json(json!(theme))
}

async fn queue_peek_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({ "item": state.queue.peek().await }))
}

#[derive(Deserialize)]
struct DequeueRequest {
    id: String,
}

async fn queue_dequeue_handler(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<DequeueRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
    };
    let removed = state.queue.remove(&req.id).await;
    if removed {
        info!(id = %req.id, "Queue item removed");
        state.queue_changed().await;
    }
    Json(json!({ "removed": removed, "id": req.id })).into_response()
}

async fn broadcast_handler(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
    };
    let Some(kind) = body.get("type").and_then(Value::as_str).map(str::to_string) else {
        return error_response(StatusCode::BAD_REQUEST, "type is required");
    };
    // Senders that wrap their payload in `data` get it delivered unwrapped.
    let data = body.get("data").cloned().unwrap_or(body);
    info!(kind = %kind, "Broadcasting message");
    let status = if state.hub.broadcast(&kind, data) {
        "broadcasted"
    } else {
        "dropped"
    };
    Json(json!({ "status": status })).into_response()
}

#[derive(Deserialize)]
struct SubtitleRequest {
    text: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

async fn subtitle_handler(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<SubtitleRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
    };
    let kind = req.kind.unwrap_or_else(|| "host_speech".to_string());
    state
        .hub
        .broadcast(kinds::SUBTITLE, json!({ "text": req.text, "type": kind }));
    Json(json!({ "status": "broadcasted" })).into_response()
}

async fn now_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match state.peers.director_now().await {
        Ok(mut now) => {
            now.listeners = state.hub.client_count();
            Json(now).into_response()
        }
        Err(e) => {
            warn!(%e, "Director now-playing unavailable");
            error_response(StatusCode::BAD_GATEWAY, "Director unavailable")
        }
    }
}

async fn advance_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match state.peers.director_advance().await {
        Ok(reply) => relay(reply),
        Err(e) => {
            warn!(%e, "Director advance failed");
            error_response(StatusCode::BAD_GATEWAY, "Director unavailable")
        }
    }
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> Response {
    match crate::metrics::prometheus_handle() {
        Some(handle) => handle.render().into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "metrics recorder unavailable"),
    }
}
