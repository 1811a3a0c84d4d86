//! Internal HTTP surface of the Host, called by the Gateway and the Director.

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

use radio24_core::error::RadioError;
use radio24_core::shutdown::shutdown_signal;
use radio24_providers::ScriptWriter;

use crate::mode::{LeaveReason, ModeController};
use crate::monologue::{PromptBoard, Speaker, script_request_prompt};

#[derive(Clone)]
pub struct HostState {
    pub mode: Arc<ModeController>,
    pub board: Arc<PromptBoard>,
    pub speaker: Arc<Speaker>,
    pub script: Arc<dyn ScriptWriter>,
    pub allowed_origin: String,
}

pub async fn start_host(state: HostState, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Host listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;
    Ok(())
}

pub fn router(state: HostState) -> Router {
    let allow_origin = match HeaderValue::from_str(&state.allowed_origin) {
        Ok(value) => AllowOrigin::exact(value),
        Err(_) => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/script/generate", post(script_handler))
        .route("/speak", post(speak_handler))
        .route("/audio/input", post(audio_input_handler))
        .route("/audio/commit", post(audio_commit_handler))
        .route("/dialogue/end", post(dialogue_end_handler))
        .route("/dialogue/status", get(dialogue_status_handler))
        .route("/director/instruction", post(instruction_handler))
        .route("/director/prompt", post(prompt_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn bad_json() -> Response {
    error_response(StatusCode::BAD_REQUEST, "Invalid JSON")
}

async fn health_handler() -> Response {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct ScriptRequest {
    topic: String,
    #[serde(default)]
    style: Option<String>,
}

async fn script_handler(
    State(state): State<HostState>,
    payload: Result<Json<ScriptRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return bad_json();
    };
    info!(topic = %req.topic, style = ?req.style, "Script requested");
    let prompt = script_request_prompt(&state.board.prompt().await, &req.topic, req.style.as_deref());
    match state.script.write_script(&prompt).await {
        Ok(script) => Json(json!({ "script": script })).into_response(),
        Err(e) => {
            warn!(%e, "Script generation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate script")
        }
    }
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
}

async fn speak_handler(
    State(state): State<HostState>,
    payload: Result<Json<SpeakRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return bad_json();
    };
    info!(text_len = req.text.len(), "Speak requested");
    let speaker = state.speaker.clone();
    tokio::spawn(async move {
        if let Err(e) = speaker.say(&req.text).await {
            warn!(%e, "Failed to speak requested text");
        }
    });
    Json(json!({ "status": "speaking" })).into_response()
}

#[derive(Deserialize)]
struct AudioInput {
    audio: String,
}

async fn audio_input_handler(
    State(state): State<HostState>,
    payload: Result<Json<AudioInput>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return bad_json();
    };
    match state.mode.forward_audio(&req.audio).await {
        Ok(()) => Json(json!({ "status": "audio_sent" })).into_response(),
        Err(e) if matches!(e.downcast_ref::<RadioError>(), Some(RadioError::InvalidInput(_))) => {
            error_response(StatusCode::BAD_REQUEST, "Invalid audio")
        }
        Err(e) => {
            warn!(%e, "Failed to forward listener audio");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send audio")
        }
    }
}

async fn audio_commit_handler(State(state): State<HostState>) -> Response {
    match state.mode.commit_audio().await {
        Ok(()) => Json(json!({ "status": "commit_sent" })).into_response(),
        Err(e) => {
            warn!(%e, "Failed to commit listener audio");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send commit")
        }
    }
}

async fn dialogue_end_handler(State(state): State<HostState>) -> Response {
    if !state.mode.leave(None, LeaveReason::Ended).await {
        info!("Dialogue end requested with no dialogue active");
    }
    Json(json!({ "status": "dialogue_ended" })).into_response()
}

async fn dialogue_status_handler(State(state): State<HostState>) -> Response {
    Json(state.mode.status().await).into_response()
}

#[derive(Deserialize)]
struct Instruction {
    content: String,
}

async fn instruction_handler(
    State(state): State<HostState>,
    payload: Result<Json<Instruction>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return bad_json();
    };
    info!(content = %req.content, "Director instruction");
    state.board.push_note(req.content).await;
    Json(json!({ "status": "received" })).into_response()
}

#[derive(Deserialize)]
struct PromptUpdate {
    prompt: String,
}

async fn prompt_handler(
    State(state): State<HostState>,
    payload: Result<Json<PromptUpdate>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return bad_json();
    };
    info!(prompt_len = req.prompt.len(), "Director prompt updated");
    state.board.set_prompt(req.prompt).await;
    Json(json!({ "status": "updated" })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::tests::RecordingGateway;
    use async_trait::async_trait;
    use radio24_core::config::timeouts;
    use radio24_media::room::SilentRoom;
    use radio24_providers::SpeechSynthesizer;
    use serde_json::Value;

    struct EchoScript;

    #[async_trait]
    impl ScriptWriter for EchoScript {
        async fn write_script(&self, prompt: &str) -> anyhow::Result<String> {
            if prompt.contains("失敗") {
                anyhow::bail!("chat error 500");
            }
            Ok(prompt.to_string())
        }
    }

    struct NoSpeech;

    #[async_trait]
    impl SpeechSynthesizer for NoSpeech {
        async fn synthesize(&self, _text: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    async fn serve() -> (String, HostState, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let (mode, _task) = ModeController::new(gateway.clone(), None, 0.5, timeouts::DIALOGUE);
        mode.attach_room(Arc::new(SilentRoom::new())).await.unwrap();
        let state = HostState {
            mode: mode.clone(),
            board: Arc::new(PromptBoard::default()),
            speaker: Arc::new(Speaker::new(mode, Arc::new(NoSpeech), gateway.clone())),
            script: Arc::new(EchoScript),
            allowed_origin: "http://localhost:3000".into(),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), state, gateway)
    }

    async fn post(url: String, body: Value) -> (u16, Value) {
        let resp = reqwest::Client::new()
            .post(url)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_director_prompt_feeds_script_generation() {
        let (base, state, _gateway) = serve().await;

        let (status, body) = post(format!("{base}/director/prompt"), json!({ "prompt": "夜のガイダンス" })).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "updated");
        assert_eq!(state.board.prompt().await, "夜のガイダンス");

        let (status, body) = post(
            format!("{base}/script/generate"),
            json!({ "topic": "雨の日", "style": "しっとり" }),
        )
        .await;
        assert_eq!(status, 200);
        let script = body["script"].as_str().unwrap();
        assert!(script.starts_with("夜のガイダンス トピック「雨の日」"));
        assert!(script.ends_with(" スタイル: しっとり"));

        let (status, _) = post(format!("{base}/script/generate"), json!({ "topic": "失敗" })).await;
        assert_eq!(status, 500);
    }

    #[tokio::test]
    async fn test_instruction_is_queued_as_note() {
        let (base, state, _gateway) = serve().await;
        let (status, _) = post(
            format!("{base}/director/instruction"),
            json!({ "type": "director_instruction", "content": "セグメントが「NEWS」に変更されました。" }),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(
            state.board.take_notes().await,
            vec!["セグメントが「NEWS」に変更されました。"]
        );
    }

    #[tokio::test]
    async fn test_dialogue_endpoints() {
        let (base, state, gateway) = serve().await;

        let status: Value = reqwest::get(format!("{base}/dialogue/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["active"], false);

        state.mode.enter("dialogue_1", "alice").await.unwrap();
        let status: Value = reqwest::get(format!("{base}/dialogue/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["active"], true);
        assert!(status["started_at"].is_string());

        let (code, body) = post(format!("{base}/audio/input"), json!({ "type": "input_audio_buffer.append", "audio": "AAAA" })).await;
        assert_eq!(code, 200);
        assert_eq!(body["status"], "audio_sent");

        let (code, body) = post(format!("{base}/audio/input"), json!({ "audio": "%%%not base64" })).await;
        assert_eq!(code, 400);
        assert_eq!(body["error"], "Invalid audio");
        assert!(state.mode.is_active());

        let (code, body) = post(format!("{base}/audio/commit"), json!({})).await;
        assert_eq!(code, 200);
        assert_eq!(body["status"], "commit_sent");

        let (code, body) = post(format!("{base}/dialogue/end"), json!({})).await;
        assert_eq!(code, 200);
        assert_eq!(body["status"], "dialogue_ended");
        assert!(!state.mode.is_active());
        assert_eq!(gateway.kinds(), vec!["dialogue_ready", "dialogue_ended"]);
    }

    #[tokio::test]
    async fn test_speak_posts_subtitle() {
        let (base, _state, gateway) = serve().await;
        let (code, body) = post(format!("{base}/speak"), json!({ "text": "お知らせです" })).await;
        assert_eq!(code, 200);
        assert_eq!(body["status"], "speaking");
        for _ in 0..50 {
            if !gateway.subtitles.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(gateway.subtitles.lock().unwrap()[0], "お知らせです");

        let resp = reqwest::Client::new()
            .post(format!("{base}/speak"))
            .header("content-type", "application/json")
            .body("{")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
