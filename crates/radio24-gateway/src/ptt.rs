//! `ws/ptt` control socket: listener submissions, dialogue requests and
//! dialogue-mode audio relayed to the Host.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use tracing::{debug, info, warn};

use radio24_core::protocol::{PttInbound, PttOutbound};
use radio24_core::queue::{ItemKind, QueueItem};

use crate::state::GatewayState;

/// Queue text used when a dialogue request carries none.
const DIALOGUE_REQUEST_TEXT: &str = "対話リクエスト";

fn item_id(prefix: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{prefix}_{nanos}")
}

/// Serve one push-to-talk socket until the listener goes away.
pub async fn handle_ptt_connection(state: Arc<GatewayState>, mut ws: WebSocket, client_id: String) {
    info!(client_id = %client_id, "PTT connected");

    while let Some(msg) = ws.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(client_id = %client_id, %e, "PTT read error");
                break;
            }
        };

        let reply = reply_to(&state, &client_id, text.as_str()).await;
        if let Some(reply) = reply {
            let Ok(json) = serde_json::to_string(&reply) else {
                continue;
            };
            if ws.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    }

    info!(client_id = %client_id, "PTT disconnected");
}

/// Parse and act on one text frame. Frames that do not parse, including a
/// `ptt` frame with a kind other than text or audio, get an error reply and
/// leave the queue untouched.
async fn reply_to(state: &GatewayState, client_id: &str, text: &str) -> Option<PttOutbound> {
    match serde_json::from_str::<PttInbound>(text) {
        Ok(frame) => handle_frame(state, client_id, frame).await,
        Err(e) => {
            warn!(client_id, %e, "Invalid PTT frame");
            Some(PttOutbound::Error {
                message: format!("invalid frame: {e}"),
            })
        }
    }
}

async fn handle_frame(
    state: &GatewayState,
    client_id: &str,
    frame: PttInbound,
) -> Option<PttOutbound> {
    match frame {
        PttInbound::Ptt { kind, text } => {
            let kind = ItemKind::from(kind);
            let item = QueueItem::new(item_id("ptt"), client_id, kind).with_text(text);
            let item = state.queue.enqueue(item).await;
            info!(id = %item.id, kind = kind.as_str(), "PTT enqueued");
            state.queue_changed().await;
            Some(PttOutbound::PttQueued {
                id: item.id,
                client_id: client_id.to_string(),
            })
        }
        PttInbound::DialogueRequest { text, .. } => {
            let text = text
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DIALOGUE_REQUEST_TEXT.to_string());
            let item = QueueItem::new(item_id("dialogue"), client_id, ItemKind::Dialogue)
                .with_text(Some(text));
            let item = state.queue.enqueue(item).await;
            info!(id = %item.id, client_id, "Dialogue request enqueued");
            state.queue_changed().await;
            Some(PttOutbound::DialogueQueued {
                id: item.id,
                client_id: client_id.to_string(),
            })
        }
        PttInbound::DialogueEnd => {
            info!(client_id, "Dialogue end requested");
            match state.peers.host_end_dialogue().await {
                Ok(reply) if !reply.status.is_success() => {
                    warn!(status = %reply.status, "Host refused dialogue end");
                }
                Ok(_) => {}
                Err(e) => warn!(%e, "Failed to reach host for dialogue end"),
            }
            Some(PttOutbound::DialogueEndAck)
        }
        PttInbound::AudioAppend { audio } => {
            debug!(client_id, bytes = audio.len(), "Forwarding dialogue audio");
            match state.peers.host_audio_input(&audio).await {
                Ok(reply) if !reply.status.is_success() => {
                    warn!(status = %reply.status, "Host rejected audio chunk");
                }
                Ok(_) => {}
                Err(e) => warn!(%e, "Failed to forward audio to host"),
            }
            None
        }
        PttInbound::AudioCommit => {
            debug!(client_id, "Forwarding audio commit");
            if let Err(e) = state.peers.host_audio_commit().await {
                warn!(%e, "Failed to forward audio commit to host");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio24_core::config::Config;
    use radio24_core::queue::{DEFAULT_PRIORITY, DIALOGUE_PRIORITY};
    use radio24_core::submission::JsonlSubmissionStore;
    use radio24_providers::{HashingEmbedder, OpenAiProvider};
    use tokio_util::sync::CancellationToken;

    use crate::hub::Hub;

    fn state(data: &std::path::Path) -> GatewayState {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.peers.director_base = "http://127.0.0.1:9".into();
        config.peers.host_base = "http://127.0.0.1:9".into();
        let offline = Arc::new(OpenAiProvider::new(&config.openai).unwrap());
        GatewayState::new(
            Arc::new(config),
            Hub::spawn(CancellationToken::new()),
            Arc::new(JsonlSubmissionStore::new(data.to_path_buf())),
            Arc::new(HashingEmbedder::default()),
            offline,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ptt_enqueues_at_default_priority() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path());

        let reply = reply_to(&state, "alice", r#"{"type":"ptt","kind":"audio","text":"曲"}"#).await;
        assert!(matches!(reply, Some(PttOutbound::PttQueued { .. })));

        let head = state.queue.peek().await.unwrap();
        assert_eq!(head.kind, ItemKind::Audio);
        assert_eq!(head.priority, DEFAULT_PRIORITY);
    }

    #[tokio::test]
    async fn test_ptt_cannot_claim_dialogue_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path());

        reply_to(&state, "alice", r#"{"type":"ptt","text":"先に並んだ"}"#).await;
        let reply = reply_to(&state, "mallory", r#"{"type":"ptt","kind":"dialogue","text":"x"}"#).await;
        assert!(matches!(reply, Some(PttOutbound::Error { .. })));

        assert_eq!(state.queue.len().await, 1);
        let head = state.queue.peek().await.unwrap();
        assert_eq!(head.user_id, "alice");
        assert_eq!(head.priority, DEFAULT_PRIORITY);
    }

    #[tokio::test]
    async fn test_dialogue_request_jumps_the_line() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path());

        reply_to(&state, "alice", r#"{"type":"ptt","text":"メッセージ"}"#).await;
        let reply = reply_to(&state, "bob", r#"{"type":"dialogue_request","kind":"dialogue"}"#).await;
        assert!(matches!(reply, Some(PttOutbound::DialogueQueued { .. })));

        let head = state.queue.peek().await.unwrap();
        assert_eq!(head.user_id, "bob");
        assert_eq!(head.kind, ItemKind::Dialogue);
        assert_eq!(head.priority, DIALOGUE_PRIORITY);
        assert_eq!(head.text.as_deref(), Some(DIALOGUE_REQUEST_TEXT));
    }
}
