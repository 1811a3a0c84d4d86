//! Realtime speech provider client.
//!
//! One socket per dialogue. A pump task owns the socket: it forwards outbound
//! events from a [`RealtimeSender`] and turns inbound frames into
//! [`RealtimeEvent`]s. The event channel closes when the socket goes away,
//! which is how the dialogue controller notices provider loss.

use anyhow::Context;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use radio24_core::config::timeouts;

/// Persona sent with `session.update` when a dialogue opens.
pub const DIALOGUE_INSTRUCTIONS: &str = "あなたは24時間AIラジオのDJです。リスナーとの対話では、自然で親しみやすい口調で、ラジオDJらしい応答をしてください。短く、親しみやすく、エンターテイメント性のある会話を心がけてください。対話モードが開始されたら、まずは「こんにちは！ラジオ24のDJです。何かお話ししたいことはありますか？」のような挨拶をしてください。";

const DIALOGUE_VOICE: &str = "marin";
const IDLE_TIMEOUT_MS: u64 = 6000;
const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Inbound provider events the host cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    SessionCreated,
    SessionUpdated,
    /// Base64 PCM from `response.output_audio.delta`.
    AudioDelta(String),
    /// Finished text part from `response.content_part.done`.
    TextDone(String),
    ResponseDone,
    Error {
        code: Option<String>,
        message: String,
    },
    /// Anything else, by type tag.
    Other(String),
}

impl RealtimeEvent {
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let kind = value.get("type")?.as_str()?;
        let event = match kind {
            "session.created" => Self::SessionCreated,
            "session.updated" => Self::SessionUpdated,
            "response.output_audio.delta" => {
                Self::AudioDelta(value.get("delta")?.as_str()?.to_string())
            }
            "response.content_part.done" => {
                let text = value
                    .get("content_part")
                    .and_then(|p| p.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Self::TextDone(text.to_string())
            }
            "response.done" => Self::ResponseDone,
            "error" => {
                let error = value.get("error");
                Self::Error {
                    code: error
                        .and_then(|e| e.get("code"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    message: error
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
            }
            other => Self::Other(other.to_string()),
        };
        Some(event)
    }
}

/// Human explanation for the provider error codes seen in practice.
pub fn explain_error_code(code: &str) -> Option<&'static str> {
    match code {
        "input_audio_buffer_commit_empty" => {
            Some("audio buffer was empty at commit; check the input audio format")
        }
        "invalid_value" => Some("invalid audio payload; check the PCM16 encoding"),
        _ => None,
    }
}

/// `session.update` configuring the dialogue persona and audio behaviour.
pub fn session_update(instructions: &str) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "type": "realtime",
            "instructions": instructions,
            "output_modalities": ["audio"],
            "audio": {
                "input": {
                    "turn_detection": {
                        "type": "server_vad",
                        "idle_timeout_ms": IDLE_TIMEOUT_MS,
                    }
                },
                "output": { "voice": DIALOGUE_VOICE }
            }
        }
    })
}

/// Cloneable outbound half of a realtime session.
#[derive(Clone)]
pub struct RealtimeSender {
    outbound: mpsc::Sender<Value>,
    cancel: CancellationToken,
}

impl RealtimeSender {
    pub fn new(outbound: mpsc::Sender<Value>, cancel: CancellationToken) -> Self {
        Self { outbound, cancel }
    }

    pub async fn send(&self, event: Value) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("realtime session is closed");
        }
        self.outbound
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("realtime session is closed"))
    }

    pub async fn append_audio(&self, audio_b64: &str) -> anyhow::Result<()> {
        self.send(json!({ "type": "input_audio_buffer.append", "audio": audio_b64 }))
            .await
    }

    pub async fn commit(&self) -> anyhow::Result<()> {
        self.send(json!({ "type": "input_audio_buffer.commit" })).await
    }

    /// Close the provider socket.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// An open realtime session: the sender plus the inbound event stream.
pub struct RealtimeSession {
    pub sender: RealtimeSender,
    pub events: mpsc::Receiver<RealtimeEvent>,
}

/// Opens realtime sessions that are already configured and asked to greet.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn open(&self) -> anyhow::Result<RealtimeSession>;
}

pub struct OpenAiRealtime {
    url: String,
    api_key: String,
}

impl OpenAiRealtime {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl RealtimeConnector for OpenAiRealtime {
    async fn open(&self) -> anyhow::Result<RealtimeSession> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid realtime url {}", self.url))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );

        let (mut ws, _resp) =
            tokio::time::timeout(timeouts::PROVIDER, tokio_tungstenite::connect_async(request))
                .await
                .context("realtime connect timed out")?
                .context("connecting to realtime provider")?;
        info!("Connected to realtime provider");

        ws.send(Message::Text(
            session_update(DIALOGUE_INSTRUCTIONS).to_string().into(),
        ))
        .await
        .context("sending session.update")?;
        if let Err(e) = ws
            .send(Message::Text(json!({ "type": "response.create" }).to_string().into()))
            .await
        {
            warn!(%e, "Failed to request opening response");
        }

        let (out_tx, mut out_rx) = mpsc::channel::<Value>(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<RealtimeEvent>(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => {
                        let _ = ws.close(None).await;
                        break;
                    }
                    Some(event) = out_rx.recv() => {
                        if let Err(e) = ws.send(Message::Text(event.to_string().into())).await {
                            warn!(%e, "Realtime write failed");
                            break;
                        }
                    }
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let Some(event) = RealtimeEvent::parse(text.as_str()) else {
                                trace!("Ignoring unparseable realtime frame");
                                continue;
                            };
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "Realtime provider closed the socket");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(%e, "Realtime read error");
                            break;
                        }
                        None => break,
                    }
                }
            }
            pump_cancel.cancel();
            debug!("Realtime pump stopped");
        });

        Ok(RealtimeSession {
            sender: RealtimeSender::new(out_tx, cancel),
            events: event_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_events() {
        assert_eq!(
            RealtimeEvent::parse(r#"{"type":"response.output_audio.delta","delta":"AAAA"}"#),
            Some(RealtimeEvent::AudioDelta("AAAA".into()))
        );
        assert_eq!(
            RealtimeEvent::parse(
                r#"{"type":"response.content_part.done","content_part":{"type":"text","text":"こんにちは"}}"#
            ),
            Some(RealtimeEvent::TextDone("こんにちは".into()))
        );
        assert_eq!(
            RealtimeEvent::parse(r#"{"type":"response.done"}"#),
            Some(RealtimeEvent::ResponseDone)
        );
        assert_eq!(
            RealtimeEvent::parse(
                r#"{"type":"error","error":{"code":"invalid_value","message":"bad audio"}}"#
            ),
            Some(RealtimeEvent::Error {
                code: Some("invalid_value".into()),
                message: "bad audio".into()
            })
        );
        assert_eq!(
            RealtimeEvent::parse(r#"{"type":"rate_limits.updated"}"#),
            Some(RealtimeEvent::Other("rate_limits.updated".into()))
        );
        assert_eq!(RealtimeEvent::parse("not json"), None);
        assert_eq!(RealtimeEvent::parse(r#"{"type":"response.output_audio.delta"}"#), None);
    }

    #[test]
    fn test_error_explanations() {
        assert!(explain_error_code("input_audio_buffer_commit_empty").is_some());
        assert!(explain_error_code("invalid_value").is_some());
        assert!(explain_error_code("rate_limited").is_none());
    }

    #[test]
    fn test_session_update_shape() {
        let update = session_update("hi");
        assert_eq!(update["type"], "session.update");
        assert_eq!(update["session"]["output_modalities"][0], "audio");
        assert_eq!(update["session"]["audio"]["input"]["turn_detection"]["type"], "server_vad");
        assert_eq!(update["session"]["audio"]["input"]["turn_detection"]["idle_timeout_ms"], 6000);
        assert_eq!(update["session"]["audio"]["output"]["voice"], "marin");
    }

    #[tokio::test]
    async fn test_sender_after_close_fails() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = RealtimeSender::new(tx, CancellationToken::new());
        sender.close();
        assert!(sender.is_closed());
        assert!(sender.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_open_configures_and_streams_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for _ in 0..2 {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    seen_tx.send(serde_json::from_str(text.as_str()).unwrap()).unwrap();
                }
            }
            ws.send(Message::Text(
                r#"{"type":"response.output_audio.delta","delta":"AAAA"}"#.into(),
            ))
            .await
            .unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                seen_tx.send(serde_json::from_str(text.as_str()).unwrap()).unwrap();
            }
            ws.close(None).await.unwrap();
        });

        let connector = OpenAiRealtime::new(format!("ws://{addr}"), "sk-test");
        let mut session = connector.open().await.unwrap();

        assert_eq!(seen_rx.recv().await.unwrap()["type"], "session.update");
        assert_eq!(seen_rx.recv().await.unwrap()["type"], "response.create");

        assert_eq!(
            session.events.recv().await,
            Some(RealtimeEvent::AudioDelta("AAAA".into()))
        );
        session.sender.commit().await.unwrap();
        assert_eq!(seen_rx.recv().await.unwrap()["type"], "input_audio_buffer.commit");

        // Provider hang-up closes the event stream.
        assert_eq!(session.events.recv().await, None);
    }
}
