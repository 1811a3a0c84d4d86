//! WebSocket PCM relay: publishes host tracks to a media-server ingress.
//!
//! This is a small protocol of its own, not LiveKit signalling. It needs a
//! relay that speaks it and bridges the tracks into the room; pointing it at
//! a LiveKit server directly will fail the handshake.
//!
//! The host authenticates with a publish-grant bearer token, then multiplexes
//! its tracks over one socket:
//!
//! - text frames carry control messages,
//!   `{"type":"publish","track":n,"name":..,"sample_rate":24000,"channels":1}`
//!   and `{"type":"unpublish","track":n}`
//! - binary frames carry audio: a 4-byte little-endian track number followed
//!   by one 960-byte PCM frame

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radio24_core::config::timeouts;
use radio24_core::token::{ROOM_NAME, TokenMinter, VideoGrant};

use crate::pcm::{CHANNELS, SAMPLE_RATE};
use crate::room::{AudioTrack, MediaConnector, MediaRoom};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Identity the host publishes under.
pub const HOST_IDENTITY: &str = "radio-24-host";

/// Validity of the host's publish token, in seconds.
const HOST_TOKEN_TTL_SECS: i64 = 6 * 3600;

pub struct RelayConnector {
    url: String,
    minter: TokenMinter,
}

impl RelayConnector {
    pub fn new(url: impl Into<String>, minter: TokenMinter) -> Self {
        Self {
            url: url.into(),
            minter,
        }
    }
}

#[async_trait]
impl MediaConnector for RelayConnector {
    async fn connect(&self) -> anyhow::Result<Arc<dyn MediaRoom>> {
        let token = self.minter.mint(
            HOST_IDENTITY,
            VideoGrant::publisher(ROOM_NAME),
            chrono::Duration::seconds(HOST_TOKEN_TTL_SECS),
        )?;

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid media relay url {}", self.url))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );

        let (ws, _resp) = tokio::time::timeout(
            timeouts::MEDIA_WRITE,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .context("media relay connect timed out")?
        .with_context(|| format!("connecting to media relay at {}", self.url))?;
        info!(url = %self.url, "Connected to media relay");

        let (sink, mut stream) = ws.split();
        let closed = CancellationToken::new();

        let watch = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watch.cancelled() => break,
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "Media relay closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(%e, "Media relay read error");
                            break;
                        }
                        None => break,
                    }
                }
            }
            watch.cancel();
        });

        Ok(Arc::new(RelayRoom {
            sink: Arc::new(Mutex::new(sink)),
            tracks: RwLock::new(HashMap::new()),
            next_track: AtomicU32::new(1),
            closed,
        }))
    }
}

pub struct RelayRoom {
    sink: Arc<Mutex<WsSink>>,
    tracks: RwLock<HashMap<String, u32>>,
    next_track: AtomicU32,
    closed: CancellationToken,
}

async fn send(sink: &Mutex<WsSink>, closed: &CancellationToken, msg: Message) -> anyhow::Result<()> {
    if closed.is_cancelled() {
        anyhow::bail!("media relay connection is closed");
    }
    let result = tokio::time::timeout(timeouts::MEDIA_WRITE, async {
        sink.lock().await.send(msg).await
    })
    .await;
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            closed.cancel();
            Err(anyhow::anyhow!("media relay write failed: {e}"))
        }
        Err(_) => {
            closed.cancel();
            Err(anyhow::anyhow!("media relay write timed out"))
        }
    }
}

#[async_trait]
impl MediaRoom for RelayRoom {
    async fn publish(&self, name: &str) -> anyhow::Result<Arc<dyn AudioTrack>> {
        let number = self.next_track.fetch_add(1, Ordering::Relaxed);
        let control = json!({
            "type": "publish",
            "track": number,
            "name": name,
            "sample_rate": SAMPLE_RATE,
            "channels": CHANNELS,
        });
        send(&self.sink, &self.closed, Message::Text(control.to_string().into())).await?;
        self.tracks.write().await.insert(name.to_string(), number);
        debug!(track = name, number, "Published relay track");

        Ok(Arc::new(RelayTrack {
            name: name.to_string(),
            number,
            sink: self.sink.clone(),
            closed: self.closed.clone(),
        }))
    }

    async fn unpublish(&self, name: &str) -> anyhow::Result<()> {
        let Some(number) = self.tracks.write().await.remove(name) else {
            return Ok(());
        };
        let control = json!({ "type": "unpublish", "track": number });
        send(&self.sink, &self.closed, Message::Text(control.to_string().into())).await?;
        debug!(track = name, number, "Unpublished relay track");
        Ok(())
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }

    async fn close(&self) {
        if !self.closed.is_cancelled() {
            let _ = tokio::time::timeout(timeouts::MEDIA_WRITE, async {
                self.sink.lock().await.close().await
            })
            .await;
        }
        self.closed.cancel();
    }
}

pub struct RelayTrack {
    name: String,
    number: u32,
    sink: Arc<Mutex<WsSink>>,
    closed: CancellationToken,
}

#[async_trait]
impl AudioTrack for RelayTrack {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_frame(&self, frame: &[u8]) -> anyhow::Result<()> {
        let mut payload = Vec::with_capacity(4 + frame.len());
        payload.extend_from_slice(&self.number.to_le_bytes());
        payload.extend_from_slice(frame);
        send(&self.sink, &self.closed, Message::Binary(payload.into())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    async fn relay_server() -> (
        String,
        tokio::sync::mpsc::UnboundedReceiver<(Option<String>, Message)>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let auth = Arc::new(std::sync::Mutex::new(None));
            let auth_cb = auth.clone();
            let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                *auth_cb.lock().unwrap() = req
                    .headers()
                    .get("Authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            })
            .await
            .unwrap();
            let (_sink, mut stream) = ws.split();
            while let Some(Ok(msg)) = stream.next().await {
                let header = auth.lock().unwrap().clone();
                if tx.send((header, msg)).is_err() {
                    break;
                }
            }
        });
        (format!("ws://{addr}"), rx)
    }

    #[tokio::test]
    async fn test_publish_and_write_frames() {
        let (url, mut rx) = relay_server().await;
        let minter = TokenMinter::new("devkey", "secret");
        let room = RelayConnector::new(url, minter.clone()).connect().await.unwrap();

        let track = room.publish("radio-24-host").await.unwrap();
        track.write_frame(&[7u8; 960]).await.unwrap();
        room.unpublish("radio-24-host").await.unwrap();

        let (auth, publish) = rx.recv().await.unwrap();
        let token = auth.unwrap().strip_prefix("Bearer ").unwrap().to_string();
        let claims = minter.verify(&token).unwrap();
        assert_eq!(claims.sub, HOST_IDENTITY);
        assert!(claims.video.can_publish);

        let Message::Text(text) = publish else {
            panic!("expected control frame");
        };
        let control: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(control["type"], "publish");
        assert_eq!(control["name"], "radio-24-host");
        assert_eq!(control["sample_rate"], 24000);

        let (_, frame) = rx.recv().await.unwrap();
        let Message::Binary(bytes) = frame else {
            panic!("expected audio frame");
        };
        assert_eq!(bytes.len(), 964);
        let number = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(u64::from(number), control["track"].as_u64().unwrap());
        assert!(bytes[4..].iter().all(|b| *b == 7));

        let (_, unpublish) = rx.recv().await.unwrap();
        let Message::Text(text) = unpublish else {
            panic!("expected control frame");
        };
        assert!(text.as_str().contains("unpublish"));
    }

    #[tokio::test]
    async fn test_connection_loss_resolves_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let room = RelayConnector::new(format!("ws://{addr}"), TokenMinter::new("k", "s"))
            .connect()
            .await
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), room.closed())
            .await
            .expect("closed() should resolve after the relay hangs up");
        assert!(room.publish("x").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = RelayConnector::new(format!("ws://{addr}"), TokenMinter::new("k", "s"))
            .connect()
            .await;
        assert!(result.is_err());
    }
}
