//! HTTP clients for the Host and Director services.

use anyhow::Context;
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use radio24_core::config::{PeerConfig, timeouts};
use radio24_core::protocol::{NowPlaying, QueueSnapshot};

/// Status and body of a peer response, relayed as-is by proxy routes.
#[derive(Debug, Clone)]
pub struct PeerReply {
    pub status: StatusCode,
    pub body: Value,
}

#[derive(Clone)]
pub struct Peers {
    client: reqwest::Client,
    host_base: String,
    director_base: String,
}

impl Peers {
    pub fn new(config: &PeerConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeouts::PEER)
            .build()
            .context("building peer HTTP client")?;
        Ok(Self {
            client,
            host_base: config.host_base.clone(),
            director_base: config.director_base.clone(),
        })
    }

    /// Forward one listener audio chunk to the Host.
    pub async fn host_audio_input(&self, audio: &str) -> anyhow::Result<PeerReply> {
        let body = serde_json::json!({ "type": "input_audio_buffer.append", "audio": audio });
        self.post(&self.host_base, "/audio/input", &body).await
    }

    pub async fn host_audio_commit(&self) -> anyhow::Result<PeerReply> {
        let body = serde_json::json!({ "type": "input_audio_buffer.commit" });
        self.post(&self.host_base, "/audio/commit", &body).await
    }

    pub async fn host_end_dialogue(&self) -> anyhow::Result<PeerReply> {
        let body = serde_json::json!({ "type": "dialogue_end" });
        self.post(&self.host_base, "/dialogue/end", &body).await
    }

    pub async fn director_now(&self) -> anyhow::Result<NowPlaying> {
        let url = format!("{}/v1/now", self.director_base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("director error {status}: {body}");
        }
        response.json().await.context("decoding now-playing")
    }

    pub async fn director_advance(&self) -> anyhow::Result<PeerReply> {
        self.post(&self.director_base, "/v1/admin/advance", &serde_json::json!({}))
            .await
    }

    pub async fn director_queue(&self, snapshot: &QueueSnapshot) -> anyhow::Result<PeerReply> {
        self.post(&self.director_base, "/v1/admin/queue", snapshot).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        base: &str,
        path: &str,
        body: &B,
    ) -> anyhow::Result<PeerReply> {
        let url = format!("{base}{path}");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        debug!(%url, %status, "Peer call finished");
        Ok(PeerReply { status, body })
    }
}
