//! Where the Director's decisions go: instructions and prompts to the Host,
//! program updates to the Gateway's fan-out.

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use radio24_core::config::{PeerConfig, timeouts};
use radio24_core::protocol::{NowPlaying, kinds};

#[async_trait]
pub trait ProgramSink: Send + Sync {
    async fn instruction(&self, content: &str) -> anyhow::Result<()>;

    async fn prompt(&self, prompt: &str) -> anyhow::Result<()>;

    async fn program_update(&self, now: &NowPlaying) -> anyhow::Result<()>;
}

pub struct HttpProgramSink {
    client: reqwest::Client,
    host_base: String,
    gateway_base: String,
}

impl HttpProgramSink {
    pub fn new(peers: &PeerConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeouts::PEER)
            .build()
            .context("building director HTTP client")?;
        Ok(Self {
            client,
            host_base: peers.host_base.clone(),
            gateway_base: peers.gateway_base.clone(),
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, url: String, body: &B) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{url} error {status}: {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl ProgramSink for HttpProgramSink {
    async fn instruction(&self, content: &str) -> anyhow::Result<()> {
        self.post(
            format!("{}/director/instruction", self.host_base),
            &json!({ "type": "director_instruction", "content": content }),
        )
        .await
    }

    async fn prompt(&self, prompt: &str) -> anyhow::Result<()> {
        self.post(
            format!("{}/director/prompt", self.host_base),
            &json!({ "prompt": prompt }),
        )
        .await
    }

    async fn program_update(&self, now: &NowPlaying) -> anyhow::Result<()> {
        self.post(
            format!("{}/v1/broadcast", self.gateway_base),
            &json!({ "type": kinds::PROGRAM_UPDATE, "data": now }),
        )
        .await
    }
}
