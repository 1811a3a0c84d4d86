//! OpenAI-backed provider: chat completions for scripts, `audio/speech` for
//! PCM, embeddings for submissions and realtime client secrets.
//!
//! Without an API key the provider runs offline: scripts come back as a fixed
//! line, synthesis is skipped, embeddings fall back to [`HashingEmbedder`] and
//! secret issuance fails.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use radio24_core::config::{OpenAiConfig, timeouts};

use crate::{
    Embedder, EphemeralIssuer, HashingEmbedder, OFFLINE_SCRIPT, ScriptWriter, SpeechSynthesizer,
};

const SCRIPT_MODEL: &str = "gpt-4o-mini";
const SCRIPT_SYSTEM: &str = "あなたは24時間AIラジオのDJです。自然で親しみやすい口調で、リスナーとの距離感を大切にしてください。";
const SCRIPT_MAX_TOKENS: u32 = 200;
const SCRIPT_TEMPERATURE: f64 = 0.8;
const SCRIPT_TOP_P: f64 = 0.9;

const TTS_MODEL: &str = "tts-1";
const TTS_VOICE: &str = "nova";

const EMBEDDING_MODEL: &str = "text-embedding-3-small";

pub struct OpenAiProvider {
    pub base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    offline_embedder: HashingEmbedder,
}

impl OpenAiProvider {
    pub fn new(config: &OpenAiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeouts::PROVIDER)
            .build()
            .context("building provider HTTP client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
            offline_embedder: HashingEmbedder::default(),
        })
    }

    pub fn is_offline(&self) -> bool {
        self.api_key.is_none()
    }

    fn post(&self, path: &str, api_key: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("authorization", format!("Bearer {api_key}"))
            .header("content-type", "application/json")
    }
}

async fn ensure_success(response: reqwest::Response, what: &str) -> anyhow::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("OpenAI {what} error {status}: {body}")
}

// --- request/response types ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretResponse {
    client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Reduce a client-secrets body to `{client_secret, expires_at}` when it has
/// the expected shape; pass anything else through untouched.
pub fn shape_ephemeral(body: serde_json::Value) -> serde_json::Value {
    match serde_json::from_value::<ClientSecretResponse>(body.clone()) {
        Ok(parsed) if !parsed.client_secret.value.is_empty() => json!({
            "client_secret": parsed.client_secret.value,
            "expires_at": parsed.client_secret.expires_at,
        }),
        _ => body,
    }
}

#[async_trait]
impl ScriptWriter for OpenAiProvider {
    async fn write_script(&self, prompt: &str) -> anyhow::Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("No OpenAI key, returning offline script");
            return Ok(OFFLINE_SCRIPT.to_string());
        };

        let body = ChatRequest {
            model: SCRIPT_MODEL,
            messages: vec![
                json!({ "role": "system", "content": SCRIPT_SYSTEM }),
                json!({ "role": "user", "content": prompt }),
            ],
            max_tokens: SCRIPT_MAX_TOKENS,
            temperature: SCRIPT_TEMPERATURE,
            top_p: SCRIPT_TOP_P,
        };

        debug!(model = SCRIPT_MODEL, prompt_len = prompt.len(), "Requesting script");
        let response = self
            .post("/v1/chat/completions", api_key)
            .json(&body)
            .send()
            .await
            .context("sending chat completion request")?;
        let response = ensure_success(response, "chat").await?;
        let parsed: ChatResponse = response.json().await.context("decoding chat response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("no script in chat response"))
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiProvider {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(None);
        };

        debug!(model = TTS_MODEL, voice = TTS_VOICE, text_len = text.len(), "Requesting speech");
        let response = self
            .post("/v1/audio/speech", api_key)
            .json(&json!({
                "model": TTS_MODEL,
                "input": text,
                "voice": TTS_VOICE,
                "response_format": "pcm",
            }))
            .send()
            .await
            .context("sending speech request")?;
        let response = ensure_success(response, "speech").await?;
        let bytes = response.bytes().await.context("reading speech body")?;
        Ok(Some(bytes.to_vec()))
    }
}

#[async_trait]
impl Embedder for OpenAiProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return self.offline_embedder.embed(text).await;
        };

        let response = self
            .post("/v1/embeddings", api_key)
            .json(&json!({ "model": EMBEDDING_MODEL, "input": text }))
            .send()
            .await
            .context("sending embedding request")?;
        let response = ensure_success(response, "embeddings").await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("decoding embedding response")?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("no embedding returned"))
    }
}

#[async_trait]
impl EphemeralIssuer for OpenAiProvider {
    async fn issue(&self) -> anyhow::Result<serde_json::Value> {
        let Some(api_key) = self.api_key.as_deref() else {
            anyhow::bail!("realtime provider is not configured");
        };

        let response = self
            .post("/v1/realtime/client_secrets", api_key)
            .json(&json!({ "session": { "type": "realtime" } }))
            .send()
            .await
            .context("sending client secret request")?;
        let status = response.status();
        let text = response.text().await.context("reading client secret body")?;
        if !status.is_success() {
            warn!(%status, "Client secret request rejected");
        }
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        Ok(shape_ephemeral(body))
    }
}
