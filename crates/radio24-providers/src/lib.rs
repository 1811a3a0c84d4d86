//! Provider contracts for the speech and language services radio24 leans on.
//!
//! The host writes scripts and synthesizes speech; the gateway embeds
//! submissions and hands out realtime client secrets. Each concern is a small
//! trait so services can be driven by fakes in tests and by
//! [`openai::OpenAiProvider`] in production.

use async_trait::async_trait;

pub mod embedding;
pub mod openai;

pub use embedding::HashingEmbedder;
pub use openai::OpenAiProvider;

/// Script returned when no provider credentials are configured.
pub const OFFLINE_SCRIPT: &str = "テストモードです。ラジオ24をお聞きいただき、ありがとうございます。";

/// Canned monologue line used when script generation fails.
pub fn fallback_script(topic: &str) -> String {
    format!("こんにちは、ラジオ24です。{topic}についてお話しします。")
}

/// Turns a prompt into a short spoken script.
#[async_trait]
pub trait ScriptWriter: Send + Sync {
    async fn write_script(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Text to 24 kHz mono s16le PCM.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// `Ok(None)` means synthesis is unavailable (offline) and the caller
    /// should carry on without audio.
    async fn synthesize(&self, text: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Text to embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Short-lived client secret for the realtime speech provider.
#[async_trait]
pub trait EphemeralIssuer: Send + Sync {
    /// Returns `{client_secret, expires_at}` when the provider answers in that
    /// shape, otherwise the raw provider body.
    async fn issue(&self) -> anyhow::Result<serde_json::Value>;
}
