//! Scripted monologue: every period, pick the next topic, write a short script
//! from the director's prompt and speak it on the monologue track.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radio24_providers::{ScriptWriter, SpeechSynthesizer, fallback_script};

use crate::gateway_client::GatewayLink;
use crate::mode::ModeController;

pub const TOPICS: [&str; 8] = [
    "今日の天気予報",
    "最新のニュース",
    "音楽の話題",
    "リスナーからのメッセージ",
    "今日の出来事",
    "季節の話題",
    "テクノロジーの話題",
    "エンターテイメント",
];

/// Spoken when the air returns from a dialogue.
pub const RETURN_PHRASE: &str = "ありがとうございました。通常のラジオ放送に戻ります。";

/// The director's current prompt plus one-shot instructions waiting for the
/// next monologue.
#[derive(Default)]
pub struct PromptBoard {
    prompt: RwLock<String>,
    notes: Mutex<Vec<String>>,
}

impl PromptBoard {
    pub async fn set_prompt(&self, prompt: impl Into<String>) {
        *self.prompt.write().await = prompt.into();
    }

    pub async fn prompt(&self) -> String {
        self.prompt.read().await.clone()
    }

    pub async fn push_note(&self, note: impl Into<String>) {
        self.notes.lock().await.push(note.into());
    }

    pub async fn take_notes(&self) -> Vec<String> {
        std::mem::take(&mut *self.notes.lock().await)
    }
}

fn with_prompt(prompt: &str, request: String) -> String {
    if prompt.is_empty() {
        request
    } else {
        format!("{prompt} {request}")
    }
}

/// Prompt for one monologue turn.
pub fn monologue_prompt(prompt: &str, topic: &str, notes: &[String]) -> String {
    let mut out = with_prompt(
        prompt,
        format!(
            "トピック「{topic}」について、ラジオDJとして30秒程度の内容を話してください。自然で親しみやすい口調で、リスナーとの距離感を大切にしてください。"
        ),
    );
    for note in notes {
        out.push_str("\n\nディレクターからの指示: ");
        out.push_str(note);
    }
    out
}

/// Prompt for an on-demand `/script/generate` request.
pub fn script_request_prompt(prompt: &str, topic: &str, style: Option<&str>) -> String {
    let mut out = with_prompt(
        prompt,
        format!(
            "トピック「{topic}」について、ラジオDJとして30秒程度の内容を話してください。必要に応じて最新の情報を検索して取り込んでください。"
        ),
    );
    if let Some(style) = style.filter(|s| !s.is_empty()) {
        out.push_str(&format!(" スタイル: {style}"));
    }
    out
}

/// Speaks text on the monologue track with a subtitle sidecar.
pub struct Speaker {
    mode: Arc<ModeController>,
    speech: Arc<dyn SpeechSynthesizer>,
    gateway: Arc<dyn GatewayLink>,
}

impl Speaker {
    pub fn new(
        mode: Arc<ModeController>,
        speech: Arc<dyn SpeechSynthesizer>,
        gateway: Arc<dyn GatewayLink>,
    ) -> Self {
        Self {
            mode,
            speech,
            gateway,
        }
    }

    /// Post the subtitle, synthesize and write the audio. Returns the number
    /// of frames written.
    pub async fn say(&self, text: &str) -> anyhow::Result<usize> {
        let gateway = self.gateway.clone();
        let subtitle = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = gateway.subtitle(&subtitle).await {
                warn!(%e, "Failed to post subtitle");
            }
        });

        let Some(pcm) = self.speech.synthesize(text).await? else {
            debug!("Speech synthesis offline, subtitle only");
            return Ok(0);
        };
        let Some(writer) = self.mode.host_writer().await else {
            debug!("Monologue track unavailable, dropping speech");
            return Ok(0);
        };
        let frames = writer.write_pcm(&pcm).await?;
        debug!(frames, "Speech written to monologue track");
        Ok(frames)
    }
}

pub struct Monologue {
    mode: Arc<ModeController>,
    speaker: Arc<Speaker>,
    script: Arc<dyn ScriptWriter>,
    board: Arc<PromptBoard>,
    period: Duration,
    next_topic: AtomicUsize,
}

impl Monologue {
    pub fn new(
        mode: Arc<ModeController>,
        speaker: Arc<Speaker>,
        script: Arc<dyn ScriptWriter>,
        board: Arc<PromptBoard>,
        period: Duration,
    ) -> Self {
        Self {
            mode,
            speaker,
            script,
            board,
            period,
            next_topic: AtomicUsize::new(0),
        }
    }

    fn take_topic(&self) -> &'static str {
        let index = self.next_topic.fetch_add(1, Ordering::Relaxed);
        TOPICS[index % TOPICS.len()]
    }

    /// One speaking turn. Script failures fall back to a canned line.
    pub async fn turn(&self) {
        let topic = self.take_topic();
        let notes = self.board.take_notes().await;
        let prompt = monologue_prompt(&self.board.prompt().await, topic, &notes);

        info!(topic, "Generating monologue");
        let script = match self.script.write_script(&prompt).await {
            Ok(script) => script,
            Err(e) => {
                warn!(%e, topic, "Script generation failed, using fallback");
                fallback_script(topic)
            }
        };

        if let Err(e) = self.speaker.say(&script).await {
            warn!(%e, topic, "Failed to speak monologue");
        }
    }

    /// Tick every period, reset after each turn. Ticks during a dialogue
    /// short-circuit; the end of a dialogue restarts the cadence, including
    /// one that ended while a turn was still speaking.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(period_secs = self.period.as_secs(), "Monologue loop started");
        let mut resumed = self.mode.resumed();
        let mut next = Instant::now() + self.period;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = resumed.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    info!("Dialogue ended, resuming monologue");
                    if let Err(e) = self.speaker.say(RETURN_PHRASE).await {
                        warn!(%e, "Failed to speak return phrase");
                    }
                }
                _ = tokio::time::sleep_until(next) => {
                    if self.mode.is_active() {
                        debug!("Dialogue active, skipping monologue tick");
                    } else {
                        self.turn().await;
                    }
                }
            }
            next = Instant::now() + self.period;
        }
        info!("Monologue loop stopped");
    }
}
