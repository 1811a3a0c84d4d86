//! JSON shapes exchanged between listeners and the services.
//!
//! Listener-facing sockets carry two families of frames: `ws/broadcast` pushes
//! [`BroadcastMessage`]s, `ws/ptt` accepts [`PttInbound`] and answers with
//! [`PttOutbound`]. The Director's public projection is [`NowPlaying`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::submission::SubmissionKind;

/// Well-known broadcast type tags.
pub mod kinds {
    pub const PROGRAM_UPDATE: &str = "program_update";
    pub const QUEUE_UPDATE: &str = "queue_update";
    pub const DIALOGUE_READY: &str = "dialogue_ready";
    pub const DIALOGUE_ENDED: &str = "dialogue_ended";
    pub const DIALOGUE_TIMEOUT: &str = "dialogue_timeout";
    pub const SUBTITLE: &str = "subtitle";
}

/// One hub delivery. Never retained after fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Frames a listener may send on `ws/ptt`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum PttInbound {
    #[serde(rename = "ptt")]
    Ptt {
        /// Only text and audio; dialogue requests have their own frame.
        #[serde(default = "default_ptt_kind")]
        kind: SubmissionKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    #[serde(rename = "dialogue_request")]
    DialogueRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    #[serde(rename = "dialogue_end")]
    DialogueEnd,

    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,
}

fn default_ptt_kind() -> SubmissionKind {
    SubmissionKind::Text
}

/// Replies written back on `ws/ptt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PttOutbound {
    PttQueued { id: String, client_id: String },
    DialogueQueued { id: String, client_id: String },
    DialogueEndAck,
    Error { message: String },
}

/// Queue count plus short previews of the head items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub count: usize,
    #[serde(default)]
    pub top: Vec<String>,
}

/// Public projection of the Director's program state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub theme: String,
    pub theme_color: String,
    pub segment: String,
    pub next_tick_at: DateTime<Utc>,
    pub listeners: usize,
    pub prompt: String,
    pub queue_count: usize,
    pub top_queue: Vec<String>,
}

/// Director liveness diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorStatus {
    pub is_running: bool,
    pub current_theme: String,
    pub current_segment: String,
    /// Start instant of the Director process.
    pub uptime: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}
