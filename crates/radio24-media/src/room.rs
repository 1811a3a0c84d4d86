//! Media-server contract: a room the host joins and the audio tracks it
//! publishes into it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Monologue track.
pub const HOST_TRACK: &str = "radio-24-host";
/// Host side of a live dialogue.
pub const DIALOGUE_TRACK: &str = "radio-24-host-dialogue";
/// Listener audio mirrored during a dialogue.
pub const USER_TRACK: &str = "radio-24-user-input";

/// A published 24 kHz mono s16le track.
#[async_trait]
pub trait AudioTrack: Send + Sync {
    fn name(&self) -> &str;

    /// Write one 960-byte frame.
    async fn write_frame(&self, frame: &[u8]) -> anyhow::Result<()>;
}

/// A joined media-server room.
#[async_trait]
pub trait MediaRoom: Send + Sync {
    async fn publish(&self, name: &str) -> anyhow::Result<Arc<dyn AudioTrack>>;

    async fn unpublish(&self, name: &str) -> anyhow::Result<()>;

    /// Resolves once the connection to the media server is gone.
    async fn closed(&self);

    async fn close(&self);
}

/// Joins the broadcast room.
#[async_trait]
pub trait MediaConnector: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Arc<dyn MediaRoom>>;
}

/// Track that accepts frames and throws them away, counting as it goes.
pub struct SilentTrack {
    name: String,
    frames: AtomicU64,
}

impl SilentTrack {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AudioTrack for SilentTrack {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_frame(&self, _frame: &[u8]) -> anyhow::Result<()> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// In-process room with no media server behind it.
#[derive(Default)]
pub struct SilentRoom {
    tracks: RwLock<HashMap<String, Arc<SilentTrack>>>,
    closed: CancellationToken,
}

impl SilentRoom {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tracks.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn track(&self, name: &str) -> Option<Arc<SilentTrack>> {
        self.tracks.read().await.get(name).cloned()
    }
}

#[async_trait]
impl MediaRoom for SilentRoom {
    async fn publish(&self, name: &str) -> anyhow::Result<Arc<dyn AudioTrack>> {
        if self.closed.is_cancelled() {
            anyhow::bail!("room is closed");
        }
        let track = Arc::new(SilentTrack {
            name: name.to_string(),
            frames: AtomicU64::new(0),
        });
        self.tracks
            .write()
            .await
            .insert(name.to_string(), track.clone());
        debug!(track = name, "Published silent track");
        Ok(track)
    }

    async fn unpublish(&self, name: &str) -> anyhow::Result<()> {
        self.tracks.write().await.remove(name);
        debug!(track = name, "Unpublished silent track");
        Ok(())
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Hands out a fresh [`SilentRoom`] on every connect.
#[derive(Default)]
pub struct SilentConnector;

#[async_trait]
impl MediaConnector for SilentConnector {
    async fn connect(&self) -> anyhow::Result<Arc<dyn MediaRoom>> {
        info!("Using silent media room");
        Ok(Arc::new(SilentRoom::new()))
    }
}
