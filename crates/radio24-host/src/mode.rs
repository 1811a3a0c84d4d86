//! Monologue ↔ dialogue mode switch.
//!
//! The controller exclusively owns the published tracks. Every transition
//! happens under one mutex: entering unpublishes the monologue track and
//! brings up the dialogue and listener tracks plus the realtime socket;
//! leaving reverses that and republishes the monologue track.
//!
//! Each dialogue carries a generation number. Timeout signals and provider
//! socket loss name the generation they belong to, so a late signal can never
//! end a newer dialogue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radio24_core::config::timeouts;
use radio24_core::error::RadioError;
use radio24_core::protocol::kinds;
use radio24_media::pcm::duration_ms;
use radio24_media::realtime::{
    RealtimeConnector, RealtimeEvent, RealtimeSender, explain_error_code,
};
use radio24_media::room::{DIALOGUE_TRACK, HOST_TRACK, USER_TRACK};
use radio24_media::{MediaRoom, PcmWriter};

use crate::gateway_client::GatewayLink;

/// Listener audio chunks shorter than this tend to be rejected at commit.
const SHORT_INPUT_MS: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// `/dialogue/end` or a listener's `dialogue_end`.
    Ended,
    Timeout,
    ProviderClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueStatus {
    pub active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

struct Activity {
    started: Instant,
    last: Instant,
    started_at: DateTime<Utc>,
    last_at: DateTime<Utc>,
}

impl Activity {
    fn now() -> Self {
        let now = Utc::now();
        Self {
            started: Instant::now(),
            last: Instant::now(),
            started_at: now,
            last_at: now,
        }
    }

    fn deadline(&self, bound: Duration) -> Instant {
        (self.started + bound).max(self.last + bound)
    }
}

#[derive(Clone)]
struct ActivityClock(Arc<std::sync::Mutex<Activity>>);

impl ActivityClock {
    fn new() -> Self {
        Self(Arc::new(std::sync::Mutex::new(Activity::now())))
    }

    fn with<T>(&self, f: impl FnOnce(&mut Activity) -> T) -> T {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn touch(&self) {
        self.with(|a| {
            a.last = Instant::now();
            a.last_at = Utc::now();
        });
    }

    fn deadline(&self, bound: Duration) -> Instant {
        self.with(|a| a.deadline(bound))
    }
}

struct Dialogue {
    generation: u64,
    request_id: String,
    client_id: String,
    cancel: CancellationToken,
    activity: ActivityClock,
    realtime: Option<RealtimeSender>,
    voice: Option<Arc<PcmWriter>>,
    listener: Option<Arc<PcmWriter>>,
}

/// Clones of the live dialogue's handles, used outside the lock.
struct DialogueHandles {
    activity: ActivityClock,
    realtime: Option<RealtimeSender>,
    voice: Option<Arc<PcmWriter>>,
    listener: Option<Arc<PcmWriter>>,
}

#[derive(Default)]
struct Inner {
    room: Option<Arc<dyn MediaRoom>>,
    host: Option<Arc<PcmWriter>>,
    dialogue: Option<Dialogue>,
    generation: u64,
}

pub struct ModeController {
    inner: Mutex<Inner>,
    active: AtomicBool,
    gain: f32,
    dialogue_bound: Duration,
    realtime: Option<Arc<dyn RealtimeConnector>>,
    gateway: Arc<dyn GatewayLink>,
    timeouts: mpsc::Sender<u64>,
    /// Count of dialogues ended so far.
    ended: watch::Sender<u64>,
}

/// Receives dialogue timeout signals and ends the matching dialogue.
pub struct TimeoutTask {
    rx: mpsc::Receiver<u64>,
}

impl TimeoutTask {
    pub async fn run(mut self, mode: Arc<ModeController>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(generation) = self.rx.recv() => {
                    mode.leave(Some(generation), LeaveReason::Timeout).await;
                }
                else => break,
            }
        }
    }
}

impl ModeController {
    /// `realtime` is `None` in offline mode: dialogues then run without a
    /// provider socket.
    pub fn new(
        gateway: Arc<dyn GatewayLink>,
        realtime: Option<Arc<dyn RealtimeConnector>>,
        gain: f32,
        dialogue_bound: Duration,
    ) -> (Arc<Self>, TimeoutTask) {
        let (tx, rx) = mpsc::channel(1);
        let controller = Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            active: AtomicBool::new(false),
            gain,
            dialogue_bound,
            realtime,
            gateway,
            timeouts: tx,
            ended: watch::Sender::new(0),
        });
        (controller, TimeoutTask { rx })
    }

    /// Build the controller and spawn its timeout task.
    pub fn spawn(
        gateway: Arc<dyn GatewayLink>,
        realtime: Option<Arc<dyn RealtimeConnector>>,
        gain: f32,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (controller, task) = Self::new(gateway, realtime, gain, timeouts::DIALOGUE);
        tokio::spawn(task.run(controller.clone(), cancel));
        controller
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Watch the count of ended dialogues. A dialogue that ends while the
    /// receiver is not being polled still shows up on the next `changed()`.
    pub fn resumed(&self) -> watch::Receiver<u64> {
        self.ended.subscribe()
    }

    /// Monologue writer, or `None` while a dialogue holds the air or no room
    /// is connected.
    pub async fn host_writer(&self) -> Option<Arc<PcmWriter>> {
        if self.is_active() {
            return None;
        }
        self.inner.lock().await.host.clone()
    }

    /// Take a freshly connected room and publish the tracks the current mode
    /// needs.
    pub async fn attach_room(&self, room: Arc<dyn MediaRoom>) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.room = Some(room.clone());
        inner.host = None;
        match inner.dialogue.as_mut() {
            Some(dialogue) => {
                dialogue.voice = Some(self.publish(&room, DIALOGUE_TRACK).await?);
                dialogue.listener = Some(self.publish(&room, USER_TRACK).await?);
            }
            None => {
                let host = self.publish(&room, HOST_TRACK).await?;
                inner.host = Some(host);
            }
        }
        info!(dialogue = inner.dialogue.is_some(), "Media room attached");
        Ok(())
    }

    /// Forget the room after the media connection is lost.
    pub async fn detach_room(&self) {
        let mut inner = self.inner.lock().await;
        inner.room = None;
        inner.host = None;
        if let Some(dialogue) = inner.dialogue.as_mut() {
            dialogue.voice = None;
            dialogue.listener = None;
        }
        info!("Media room detached");
    }

    async fn publish(&self, room: &Arc<dyn MediaRoom>, name: &str) -> anyhow::Result<Arc<PcmWriter>> {
        let track = room
            .publish(name)
            .await
            .with_context(|| format!("publishing {name}"))?;
        Ok(Arc::new(PcmWriter::new(track, self.gain)))
    }

    /// Promote a queued request into a live dialogue.
    pub async fn enter(self: &Arc<Self>, request_id: &str, client_id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.dialogue.is_some() {
            anyhow::bail!("dialogue already active");
        }

        self.active.store(true, Ordering::SeqCst);
        inner.generation += 1;
        let mut dialogue = Dialogue {
            generation: inner.generation,
            request_id: request_id.to_string(),
            client_id: client_id.to_string(),
            cancel: CancellationToken::new(),
            activity: ActivityClock::new(),
            realtime: None,
            voice: None,
            listener: None,
        };
        info!(request_id, client_id, generation = dialogue.generation, "Entering dialogue");
        self.spawn_watcher(dialogue.generation, dialogue.activity.clone(), dialogue.cancel.clone());

        match self.open(&mut inner, &mut dialogue).await {
            Ok(events) => {
                if let Some(events) = events {
                    let mode = self.clone();
                    let generation = dialogue.generation;
                    let cancel = dialogue.cancel.clone();
                    let activity = dialogue.activity.clone();
                    tokio::spawn(async move {
                        mode.read_events(generation, events, activity, cancel).await;
                    });
                }
                inner.dialogue = Some(dialogue);
                Ok(())
            }
            Err(e) => {
                warn!(%e, request_id, "Failed to enter dialogue, restoring monologue");
                self.teardown(&mut inner, &dialogue).await;
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        inner: &mut Inner,
        dialogue: &mut Dialogue,
    ) -> anyhow::Result<Option<mpsc::Receiver<RealtimeEvent>>> {
        if let Some(host) = inner.host.take() {
            let dropped = host.clear().await;
            debug!(dropped, "Cleared monologue buffer");
        }

        match inner.room.clone() {
            Some(room) => {
                room.unpublish(HOST_TRACK)
                    .await
                    .context("unpublishing monologue track")?;
                dialogue.voice = Some(self.publish(&room, DIALOGUE_TRACK).await?);
                dialogue.listener = Some(self.publish(&room, USER_TRACK).await?);
            }
            None => warn!("No media room connected, dialogue audio will not be published"),
        }

        let events = match &self.realtime {
            Some(connector) => {
                let session = connector
                    .open()
                    .await
                    .context("opening realtime session")?;
                dialogue.realtime = Some(session.sender);
                Some(session.events)
            }
            None => {
                info!("Realtime provider offline, dialogue runs without a provider socket");
                None
            }
        };

        self.gateway
            .broadcast(
                kinds::DIALOGUE_READY,
                json!({ "id": dialogue.request_id, "client_id": dialogue.client_id }),
            )
            .await
            .context("posting dialogue_ready")?;
        Ok(events)
    }

    /// Release everything a dialogue holds and bring the monologue track back.
    async fn teardown(&self, inner: &mut Inner, dialogue: &Dialogue) {
        dialogue.cancel.cancel();
        if let Some(realtime) = &dialogue.realtime {
            realtime.close();
        }
        if let Some(room) = inner.room.clone() {
            for name in [DIALOGUE_TRACK, USER_TRACK] {
                if let Err(e) = room.unpublish(name).await {
                    warn!(%e, track = name, "Failed to unpublish dialogue track");
                }
            }
            match self.publish(&room, HOST_TRACK).await {
                Ok(host) => inner.host = Some(host),
                Err(e) => warn!(%e, "Failed to republish monologue track"),
            }
        }
        self.active.store(false, Ordering::SeqCst);
    }

    /// End the live dialogue. With `Some(generation)` only that dialogue is
    /// ended. Returns whether a dialogue was ended.
    pub async fn leave(&self, generation: Option<u64>, reason: LeaveReason) -> bool {
        let mut inner = self.inner.lock().await;
        let matches = match (&inner.dialogue, generation) {
            (Some(d), Some(g)) => d.generation == g,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            debug!(?generation, ?reason, "No matching dialogue to leave");
            return false;
        }
        let Some(dialogue) = inner.dialogue.take() else {
            return false;
        };

        self.teardown(&mut inner, &dialogue).await;
        info!(
            request_id = %dialogue.request_id,
            client_id = %dialogue.client_id,
            ?reason,
            "Left dialogue"
        );

        let (kind, data) = match reason {
            LeaveReason::Timeout => (
                kinds::DIALOGUE_TIMEOUT,
                json!({ "id": "timeout", "client_id": dialogue.client_id }),
            ),
            LeaveReason::Ended | LeaveReason::ProviderClosed => (
                kinds::DIALOGUE_ENDED,
                json!({ "id": dialogue.request_id, "client_id": dialogue.client_id }),
            ),
        };
        if let Err(e) = self.gateway.broadcast(kind, data).await {
            warn!(%e, kind, "Failed to post dialogue notification");
        }
        drop(inner);

        self.ended.send_modify(|count| *count += 1);
        true
    }

    fn spawn_watcher(&self, generation: u64, activity: ActivityClock, cancel: CancellationToken) {
        let signal = self.timeouts.clone();
        let bound = self.dialogue_bound;
        tokio::spawn(async move {
            loop {
                let deadline = activity.deadline(bound);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline) => {}
                }
                if Instant::now() >= activity.deadline(bound) {
                    info!(generation, "Dialogue inactive, signalling timeout");
                    if signal.try_send(generation).is_err() {
                        debug!(generation, "Timeout signal already pending");
                    }
                    return;
                }
            }
        });
    }

    async fn handles(&self, generation: Option<u64>) -> Option<DialogueHandles> {
        let inner = self.inner.lock().await;
        let dialogue = inner.dialogue.as_ref()?;
        if generation.is_some_and(|g| g != dialogue.generation) {
            return None;
        }
        Some(DialogueHandles {
            activity: dialogue.activity.clone(),
            realtime: dialogue.realtime.clone(),
            voice: dialogue.voice.clone(),
            listener: dialogue.listener.clone(),
        })
    }

    async fn read_events(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::Receiver<RealtimeEvent>,
        activity: ActivityClock,
        cancel: CancellationToken,
    ) {
        match tokio::time::timeout(timeouts::REALTIME_INITIAL, async {
            tokio::select! {
                _ = cancel.cancelled() => None,
                event = events.recv() => Some(event),
            }
        })
        .await
        {
            Ok(None) => return,
            Ok(Some(Some(event))) => self.handle_event(generation, &activity, event).await,
            Ok(Some(None)) => {}
            Err(_) => warn!(generation, "No realtime event within 10s of opening, still waiting"),
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(generation, &activity, event).await,
                    None => break,
                }
            }
        }

        if !cancel.is_cancelled() {
            warn!(generation, "Realtime socket closed, ending dialogue");
            self.leave(Some(generation), LeaveReason::ProviderClosed).await;
        }
    }

    async fn handle_event(&self, generation: u64, activity: &ActivityClock, event: RealtimeEvent) {
        match event {
            RealtimeEvent::AudioDelta(delta) => {
                activity.touch();
                let voice = self.handles(Some(generation)).await.and_then(|h| h.voice);
                if let Some(voice) = voice {
                    if let Err(e) = voice.write_b64_delta(&delta).await {
                        warn!(%e, "Failed to write dialogue audio");
                    }
                }
            }
            RealtimeEvent::TextDone(text) => {
                if text.is_empty() {
                    return;
                }
                let gateway = self.gateway.clone();
                tokio::spawn(async move {
                    if let Err(e) = gateway.subtitle(&text).await {
                        warn!(%e, "Failed to post dialogue subtitle");
                    }
                });
            }
            RealtimeEvent::Error { code, message } => {
                match code.as_deref().and_then(explain_error_code) {
                    Some(explanation) => {
                        warn!(code = ?code, %message, explanation, "Realtime provider error")
                    }
                    None => warn!(code = ?code, %message, "Realtime provider error"),
                }
            }
            RealtimeEvent::SessionCreated | RealtimeEvent::SessionUpdated => {
                debug!(generation, "Realtime session configured");
            }
            RealtimeEvent::ResponseDone => debug!(generation, "Realtime response done"),
            RealtimeEvent::Other(kind) => debug!(%kind, "Unhandled realtime event"),
        }
    }

    /// Forward one listener audio chunk to the provider and mirror it onto
    /// the listener track. A chunk that is not valid base64 is rejected with
    /// [`RadioError::InvalidInput`] before anything reaches the provider.
    pub async fn forward_audio(&self, audio_b64: &str) -> anyhow::Result<()> {
        let raw = STANDARD.decode(audio_b64).map_err(|e| {
            warn!(%e, "Listener audio is not valid base64");
            RadioError::InvalidInput(format!("audio is not valid base64: {e}"))
        })?;
        let ms = duration_ms(raw.len());
        debug!(bytes = raw.len(), duration_ms = ms, "Listener audio chunk");
        if ms < SHORT_INPUT_MS {
            warn!(duration_ms = ms, "Audio chunk shorter than 25 ms, commit may be rejected");
        }

        let Some(handles) = self.handles(None).await else {
            debug!("No active dialogue, dropping listener audio");
            return Ok(());
        };
        handles.activity.touch();

        if let Some(realtime) = &handles.realtime {
            realtime
                .append_audio(audio_b64)
                .await
                .context("sending audio to realtime provider")?;
        }
        if let Some(listener) = &handles.listener {
            if let Err(e) = listener.write_pcm(&raw).await {
                warn!(%e, "Failed to mirror listener audio");
            }
        }
        Ok(())
    }

    pub async fn commit_audio(&self) -> anyhow::Result<()> {
        let Some(handles) = self.handles(None).await else {
            return Ok(());
        };
        if let Some(realtime) = &handles.realtime {
            realtime
                .commit()
                .await
                .context("sending commit to realtime provider")?;
        }
        Ok(())
    }

    pub async fn status(&self) -> DialogueStatus {
        let inner = self.inner.lock().await;
        match &inner.dialogue {
            Some(dialogue) => dialogue.activity.with(|a| DialogueStatus {
                active: true,
                started_at: Some(a.started_at),
                last_activity: Some(a.last_at),
            }),
            None => DialogueStatus {
                active: false,
                started_at: None,
                last_activity: None,
            },
        }
    }
}
