//! Program state machine.
//!
//! A 1 Hz tick loop and the admin endpoints share one lock over the program
//! state. Every transition composes its outbound messages under the lock and
//! hands them to a dispatcher task, so the state machine never waits on the
//! Host or the Gateway.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local, Timelike, Utc};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radio24_core::program::{Segment, Theme, find_theme, theme_for_hour};
use radio24_core::protocol::{DirectorStatus, NowPlaying, QueueSnapshot};

use crate::prompt::{self, INITIAL_GUIDANCE, PromptContext};
use crate::schedule::Schedule;
use crate::sink::ProgramSink;

const TICK: Duration = Duration::from_secs(1);
const DISPATCH_BACKLOG: usize = 64;

/// Hour of day on the local wall clock.
pub fn local_hour(now: DateTime<Utc>) -> u32 {
    now.with_timezone(&Local).hour()
}

/// One message for the outside world, produced by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Instruction(String),
    Prompt(String),
    ProgramUpdate(NowPlaying),
}

struct ProgramState {
    theme: Theme,
    segment: Segment,
    next_tick: DateTime<Utc>,
    /// Guidance from the hour schedule.
    guidance: String,
    queue: QueueSnapshot,
    /// Hour whose theme is currently applied.
    theme_hour: u32,
    last_update: DateTime<Utc>,
}

pub struct Director {
    state: RwLock<ProgramState>,
    schedule: Schedule,
    segment_duration: chrono::Duration,
    dispatch: mpsc::Sender<Outbound>,
    started_at: DateTime<Utc>,
    running: AtomicBool,
}

impl Director {
    /// Build a director positioned at OP with the theme for the current hour,
    /// plus the dispatcher task that drains its outbound messages into `sink`.
    pub fn new(
        schedule: Schedule,
        segment_duration: Duration,
        sink: Arc<dyn ProgramSink>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        Self::new_at(Utc::now(), schedule, segment_duration, sink)
    }

    pub fn new_at(
        now: DateTime<Utc>,
        schedule: Schedule,
        segment_duration: Duration,
        sink: Arc<dyn ProgramSink>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let segment_duration = chrono::Duration::from_std(segment_duration)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let hour = local_hour(now);
        let guidance = schedule
            .prompt_for(hour)
            .unwrap_or(INITIAL_GUIDANCE)
            .to_string();

        let (tx, rx) = mpsc::channel(DISPATCH_BACKLOG);
        let director = Arc::new(Self {
            state: RwLock::new(ProgramState {
                theme: theme_for_hour(hour),
                segment: Segment::Op,
                next_tick: now + segment_duration,
                guidance,
                queue: QueueSnapshot::default(),
                theme_hour: hour,
                last_update: now,
            }),
            schedule,
            segment_duration,
            dispatch: tx,
            started_at: now,
            running: AtomicBool::new(false),
        });
        let dispatcher = tokio::spawn(run_dispatcher(rx, sink));
        (director, dispatcher)
    }

    /// Push the initial prompt and run the tick loop until `cancel` fires.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let director = self.clone();
        tokio::spawn(async move {
            let initial = {
                let state = director.state.read().await;
                director.compose(&state, Utc::now())
            };
            director.send(vec![Outbound::Prompt(initial)]);

            director.running.store(true, Ordering::SeqCst);
            info!("Program director started");
            let mut interval = tokio::time::interval(TICK);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => director.tick_at(Utc::now()).await,
                }
            }
            director.running.store(false, Ordering::SeqCst);
            info!("Program director stopped");
        })
    }

    /// One tick: switch theme on an hour change, advance when the segment is
    /// due.
    pub async fn tick_at(&self, now: DateTime<Utc>) {
        let outbound = {
            let mut state = self.state.write().await;
            state.last_update = now;
            let mut outbound = Vec::new();

            let hour = local_hour(now);
            if hour != state.theme_hour {
                self.switch_theme(&mut state, hour, now, &mut outbound);
            }
            if now >= state.next_tick {
                self.advance_locked(&mut state, now, &mut outbound);
            }
            outbound
        };
        self.send(outbound);
    }

    /// Explicit advance. NEWS wraps to OP.
    pub async fn advance(&self) -> NowPlaying {
        self.advance_at(Utc::now()).await
    }

    pub async fn advance_at(&self, now: DateTime<Utc>) -> NowPlaying {
        let (outbound, projection) = {
            let mut state = self.state.write().await;
            state.last_update = now;
            let mut outbound = Vec::new();
            self.advance_locked(&mut state, now, &mut outbound);
            (outbound, project(&state))
        };
        self.send(outbound);
        projection
    }

    /// Apply a theme by title. `None` when no theme has that title.
    pub async fn set_theme(&self, title: &str) -> Option<NowPlaying> {
        let theme = find_theme(title)?;
        let now = Utc::now();
        let (outbound, projection) = {
            let mut state = self.state.write().await;
            state.theme = theme;
            if let Some(guidance) = self.schedule.prompt_for(local_hour(now)) {
                state.guidance = guidance.to_string();
            }
            state.last_update = now;
            info!(theme = %state.theme.title, "Theme set by admin");
            let projection = project(&state);
            let outbound = vec![
                Outbound::Instruction(prompt::theme_changed(&state.theme.title)),
                Outbound::Prompt(self.compose(&state, now)),
                Outbound::ProgramUpdate(projection.clone()),
            ];
            (outbound, projection)
        };
        self.send(outbound);
        Some(projection)
    }

    pub async fn set_queue(&self, snapshot: QueueSnapshot) {
        debug!(count = snapshot.count, "Queue snapshot updated");
        self.state.write().await.queue = snapshot;
    }

    pub async fn now_playing(&self) -> NowPlaying {
        project(&*self.state.read().await)
    }

    pub async fn status(&self) -> DirectorStatus {
        let state = self.state.read().await;
        DirectorStatus {
            is_running: self.running.load(Ordering::SeqCst),
            current_theme: state.theme.title.clone(),
            current_segment: state.segment.to_string(),
            uptime: self.started_at,
            last_update: state.last_update,
        }
    }

    fn switch_theme(
        &self,
        state: &mut ProgramState,
        hour: u32,
        now: DateTime<Utc>,
        outbound: &mut Vec<Outbound>,
    ) {
        state.theme = theme_for_hour(hour);
        state.theme_hour = hour;
        if let Some(guidance) = self.schedule.prompt_for(hour) {
            state.guidance = guidance.to_string();
        }
        info!(theme = %state.theme.title, hour, "Theme switched");
        outbound.push(Outbound::Instruction(prompt::theme_changed(&state.theme.title)));
        outbound.push(Outbound::Prompt(self.compose(state, now)));
        outbound.push(Outbound::ProgramUpdate(project(state)));
    }

    fn advance_locked(
        &self,
        state: &mut ProgramState,
        now: DateTime<Utc>,
        outbound: &mut Vec<Outbound>,
    ) {
        let from = state.segment;
        state.segment = from.next();
        state.next_tick = now + self.segment_duration;
        info!(from = %from, to = %state.segment, "Segment advanced");
        outbound.push(Outbound::Instruction(prompt::segment_changed(state.segment)));
        outbound.push(Outbound::Prompt(self.compose(state, now)));
        outbound.push(Outbound::ProgramUpdate(project(state)));
    }

    fn compose(&self, state: &ProgramState, now: DateTime<Utc>) -> String {
        prompt::compose(&PromptContext {
            theme: &state.theme.title,
            segment: state.segment,
            remaining: state.next_tick - now,
            queue_top: &state.queue.top,
            guidance: &state.guidance,
        })
    }

    fn send(&self, outbound: Vec<Outbound>) {
        for message in outbound {
            if self.dispatch.try_send(message).is_err() {
                warn!("Dispatch backlog full, dropping outbound message");
            }
        }
    }
}

fn project(state: &ProgramState) -> NowPlaying {
    NowPlaying {
        theme: state.theme.title.clone(),
        theme_color: state.theme.color.clone(),
        segment: state.segment.to_string(),
        next_tick_at: state.next_tick,
        // The Gateway owns the listener count and fills it in.
        listeners: 0,
        prompt: state.guidance.clone(),
        queue_count: state.queue.count,
        top_queue: state.queue.top.clone(),
    }
}

/// Deliver outbound messages in order. Failures are logged and dropped.
async fn run_dispatcher(mut rx: mpsc::Receiver<Outbound>, sink: Arc<dyn ProgramSink>) {
    while let Some(message) = rx.recv().await {
        let result = match &message {
            Outbound::Instruction(content) => sink.instruction(content).await,
            Outbound::Prompt(prompt) => sink.prompt(prompt).await,
            Outbound::ProgramUpdate(now) => sink.program_update(now).await,
        };
        if let Err(e) = result {
            warn!(%e, "Failed to deliver director message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

    #[derive(Default)]
    struct RecordingSink {
        sent: std::sync::Mutex<Vec<Outbound>>,
        fail: bool,
    }

    impl RecordingSink {
        fn record(&self, message: Outbound) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message);
            if self.fail {
                anyhow::bail!("host error 500: down");
            }
            Ok(())
        }

        async fn wait_for(&self, count: usize) -> Vec<Outbound> {
            for _ in 0..200 {
                let sent = self.sent.lock().unwrap().clone();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("sink never saw {count} messages");
        }
    }

    #[async_trait]
    impl ProgramSink for RecordingSink {
        async fn instruction(&self, content: &str) -> anyhow::Result<()> {
            self.record(Outbound::Instruction(content.to_string()))
        }

        async fn prompt(&self, prompt: &str) -> anyhow::Result<()> {
            self.record(Outbound::Prompt(prompt.to_string()))
        }

        async fn program_update(&self, now: &NowPlaying) -> anyhow::Result<()> {
            self.record(Outbound::ProgramUpdate(now.clone()))
        }
    }

    /// A local instant at `hour:minute:second` on a fixed day.
    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2025, 3, 10, hour, minute, second)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn director_at(now: DateTime<Utc>, sink: Arc<RecordingSink>) -> Arc<Director> {
        let (director, _dispatcher) =
            Director::new_at(now, Schedule::default(), Duration::from_secs(15 * 60), sink);
        director
    }

    #[tokio::test]
    async fn test_initial_state() {
        let sink = Arc::new(RecordingSink::default());
        let director = director_at(at(13, 20, 0), sink);
        let now = director.now_playing().await;
        assert_eq!(now.segment, "OP");
        assert_eq!(now.theme, theme_for_hour(13).title);
        assert_eq!(now.next_tick_at, at(13, 35, 0));
        assert_eq!(now.prompt, Schedule::default().prompt_for(13).unwrap());
        assert!(!director.status().await.is_running);
    }

    #[tokio::test]
    async fn test_advance_cycles_and_dispatches() {
        let sink = Arc::new(RecordingSink::default());
        let start = at(10, 0, 30);
        let director = director_at(start, sink.clone());

        let now = director.advance_at(at(10, 2, 0)).await;
        assert_eq!(now.segment, "TOPIC_A");
        assert!(now.next_tick_at > at(10, 2, 0));

        let sent = sink.wait_for(3).await;
        assert_eq!(
            sent[0],
            Outbound::Instruction("セグメントが「TOPIC_A」に変更されました。".into())
        );
        let Outbound::Prompt(prompt) = &sent[1] else {
            panic!("expected prompt, got {:?}", sent[1]);
        };
        assert!(prompt.contains("このセグメント：TOPIC_A（残り15:00）"));
        assert!(matches!(&sent[2], Outbound::ProgramUpdate(p) if p.segment == "TOPIC_A"));

        let mut segment = Segment::TopicA;
        for _ in 0..5 {
            let now = director.advance_at(at(10, 3, 0)).await;
            segment = segment.next();
            assert_eq!(now.segment, segment.as_str());
        }
        assert_eq!(segment, Segment::TopicA);
    }

    #[tokio::test]
    async fn test_advance_wraps_news_to_op() {
        let sink = Arc::new(RecordingSink::default());
        let director = director_at(at(10, 0, 30), sink);
        for _ in 0..4 {
            director.advance_at(at(10, 1, 0)).await;
        }
        assert_eq!(director.now_playing().await.segment, "NEWS");
        assert_eq!(director.advance_at(at(10, 1, 0)).await.segment, "OP");
    }

    #[tokio::test]
    async fn test_tick_advances_when_due() {
        let sink = Arc::new(RecordingSink::default());
        let director = director_at(at(10, 0, 30), sink);

        director.tick_at(at(10, 10, 0)).await;
        assert_eq!(director.now_playing().await.segment, "OP");

        director.tick_at(at(10, 15, 30)).await;
        let now = director.now_playing().await;
        assert_eq!(now.segment, "TOPIC_A");
        assert_eq!(now.next_tick_at, at(10, 30, 30));
        assert_eq!(director.status().await.last_update, at(10, 15, 30));
    }

    #[tokio::test]
    async fn test_theme_switch_once_per_hour_without_advancing() {
        let sink = Arc::new(RecordingSink::default());
        let director = director_at(at(10, 50, 0), sink.clone());

        // A jittered tick that misses the first five seconds still switches.
        director.tick_at(at(11, 0, 7)).await;
        let now = director.now_playing().await;
        assert_eq!(now.theme, theme_for_hour(11).title);
        assert_eq!(now.segment, "OP");
        assert_eq!(now.prompt, Schedule::default().prompt_for(11).unwrap());

        let sent = sink.wait_for(3).await;
        assert_eq!(
            sent[0],
            Outbound::Instruction(prompt::theme_changed(&theme_for_hour(11).title))
        );

        // Later ticks in the same hour do not switch again.
        director.tick_at(at(11, 0, 8)).await;
        director.tick_at(at(11, 1, 0)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_set_theme() {
        let sink = Arc::new(RecordingSink::default());
        let director = director_at(at(9, 0, 30), sink.clone());

        assert!(director.set_theme("存在しないテーマ").await.is_none());

        let now = director.set_theme("夜の物語").await.unwrap();
        assert_eq!(now.theme, "夜の物語");
        assert_eq!(now.theme_color, "#533483");
        assert_eq!(now.segment, "OP");
        let sent = sink.wait_for(1).await;
        assert_eq!(sent[0], Outbound::Instruction("テーマが「夜の物語」に変更されました。".into()));
    }

    #[tokio::test]
    async fn test_queue_snapshot_feeds_projection_and_prompt() {
        let sink = Arc::new(RecordingSink::default());
        let director = director_at(at(10, 0, 30), sink.clone());
        director
            .set_queue(QueueSnapshot {
                count: 2,
                top: vec!["夜景の話".into(), "dialogue".into()],
            })
            .await;

        let now = director.now_playing().await;
        assert_eq!(now.queue_count, 2);
        assert_eq!(now.top_queue, vec!["夜景の話", "dialogue"]);
        assert_eq!(now.listeners, 0);

        director.advance_at(at(10, 1, 0)).await;
        let sent = sink.wait_for(2).await;
        let Outbound::Prompt(prompt) = &sent[1] else {
            panic!("expected prompt");
        };
        assert!(prompt.contains("投稿キュー: 夜景の話、dialogue"));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stall() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let director = director_at(at(10, 0, 30), sink.clone());
        director.advance_at(at(10, 1, 0)).await;
        director.advance_at(at(10, 2, 0)).await;
        assert_eq!(director.now_playing().await.segment, "QANDA");
        assert_eq!(sink.wait_for(6).await.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sends_initial_prompt_and_runs() {
        let sink = Arc::new(RecordingSink::default());
        let (director, _dispatcher) = Director::new(
            Schedule::default(),
            Duration::from_secs(15 * 60),
            sink.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = director.start(cancel.clone());

        let sent = sink.wait_for(1).await;
        assert!(matches!(&sent[0], Outbound::Prompt(p) if p.contains("このセグメント：OP")));
        assert!(director.status().await.is_running);

        cancel.cancel();
        handle.await.unwrap();
        assert!(!director.status().await.is_running);
    }
}
