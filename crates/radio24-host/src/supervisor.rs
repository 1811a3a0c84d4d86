//! Keeps the host joined to the media server, reconnecting after a fixed
//! back-off for as long as the service runs.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use radio24_core::config::timeouts;
use radio24_media::MediaConnector;

use crate::mode::ModeController;

pub struct MediaSupervisor {
    connector: Arc<dyn MediaConnector>,
    mode: Arc<ModeController>,
    backoff: Duration,
}

impl MediaSupervisor {
    pub fn new(connector: Arc<dyn MediaConnector>, mode: Arc<ModeController>) -> Self {
        Self {
            connector,
            mode,
            backoff: timeouts::MEDIA_RECONNECT,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            match self.connector.connect().await {
                Ok(room) => match self.mode.attach_room(room.clone()).await {
                    Ok(()) => {
                        info!("Joined media room");
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                self.mode.detach_room().await;
                                room.close().await;
                                break;
                            }
                            _ = room.closed() => {
                                warn!("Media connection lost");
                                self.mode.detach_room().await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(%e, "Failed to publish tracks on new media room");
                        self.mode.detach_room().await;
                        room.close().await;
                    }
                },
                Err(e) => warn!(%e, "Media connection failed"),
            }

            info!(backoff_secs = self.backoff.as_secs(), "Reconnecting to media server");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
        info!("Media supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::tests::RecordingGateway;
    use async_trait::async_trait;
    use radio24_media::MediaRoom;
    use radio24_media::room::{HOST_TRACK, SilentRoom};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first connect, then hands out rooms the test can close.
    #[derive(Default)]
    struct FlakyConnector {
        attempts: AtomicUsize,
        rooms: std::sync::Mutex<Vec<Arc<SilentRoom>>>,
    }

    #[async_trait]
    impl MediaConnector for FlakyConnector {
        async fn connect(&self) -> anyhow::Result<Arc<dyn MediaRoom>> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connection refused");
            }
            let room = Arc::new(SilentRoom::new());
            self.rooms.lock().unwrap().push(room.clone());
            Ok(room)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_failure_and_loss() {
        let gateway = Arc::new(RecordingGateway::default());
        let (mode, _task) = ModeController::new(gateway, None, 0.5, timeouts::DIALOGUE);
        let connector = Arc::new(FlakyConnector::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            MediaSupervisor::new(connector.clone(), mode.clone()).run(cancel.clone()),
        );

        tokio::task::yield_now().await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(mode.host_writer().await.is_none());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert!(mode.host_writer().await.is_some());
        let first = connector.rooms.lock().unwrap()[0].clone();
        assert_eq!(first.published().await, vec![HOST_TRACK.to_string()]);

        first.close().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(mode.host_writer().await.is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert!(mode.host_writer().await.is_some());

        cancel.cancel();
        handle.await.unwrap();
        assert!(connector.rooms.lock().unwrap()[1].publish("x").await.is_err());
    }
}
