//! Promotes queued dialogue requests into dialogue mode.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radio24_core::queue::{ItemKind, ItemStatus};

use crate::gateway_client::GatewayLink;
use crate::mode::ModeController;

pub struct QueuePoller {
    gateway: Arc<dyn GatewayLink>,
    mode: Arc<ModeController>,
    period: Duration,
}

impl QueuePoller {
    pub fn new(gateway: Arc<dyn GatewayLink>, mode: Arc<ModeController>, period: Duration) -> Self {
        Self {
            gateway,
            mode,
            period,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(period_secs = self.period.as_secs(), "Queue poller started");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.check().await;
                }
            }
        }
        info!("Queue poller stopped");
    }

    /// One poll. Returns whether a dialogue was entered.
    pub async fn check(&self) -> bool {
        if self.mode.is_active() {
            return false;
        }
        let item = match self.gateway.peek().await {
            Ok(Some(item)) => item,
            Ok(None) => return false,
            Err(e) => {
                debug!(%e, "Queue peek failed");
                return false;
            }
        };
        if item.kind != ItemKind::Dialogue || item.status != ItemStatus::Queued {
            return false;
        }

        info!(id = %item.id, client_id = %item.user_id, "Dialogue request at head of queue");
        match self.gateway.dequeue(&item.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %item.id, "Dialogue request already taken");
                return false;
            }
            Err(e) => {
                warn!(%e, id = %item.id, "Failed to dequeue dialogue request");
                return false;
            }
        }

        match self.mode.enter(&item.id, &item.user_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%e, id = %item.id, "Could not start dialogue");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::tests::RecordingGateway;
    use radio24_core::config::timeouts;
    use radio24_core::queue::QueueItem;
    use radio24_media::room::SilentRoom;

    async fn rig() -> (QueuePoller, Arc<ModeController>, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let (mode, task) = ModeController::new(gateway.clone(), None, 0.5, timeouts::DIALOGUE);
        tokio::spawn(task.run(mode.clone(), CancellationToken::new()));
        mode.attach_room(Arc::new(SilentRoom::new())).await.unwrap();
        let poller = QueuePoller::new(gateway.clone(), mode.clone(), Duration::from_secs(5));
        (poller, mode, gateway)
    }

    #[tokio::test]
    async fn test_promotes_dialogue_request() {
        let (poller, mode, gateway) = rig().await;
        gateway
            .queue
            .lock()
            .unwrap()
            .push(QueueItem::new("dialogue_1", "alice", ItemKind::Dialogue));

        assert!(poller.check().await);
        assert!(mode.is_active());
        assert!(gateway.queue.lock().unwrap().is_empty());
        let (kind, data) = gateway.broadcasts.lock().unwrap()[0].clone();
        assert_eq!(kind, "dialogue_ready");
        assert_eq!(data["client_id"], "alice");

        // Already in dialogue: nothing else is promoted.
        gateway
            .queue
            .lock()
            .unwrap()
            .push(QueueItem::new("dialogue_2", "bob", ItemKind::Dialogue));
        assert!(!poller.check().await);
        assert_eq!(gateway.queue.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ignores_other_items() {
        let (poller, mode, gateway) = rig().await;
        gateway
            .queue
            .lock()
            .unwrap()
            .push(QueueItem::new("ptt_1", "alice", ItemKind::Text));
        assert!(!poller.check().await);
        assert!(!mode.is_active());
        assert_eq!(gateway.queue.lock().unwrap().len(), 1);

        gateway.queue.lock().unwrap().clear();
        assert!(!poller.check().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_period() {
        let (poller, mode, gateway) = rig().await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        gateway
            .queue
            .lock()
            .unwrap()
            .push(QueueItem::new("dialogue_1", "alice", ItemKind::Dialogue));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!mode.is_active());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(mode.is_active());

        cancel.cancel();
        handle.await.unwrap();
    }
}
