//! Gateway shared state.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, warn};

use radio24_core::config::Config;
use radio24_core::protocol::kinds;
use radio24_core::queue::PriorityQueue;
use radio24_core::submission::SubmissionStore;
use radio24_core::token::TokenMinter;
use radio24_providers::{Embedder, EphemeralIssuer};

use crate::hub::Hub;
use crate::peers::Peers;

/// How many queue previews ride along with `queue_update`.
pub const QUEUE_PREVIEW: usize = 3;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub hub: Hub,
    pub queue: Arc<PriorityQueue>,
    pub minter: TokenMinter,
    pub store: Arc<dyn SubmissionStore>,
    pub embedder: Arc<dyn Embedder>,
    pub ephemeral: Arc<dyn EphemeralIssuer>,
    pub peers: Peers,
    /// Bumped on every queue change; the Director forwarder follows it.
    queue_version: watch::Sender<u64>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        hub: Hub,
        store: Arc<dyn SubmissionStore>,
        embedder: Arc<dyn Embedder>,
        ephemeral: Arc<dyn EphemeralIssuer>,
    ) -> anyhow::Result<Self> {
        let minter = TokenMinter::new(&config.livekit.api_key, &config.livekit.api_secret);
        let peers = Peers::new(&config.peers)?;
        let queue = Arc::new(PriorityQueue::new());
        let (queue_version, changes) = watch::channel(0);
        tokio::spawn(forward_queue_snapshots(queue.clone(), peers.clone(), changes));
        Ok(Self {
            config,
            hub,
            queue,
            queue_version,
            minter,
            store,
            embedder,
            ephemeral,
            peers,
        })
    }

    /// Tell listeners and the Director that the queue changed.
    pub async fn queue_changed(&self) {
        let snapshot = self.queue.snapshot(QUEUE_PREVIEW).await;
        debug!(count = snapshot.count, "Queue changed");
        self.hub.broadcast(kinds::QUEUE_UPDATE, json!(snapshot));
        self.queue_version.send_modify(|version| *version += 1);
    }
}

/// Pushes queue snapshots to the Director one at a time. `changed()` marks
/// the version seen before the queue is read, so bursts collapse into one
/// post and the last post always carries the newest state.
async fn forward_queue_snapshots(
    queue: Arc<PriorityQueue>,
    peers: Peers,
    mut changes: watch::Receiver<u64>,
) {
    while changes.changed().await.is_ok() {
        let snapshot = queue.snapshot(QUEUE_PREVIEW).await;
        match peers.director_queue(&snapshot).await {
            Ok(reply) if !reply.status.is_success() => {
                warn!(status = %reply.status, "Director rejected queue snapshot");
            }
            Ok(_) => {}
            Err(e) => debug!(%e, "Director unreachable for queue snapshot"),
        }
    }
}
