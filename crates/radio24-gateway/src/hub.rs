//! Listener fan-out hub.
//!
//! One task owns the session table. Registrations and broadcasts reach it over
//! channels; each broadcast is serialized once and offered to every session's
//! bounded outgoing buffer. A session whose buffer is full is evicted on the
//! spot, so one slow listener never stalls the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radio24_core::protocol::BroadcastMessage;

/// Per-session outgoing buffer.
pub const SESSION_BUFFER: usize = 256;
/// Pending broadcasts awaiting fan-out.
pub const BROADCAST_BUFFER: usize = 1024;

pub type SessionId = u64;

enum Control {
    Register {
        id: SessionId,
        outbound: mpsc::Sender<Arc<str>>,
    },
    Unregister {
        id: SessionId,
    },
}

/// A registered listener: its id and the receiving end of its buffer. The
/// receiver yields `None` once the hub has evicted the session.
pub struct Session {
    pub id: SessionId,
    pub outbound: mpsc::Receiver<Arc<str>>,
}

/// Cloneable handle to the hub task.
#[derive(Clone)]
pub struct Hub {
    control: mpsc::UnboundedSender<Control>,
    broadcasts: mpsc::Sender<BroadcastMessage>,
    clients: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

/// The single owner of the session table. Drive it with [`HubTask::run`].
pub struct HubTask {
    control: mpsc::UnboundedReceiver<Control>,
    broadcasts: mpsc::Receiver<BroadcastMessage>,
    clients: Arc<AtomicUsize>,
    sessions: HashMap<SessionId, mpsc::Sender<Arc<str>>>,
}

impl Hub {
    pub fn new() -> (Self, HubTask) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_BUFFER);
        let clients = Arc::new(AtomicUsize::new(0));
        let hub = Self {
            control: control_tx,
            broadcasts: broadcast_tx,
            clients: clients.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let task = HubTask {
            control: control_rx,
            broadcasts: broadcast_rx,
            clients,
            sessions: HashMap::new(),
        };
        (hub, task)
    }

    /// Create a hub and run it until `cancel` fires.
    pub fn spawn(cancel: CancellationToken) -> Self {
        let (hub, task) = Self::new();
        tokio::spawn(task.run(cancel));
        hub
    }

    pub fn register(&self) -> Session {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        if self.control.send(Control::Register { id, outbound: tx }).is_err() {
            warn!(session = id, "Hub is not running, session will never receive");
        }
        Session { id, outbound: rx }
    }

    pub fn unregister(&self, id: SessionId) {
        let _ = self.control.send(Control::Unregister { id });
    }

    /// Queue a broadcast. Returns `false` when the broadcast channel is full
    /// and the message was dropped.
    pub fn broadcast(&self, kind: &str, data: serde_json::Value) -> bool {
        self.publish(BroadcastMessage::new(kind, data))
    }

    pub fn publish(&self, message: BroadcastMessage) -> bool {
        match self.broadcasts.try_send(message) {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                crate::metrics::record_broadcast();
                true
            }
            Err(TrySendError::Full(message)) => {
                warn!(kind = %message.kind, "Broadcast channel full, dropping message");
                #[cfg(feature = "metrics")]
                crate::metrics::record_broadcast_dropped();
                false
            }
            Err(TrySendError::Closed(message)) => {
                warn!(kind = %message.kind, "Hub stopped, dropping message");
                false
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

impl HubTask {
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Fan-out hub started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(control) = self.control.recv() => self.apply(control),
                Some(message) = self.broadcasts.recv() => self.fan_out(&message),
                else => break,
            }
        }
        self.sessions.clear();
        self.sync_count();
        info!("Fan-out hub stopped");
    }

    fn apply(&mut self, control: Control) {
        match control {
            Control::Register { id, outbound } => {
                self.sessions.insert(id, outbound);
                debug!(session = id, "Listener registered");
            }
            Control::Unregister { id } => {
                if self.sessions.remove(&id).is_some() {
                    debug!(session = id, "Listener unregistered");
                }
            }
        }
        self.sync_count();
    }

    fn fan_out(&mut self, message: &BroadcastMessage) {
        let frame: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(%e, kind = %message.kind, "Failed to serialize broadcast");
                return;
            }
        };

        let mut evicted = Vec::new();
        for (id, outbound) in &self.sessions {
            match outbound.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(session = id, "Listener too slow, evicting");
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => evicted.push(*id),
            }
        }
        if !evicted.is_empty() {
            for id in &evicted {
                self.sessions.remove(id);
            }
            #[cfg(feature = "metrics")]
            crate::metrics::record_evictions(evicted.len());
            self.sync_count();
        }
        debug!(kind = %message.kind, sent = self.sessions.len(), "Broadcast delivered");
    }

    fn sync_count(&self) {
        self.clients.store(self.sessions.len(), Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        crate::metrics::set_listeners(self.sessions.len());
    }
}
