//! `ws/broadcast` connection lifecycle: register with the hub, then run a
//! reader pump and a writer pump until either side gives up.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hub::Hub;

/// Largest frame a listener may send.
pub const MAX_READ_BYTES: usize = 512;
/// Without a pong inside this window the listener is dropped.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Keepalive ping cadence; shorter than the read deadline.
pub const PING_INTERVAL: Duration = Duration::from_secs(54);
/// Bound on a single socket write.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Serve one listener until it disconnects, stalls or is evicted.
pub async fn handle_broadcast_connection(hub: Hub, ws: WebSocket) {
    let session = hub.register();
    let session_id = session.id;
    info!(session = session_id, "Listener connected");

    let (ws_tx, ws_rx) = ws.split();
    let done = CancellationToken::new();

    let writer = tokio::spawn(write_pump(ws_tx, session.outbound, done.clone()));
    read_pump(ws_rx, done.clone(), session_id).await;

    done.cancel();
    hub.unregister(session_id);
    let _ = writer.await;
    info!(session = session_id, "Listener disconnected");
}

async fn read_pump(mut ws_rx: SplitStream<WebSocket>, done: CancellationToken, session: u64) {
    let mut deadline = Instant::now() + READ_DEADLINE;
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                debug!(session, "Read deadline passed");
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Pong(_))) => {
                    deadline = Instant::now() + READ_DEADLINE;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session, %e, "Listener read error");
                    break;
                }
            }
        }
    }
    done.cancel();
}

async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    done: CancellationToken,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    loop {
        let frame = tokio::select! {
            _ = done.cancelled() => break,
            _ = ping.tick() => Message::Ping(Vec::<u8>::new().into()),
            next = outbound.recv() => match next {
                Some(first) => Message::Text(coalesce(first, &mut outbound).into()),
                None => {
                    // Evicted by the hub.
                    let _ = tokio::time::timeout(WRITE_DEADLINE, ws_tx.send(Message::Close(None))).await;
                    break;
                }
            },
        };
        match tokio::time::timeout(WRITE_DEADLINE, ws_tx.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(%e, "Listener write failed");
                break;
            }
            Err(_) => {
                warn!("Listener write timed out");
                break;
            }
        }
    }
    done.cancel();
}

/// Join the first message with everything already queued, newline separated.
fn coalesce(first: Arc<str>, outbound: &mut mpsc::Receiver<Arc<str>>) -> String {
    let mut text = String::from(&*first);
    while let Ok(next) = outbound.try_recv() {
        text.push('\n');
        text.push_str(&next);
    }
    text
}
