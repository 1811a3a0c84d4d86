//! Graceful-shutdown future shared by the three HTTP servers.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolves when `cancel` fires or the process receives Ctrl-C, whichever
/// comes first. If the Ctrl-C handler cannot be installed, only `cancel`
/// ends the wait.
pub async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(%e, "Failed to listen for Ctrl-C");
                cancel.cancelled().await;
            }
        }
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_ends_shutdown_wait() {
        let cancel = CancellationToken::new();
        let waiter = tokio::spawn(shutdown_signal(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
