//! Caller-side restart policy. The service itself never restarts the daemon;
//! this task does, when the daemon exits without being asked to.

use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use wallet_relay_connector::{ServiceEvent, WalletServiceHandle};

pub async fn restart_on_close(handle: WalletServiceHandle, delay: Duration) {
    let mut events = handle.subscribe();
    loop {
        match events.recv().await {
            Ok(ServiceEvent::Close {
                exit_code,
                expected: false,
            }) => {
                tracing::warn!(
                    exit_code = ?exit_code,
                    "Wallet daemon exited unexpectedly; restarting in {:?}",
                    delay
                );
                sleep(delay).await;
                handle.start().await;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Restart policy fell behind the event bus")
            }
            Err(RecvError::Closed) => break,
        }
    }
}
