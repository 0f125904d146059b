//! Signal handling for clean shutdown.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wait for SIGINT or SIGTERM and cancel the given token.
///
/// Components spawn this once and select on the token everywhere else.
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
    token.cancel();
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
