//! Folds process signals into the shim's shutdown token.

use orchard_shared::{OrchardError, OrchardResult};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first SIGTERM or SIGINT.
///
/// Handlers are registered before returning, so a signal delivered right after the call
/// is not lost. The watcher task ends when the token is cancelled by anyone.
pub fn shutdown_on_signal(token: CancellationToken) -> OrchardResult<()> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| OrchardError::Internal(format!("failed to install SIGTERM handler: {}", e)))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| OrchardError::Internal(format!("failed to install SIGINT handler: {}", e)))?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                token.cancel();
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });
    Ok(())
}
