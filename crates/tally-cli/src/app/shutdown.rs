//! Signal handling for a running count.
//!
//! The first Ctrl+C or SIGTERM cancels the run so batches in flight can
//! finish and partial results still print. A second signal means the user
//! does not want to wait.

use tally::CancellationToken;
use tokio::signal;

/// Exit status after a forced shutdown (128 + SIGINT).
pub const FORCED_EXIT_CODE: i32 = 130;

/// Resolves on the next Ctrl+C or SIGTERM with the signal's name.
pub async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => "Ctrl+C",
        () = terminate => "SIGTERM",
    }
}

/// Cancels `cancel` on the first signal and returns on the second.
pub async fn cancel_on_signals<S, Fut>(mut next_signal: S, cancel: CancellationToken)
where
    S: FnMut() -> Fut,
    Fut: Future<Output = &'static str>,
{
    let name = next_signal().await;
    tracing::info!("Received {name}, cancelling run and waiting for batches in flight");
    tracing::info!("Send another signal to exit immediately");
    cancel.cancel();

    let name = next_signal().await;
    tracing::warn!("Received {name} again, exiting without waiting for batches in flight");
}
