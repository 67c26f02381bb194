//! Interrupt handling and cancellable waits.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Spawns a task that cancels the returned token on SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the SIGTERM handler cannot be registered.
pub fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log::warn!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => log::warn!("Received SIGTERM, shutting down"),
            }
            trigger.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            log::warn!("Received SIGINT, shutting down");
            trigger.cancel();
        });
    }

    Ok(token)
}

/// Sleeps for `duration`. Returns false if cancelled first.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    sleep_until_or_cancel(cancel, Instant::now() + duration).await
}

/// Sleeps until `deadline`. Returns false if cancelled first.
pub async fn sleep_until_or_cancel(cancel: &CancellationToken, deadline: Instant) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep_until(deadline) => true,
    }
}
