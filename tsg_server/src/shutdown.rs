use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on SIGTERM or SIGINT.
///
/// The listener task ends on the first signal or when `token` is cancelled some
/// other way. Fails only if the signal handlers cannot be installed.
pub fn install_signal_handler(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT, initiating graceful shutdown");
                }
                _ = token.cancelled() => return,
            }
            token.cancel();
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        tracing::warn!(error = %e, "ctrl-c listener failed");
                    } else {
                        tracing::info!("received ctrl-c, initiating graceful shutdown");
                    }
                }
                _ = token.cancelled() => return,
            }
            token.cancel();
        }))
    }
}
