use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Detects signals sent to the process and turns them into a cancellation. Everything that can
/// block for long (the overlay especially) watches the token, so a signal always ends with the
/// screen unlocked.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Can't listen for SIGTERM {e:?}");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        },
        _ = terminate => {
            info!("Terminated, shutting down");
        },
        _ = cancelation.cancelled() => {
            return;
        }
    };
    cancelation.cancel();
}
