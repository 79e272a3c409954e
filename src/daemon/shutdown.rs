use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Waits for Ctrl-C (or SIGTERM on unix) and cancels `cancelation`. Returns early if something
/// else cancels it first.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Interrupted, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl-C, shutting down: {e:?}"),
            }
        },
        _ = terminate() => info!("Terminated, shutting down"),
        _ = cancelation.cancelled() => info!("Shutdown requested"),
    };
    cancelation.cancel();
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to listen for SIGTERM: {e:?}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use super::detect_shutdown;

    #[tokio::test]
    async fn test_returns_when_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let detector = tokio::spawn(detect_shutdown(token.clone()));
        token.cancel();
        timeout(Duration::from_secs(5), detector)
            .await
            .unwrap()
            .unwrap();
    }
}
