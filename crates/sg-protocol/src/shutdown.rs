//! Shutdown checks for run loops

use std::future::Future;

/// True once `shutdown` has completed. Polls it once and never waits.
///
/// Run loops check this between iterations, so an iteration in progress
/// always finishes. Do not call it again after it returned true.
pub async fn shutdown_requested<F>(shutdown: &mut F) -> bool
where
    F: Future + Unpin,
{
    tokio::select! {
        biased;
        _ = shutdown => true,
        _ = std::future::ready(()) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_pending_shutdown() {
        let mut shutdown = std::pin::pin!(tokio::time::sleep(Duration::from_secs(60)));
        assert!(!shutdown_requested(&mut shutdown).await);
        assert!(!shutdown_requested(&mut shutdown).await);
    }

    #[tokio::test]
    async fn test_completed_shutdown() {
        let mut shutdown = std::pin::pin!(async {});
        assert!(shutdown_requested(&mut shutdown).await);
    }
}
