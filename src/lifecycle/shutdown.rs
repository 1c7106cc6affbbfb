//! Shutdown coordination for the gateway.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Wraps a root cancellation token. The HTTP server, every request context and
/// every WebSocket session hold children of it.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for one subsystem; cancelled when shutdown triggers.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Await `task` for at most `grace`; returns false if it had to be abandoned.
    pub async fn drain<F>(grace: Duration, task: F) -> bool
    where
        F: std::future::Future,
    {
        match tokio::time::timeout(grace, task).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(grace_secs = grace.as_secs(), "Drain timed out, forcing exit");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_children() {
        let shutdown = Shutdown::new();
        let child = shutdown.token().child_token();
        assert!(!child.is_cancelled());

        shutdown.trigger();
        shutdown.trigger();
        child.cancelled().await;
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_grace() {
        let finished = Shutdown::drain(Duration::from_secs(1), async {}).await;
        assert!(finished);

        let hung = Shutdown::drain(Duration::from_secs(1), std::future::pending::<()>()).await;
        assert!(!hung);
    }
}
