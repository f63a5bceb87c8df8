//! Shutdown coordination
//!
//! A single [`Shutdown`] is owned by the process entry point. Every long-running
//! task holds a [`ShutdownListener`] and selects on [`ShutdownListener::recv`]
//! next to its sleeps and network waits.

use tokio::sync::watch;

/// Coordinator for graceful shutdown
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create a new, untriggered coordinator
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Get a listener for this coordinator
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been triggered
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of [`Shutdown`]
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Whether shutdown has been triggered
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is triggered.
    ///
    /// Returns immediately if it already was. A dropped [`Shutdown`] counts as
    /// triggered since nothing could signal it any more.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Wait for SIGINT, or SIGTERM on unix
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_recv_after_trigger() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();
        assert!(!listener.is_shutdown());

        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(listener.is_shutdown());

        tokio::time::timeout(Duration::from_secs(1), listener.recv())
            .await
            .expect("recv should return once triggered");
    }

    #[tokio::test]
    async fn test_listener_created_after_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut late = shutdown.listener();
        assert!(late.is_shutdown());
        tokio::time::timeout(Duration::from_secs(1), late.recv())
            .await
            .expect("late listener sees the trigger");
    }

    #[tokio::test]
    async fn test_recv_pending_until_triggered() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();

        let waited = tokio::time::timeout(Duration::from_millis(50), listener.recv()).await;
        assert!(waited.is_err());
    }
}
