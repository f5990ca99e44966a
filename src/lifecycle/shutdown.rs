//! Shutdown coordination for the gateway.

use std::future::Future;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Future resolving on `trigger` or Ctrl+C, whichever comes first.
    ///
    /// Subscribes eagerly, so a trigger sent after this call is never missed.
    /// Once the coordinator is dropped only Ctrl+C can resolve it.
    pub fn signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        let triggered = async move {
            if rx.recv().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        async move {
            tokio::select! {
                _ = triggered => tracing::info!("Shutdown triggered"),
                _ = ctrl_c() => tracing::info!("Shutdown signal received"),
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}
