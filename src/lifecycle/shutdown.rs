//! Shutdown coordination for the proxy.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::net::connection::ConnectionTracker;

/// Coordinator for graceful shutdown.
///
/// Long-running tasks (accept loop, cache sweeper) subscribe to a broadcast
/// channel and exit when it fires.
#[derive(Debug, Clone)]
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

    /// Trigger shutdown once an OS termination signal arrives.
    pub fn trigger_on_signal(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            crate::lifecycle::signals::terminate().await;
            this.trigger();
        });
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for open connections to finish, giving up after `deadline`.
///
/// Returns `true` if every connection drained in time.
pub async fn drain(tracker: &ConnectionTracker, deadline: Duration) -> bool {
    let remaining = tracker.active_count();
    if remaining == 0 {
        return true;
    }
    tracing::info!(connections = remaining, "Draining open connections");

    match tokio::time::timeout(deadline, tracker.wait_for_idle()).await {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!(
                connections = tracker.active_count(),
                "Drain deadline reached, closing remaining connections"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_trigger() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.clone().subscribe();
        shutdown.trigger();
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[tokio::test]
    async fn drain_waits_for_guards() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });
        assert!(drain(&tracker, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn drain_gives_up_at_deadline() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();
        assert!(!drain(&tracker, Duration::from_millis(50)).await);
    }
}
