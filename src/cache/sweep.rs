//! Background TTL sweeper.
//!
//! # Responsibilities
//! - Periodically delete stale entries from the cache directory
//! - Stop on the process shutdown signal
//!
//! A crashed sweeper only loses future sweeps; entries left behind are still
//! detected as stale on lookup. For externally scheduled sweeps (cron), run the
//! binary with `--sweep`.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::cache::store::CacheStore;

pub struct Sweeper {
    store: CacheStore,
    ttl: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(store: CacheStore, ttl: Duration, interval: Duration) -> Self {
        Self { store, ttl, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            ttl_ms = self.ttl.as_millis() as u64,
            "Cache sweeper starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.store.sweep(self.ttl).await;
                    tracing::debug!(
                        scanned = report.scanned,
                        removed = report.removed,
                        leftovers = report.leftovers,
                        failed = report.failed,
                        "Cache sweep finished"
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
