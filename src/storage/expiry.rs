//! Background Expiry Sweeper
//!
//! Lookups already drop expired items when they trip over them ("lazy"
//! expiry). Items that are never looked up again would otherwise keep their
//! memory, so this task periodically walks the buckets and reaps them.
//!
//! The sweep interval adapts to the expiry rate: when a large share of items
//! turned out to be expired the sweeper runs more often, and when nothing
//! expired it backs off.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Base interval between sweeps (default: 1s)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 100ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 10s)
    pub max_interval: Duration,

    /// If this fraction of items were expired, speed up sweeping
    pub speedup_threshold: f64,

    /// If this fraction of items were expired, slow down sweeping
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// Handle to the running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn start(store: Arc<Store>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(store, config, shutdown_rx));

        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the sweeper. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        debug!("Background expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    store: Arc<Store>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let items_before = store.len();

        // Bucket walks take locks; keep them off the async worker threads
        let sweep_store = Arc::clone(&store);
        let expired = match tokio::task::spawn_blocking(move || sweep_store.cleanup_expired()).await
        {
            Ok(expired) => expired,
            Err(e) => {
                debug!(error = %e, "Expiry sweep did not complete");
                continue;
            }
        };

        if items_before > 0 {
            let expiry_rate = expired as f64 / items_before as f64;

            if expiry_rate > config.speedup_threshold {
                current_interval = (current_interval / 2).max(config.min_interval);
                debug!(
                    expired = expired,
                    rate = %format!("{:.2}%", expiry_rate * 100.0),
                    new_interval_ms = current_interval.as_millis(),
                    "High expiry rate, speeding up sweeper"
                );
            } else if expiry_rate < config.slowdown_threshold && expired == 0 {
                current_interval = (current_interval * 2).min(config.max_interval);
                trace!(
                    new_interval_ms = current_interval.as_millis(),
                    "Low expiry rate, slowing down sweeper"
                );
            }
        }

        if expired > 0 {
            debug!(
                expired = expired,
                items_remaining = store.len(),
                "Expired items reaped"
            );
        }
    }
}

/// Starts the expiry sweeper with default configuration.
pub fn start_expiry_sweeper(store: Arc<Store>) -> ExpirySweeper {
    ExpirySweeper::start(store, ExpiryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Expiry;
    use std::time::Instant;

    fn fast_config() -> ExpiryConfig {
        ExpiryConfig {
            base_interval: Duration::from_millis(10),
            min_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sweeper_reaps_expired_items() {
        let store = Arc::new(Store::default());
        let short = Expiry::At(Instant::now() + Duration::from_millis(50));

        for i in 0..10 {
            store.insert(format!("key{}", i).as_bytes(), 0, short, b"value");
        }
        store.insert(b"persistent", 0, Expiry::Never, b"value");
        assert_eq!(store.len(), 11);

        let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast_config());

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(store.len(), 1);
        assert!(store.recency().is_empty());
        assert!(store.find(b"persistent", false).is_some());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let store = Arc::new(Store::default());

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast_config());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        store.insert(b"key", 0, Expiry::At(Instant::now()), b"value");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Nobody reaped it; the lookup does
        assert_eq!(store.len(), 1);
        assert!(store.find(b"key", false).is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_adaptive_interval() {
        let store = Arc::new(Store::default());
        let short = Expiry::At(Instant::now() + Duration::from_millis(20));

        for i in 0..1000 {
            store.insert(format!("key{}", i).as_bytes(), 0, short, b"value");
        }

        let config = ExpiryConfig {
            base_interval: Duration::from_millis(50),
            min_interval: Duration::from_millis(5),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.1,
            slowdown_threshold: 0.01,
        };
        let _sweeper = ExpirySweeper::start(Arc::clone(&store), config);

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(store.len(), 0);
    }
}
