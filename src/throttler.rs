use crate::config::ThrottleConfig;
use crate::delivery::{Deliver, Dispatcher};
use crate::error::ThrottlerResult;
use crate::key_throttle::KeyThrottle;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Per-key throttle registry.
///
/// Each distinct key (compared case-insensitively) gets its own independent
/// throttle state, created on first use and kept for the lifetime of the
/// registry. Share one instance between submitters, e.g. behind an `Arc`.
pub struct Throttler<T> {
    release_interval: Duration,
    dispatcher: Arc<Dispatcher<T>>,
    throttles: Mutex<HashMap<String, Arc<KeyThrottle<T>>>>,
}

impl<T: Send + 'static> Throttler<T> {
    /// Create a new throttler on the current Tokio runtime
    pub fn new<D>(config: ThrottleConfig, deliver: D) -> ThrottlerResult<Self>
    where
        D: Deliver<T>,
    {
        config.validate()?;
        let runtime = Handle::try_current()?;

        tracing::debug!(
            "Creating throttler with release interval {:?}",
            config.release_interval
        );

        Ok(Self {
            release_interval: config.release_interval,
            dispatcher: Arc::new(Dispatcher::new(Arc::new(deliver), runtime)),
            throttles: Mutex::new(HashMap::new()),
        })
    }

    /// Minimum spacing enforced between deliveries for one key
    pub fn release_interval(&self) -> Duration {
        self.release_interval
    }

    /// Submit an item for `key`.
    ///
    /// The item is delivered immediately if nothing was released for the key
    /// within the last release interval and nothing is pending. Otherwise it
    /// joins the pending batch, whose release is pushed back to one full
    /// interval after this submission.
    pub fn submit(&self, cancel: &CancellationToken, key: &str, item: T) {
        let throttle = self.throttle_for(key);
        throttle.submit(cancel, item);
    }

    /// Release every pending batch immediately. Returns the number of batches
    /// dispatched.
    pub fn flush_all(&self) -> usize {
        let mut flushed = 0;
        for throttle in self.snapshot() {
            if throttle.flush() {
                tracing::debug!(key = %throttle.key(), "Force-flushed pending batch");
                flushed += 1;
            }
        }

        if flushed > 0 {
            tracing::info!("Flushed {} pending batches", flushed);
        }
        flushed
    }

    /// Flush all pending batches and wait for every dispatched delivery to
    /// complete. The throttler keeps accepting submissions afterwards.
    pub async fn shutdown(&self) {
        self.flush_all();
        self.dispatcher.drain().await;
        tracing::info!("Throttler drained");
    }

    /// Number of items waiting in the pending batch for `key`
    pub fn pending_items(&self, key: &str) -> usize {
        let throttle = self.throttles.lock().get(&normalize_key(key)).cloned();
        throttle.map_or(0, |throttle| throttle.pending_len())
    }

    /// Get statistics about the throttler
    pub fn stats(&self) -> ThrottlerStats {
        let mut stats = ThrottlerStats {
            keys: 0,
            pending_keys: 0,
            pending_items: 0,
            in_flight_deliveries: self.dispatcher.in_flight(),
        };

        for throttle in self.snapshot() {
            let pending = throttle.pending_len();
            stats.keys += 1;
            if pending > 0 {
                stats.pending_keys += 1;
                stats.pending_items += pending;
            }
        }

        stats
    }

    fn throttle_for(&self, key: &str) -> Arc<KeyThrottle<T>> {
        let key = normalize_key(key);
        let mut throttles = self.throttles.lock();

        if let Some(throttle) = throttles.get(&key) {
            return Arc::clone(throttle);
        }

        tracing::debug!(key = %key, "Tracking new key");
        let throttle = Arc::new(KeyThrottle::new(
            key.clone(),
            self.release_interval,
            Arc::clone(&self.dispatcher),
        ));
        throttles.insert(key, Arc::clone(&throttle));
        throttle
    }

    fn snapshot(&self) -> Vec<Arc<KeyThrottle<T>>> {
        self.throttles.lock().values().cloned().collect()
    }
}

fn normalize_key(key: &str) -> String {
    key.to_lowercase()
}

/// Throttler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThrottlerStats {
    /// Distinct keys seen so far
    pub keys: usize,
    /// Keys currently accumulating a batch
    pub pending_keys: usize,
    /// Items waiting across all pending batches
    pub pending_items: usize,
    /// Deliveries dispatched but not yet finished
    pub in_flight_deliveries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Batch;
    use crate::error::ThrottlerError;

    fn noop(_cancel: CancellationToken, _batch: Batch<String>) -> std::future::Ready<anyhow::Result<()>> {
        std::future::ready(Ok(()))
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("User-42"), "user-42");
        assert_eq!(normalize_key("ÄBC"), "äbc");
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = Throttler::new(ThrottleConfig::default(), noop);
        assert!(matches!(result, Err(ThrottlerError::RuntimeUnavailable(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_zero_interval() {
        let result = Throttler::new(ThrottleConfig::new(Duration::ZERO), noop);
        assert!(matches!(result, Err(ThrottlerError::ConfigurationError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_state_per_normalized_key() {
        let throttler = Throttler::new(ThrottleConfig::default(), noop).unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(throttler.release_interval(), Duration::from_secs(10));

        throttler.submit(&cancel, "Orders", "a".to_string());
        throttler.submit(&cancel, "ORDERS", "b".to_string());
        throttler.submit(&cancel, "orders", "c".to_string());
        throttler.submit(&cancel, "billing", "d".to_string());

        let stats = throttler.stats();
        assert_eq!(stats.keys, 2);
        assert_eq!(stats.pending_keys, 1);
        assert_eq!(stats.pending_items, 2);
        assert_eq!(throttler.pending_items("oRdErS"), 2);
        assert_eq!(throttler.pending_items("unknown"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_counts_batches() {
        let throttler = Throttler::new(ThrottleConfig::default(), noop).unwrap();
        let cancel = CancellationToken::new();

        for key in ["a", "b", "c"] {
            throttler.submit(&cancel, key, "first".to_string());
        }
        throttler.submit(&cancel, "a", "second".to_string());
        throttler.submit(&cancel, "b", "second".to_string());

        assert_eq!(throttler.flush_all(), 2);
        assert_eq!(throttler.flush_all(), 0);
        assert_eq!(throttler.stats().pending_items, 0);
    }
}
