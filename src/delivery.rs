//! Delivery of released batches.
//!
//! A [`Deliver`] implementation receives every batch the throttler releases.
//! Each delivery runs as its own task, so a slow sink never holds up
//! submissions for the key it is serving.

use crate::error::ThrottlerError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Items released together for a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// Normalized (lower-cased) key
    pub key: String,
    /// Items in submission order
    pub items: Vec<T>,
    /// `true` for a leading-edge release of a single item, `false` for a
    /// trailing-edge release of an accumulated burst
    pub instant: bool,
}

/// Receiver of released batches.
///
/// Implemented for any `Fn(CancellationToken, Batch<T>) -> impl Future` so a
/// closure can be handed to [`Throttler::new`](crate::Throttler::new)
/// directly.
#[async_trait]
pub trait Deliver<T>: Send + Sync + 'static {
    async fn deliver(&self, cancel: CancellationToken, batch: Batch<T>) -> anyhow::Result<()>;
}

#[async_trait]
impl<T, F, Fut> Deliver<T> for F
where
    T: Send + 'static,
    F: Fn(CancellationToken, Batch<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn deliver(&self, cancel: CancellationToken, batch: Batch<T>) -> anyhow::Result<()> {
        self(cancel, batch).await
    }
}

/// Runs deliveries on the throttler's runtime and reports their failures.
pub(crate) struct Dispatcher<T> {
    deliver: Arc<dyn Deliver<T>>,
    runtime: Handle,
    tracker: TaskTracker,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub(crate) fn new(deliver: Arc<dyn Deliver<T>>, runtime: Handle) -> Self {
        Self {
            deliver,
            runtime,
            tracker: TaskTracker::new(),
        }
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Spawn a delivery task. Failures are logged, never retried.
    pub(crate) fn dispatch(&self, cancel: CancellationToken, key: &str, items: Vec<T>, instant: bool) {
        tracing::debug!(key, items = items.len(), instant, "Dispatching batch");

        let deliver = Arc::clone(&self.deliver);
        let batch = Batch {
            key: key.to_string(),
            items,
            instant,
        };

        self.tracker.spawn_on(
            async move {
                let key = batch.key.clone();
                if let Err(source) = deliver.deliver(cancel, batch).await {
                    let cause = format!("{:#}", source);
                    let err = ThrottlerError::DeliveryFailed {
                        key: key.clone(),
                        instant,
                        source,
                    };
                    tracing::error!(
                        key = %key,
                        instant,
                        error = %err,
                        cause = %cause,
                        "Could not execute throttle callback"
                    );
                }
            },
            &self.runtime,
        );
    }

    /// Wait for every delivery dispatched so far to finish.
    pub(crate) async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}
