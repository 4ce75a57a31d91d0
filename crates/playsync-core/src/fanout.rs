//! Queues and delivery workers for advisory pushes.
//!
//! The coordinator enqueues without waiting. Each (session, platform) target
//! is pinned to one worker of a fixed pool, and a worker delivers its queue
//! one change at a time, so a platform never receives an older state after a
//! newer one.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::FanoutConfig;
use crate::metrics::SyncMetricsTracker;
use crate::notify::{Notifier, StateChange};

/// Handle used by the coordinator to enqueue notifications.
#[derive(Clone)]
pub struct FanoutDispatcher {
    lanes: Arc<[mpsc::Sender<StateChange>]>,
    metrics: Arc<SyncMetricsTracker>,
}

/// The delivery worker tasks behind a [`FanoutDispatcher`].
pub struct FanoutWorkers(Vec<JoinHandle<()>>);

impl FanoutWorkers {
    pub fn abort(&self) {
        for worker in &self.0 {
            worker.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FanoutDispatcher {
    /// Start the delivery workers on the current tokio runtime.
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        metrics: Arc<SyncMetricsTracker>,
        config: FanoutConfig,
    ) -> (Self, FanoutWorkers) {
        let count = config.workers.max(1);
        let mut lanes = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);
        for lane in 0..count {
            let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
            workers.push(tokio::spawn(run_worker(
                lane,
                receiver,
                notifier.clone(),
                metrics.clone(),
                config.clone(),
            )));
            lanes.push(sender);
        }
        (
            Self {
                lanes: lanes.into(),
                metrics,
            },
            FanoutWorkers(workers),
        )
    }

    fn lane_for(&self, change: &StateChange) -> &mpsc::Sender<StateChange> {
        let mut hasher = DefaultHasher::new();
        change.session_id.hash(&mut hasher);
        change.platform.hash(&mut hasher);
        let count = u64::try_from(self.lanes.len()).unwrap_or(1).max(1);
        let index = usize::try_from(hasher.finish() % count).unwrap_or(0);
        &self.lanes[index]
    }

    /// Enqueue a notification. Never waits for queue space.
    ///
    /// Returns `false` when the notification was dropped; the drop is
    /// recorded against the target platform.
    pub async fn dispatch(&self, change: StateChange) -> bool {
        match self.lane_for(&change).try_send(change) {
            Ok(()) => true,
            Err(error) => {
                let change = match error {
                    mpsc::error::TrySendError::Full(change) => {
                        tracing::warn!(
                            session = %change.session_id,
                            platform = %change.platform,
                            "Fan-out queue full; dropping notification"
                        );
                        change
                    }
                    mpsc::error::TrySendError::Closed(change) => {
                        tracing::warn!(
                            session = %change.session_id,
                            platform = %change.platform,
                            "Fan-out worker stopped; dropping notification"
                        );
                        change
                    }
                };
                self.metrics
                    .record_delivery_failure(change.session_id, &change.platform)
                    .await;
                false
            }
        }
    }
}

async fn run_worker(
    lane: usize,
    mut receiver: mpsc::Receiver<StateChange>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<SyncMetricsTracker>,
    config: FanoutConfig,
) {
    while let Some(change) = receiver.recv().await {
        deliver(&change, notifier.as_ref(), &metrics, &config).await;
    }
    tracing::debug!(lane, "Fan-out queue closed; delivery worker exiting");
}

async fn deliver(
    change: &StateChange,
    notifier: &dyn Notifier,
    metrics: &SyncMetricsTracker,
    config: &FanoutConfig,
) {
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match notifier.notify(change).await {
            Ok(()) => {
                tracing::trace!(
                    session = %change.session_id,
                    platform = %change.platform,
                    attempt,
                    "Delivered state change"
                );
                return;
            }
            Err(error) if attempt < max_attempts => {
                let backoff = config.backoff_for(attempt);
                tracing::debug!(
                    session = %change.session_id,
                    platform = %change.platform,
                    attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "Delivery failed, retrying: {error}"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(error) => {
                tracing::warn!(
                    session = %change.session_id,
                    platform = %change.platform,
                    attempts = max_attempts,
                    "Giving up on state change delivery: {error}"
                );
                metrics
                    .record_delivery_failure(change.session_id, &change.platform)
                    .await;
            }
        }
    }
}
