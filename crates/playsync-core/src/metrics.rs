//! Per-platform sync bookkeeping.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::models::{PlatformId, SessionId, SyncMetrics};

/// Accumulates [`SyncMetrics`] keyed by session and platform.
#[derive(Debug, Default)]
pub struct SyncMetricsTracker {
    entries: RwLock<HashMap<(SessionId, PlatformId), SyncMetrics>>,
}

impl SyncMetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sync attempt and its outcome.
    pub async fn record_attempt(
        &self,
        session_id: SessionId,
        platform: &PlatformId,
        latency: Duration,
        success: bool,
    ) {
        let mut entries = self.entries.write().await;
        let metrics = entries.entry((session_id, platform.clone())).or_default();
        metrics.total_sync_attempts += 1;
        metrics.last_latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        if success {
            metrics.successful_syncs += 1;
        } else {
            metrics.failed_syncs += 1;
        }
    }

    /// Record a fan-out delivery that could not be completed.
    pub async fn record_delivery_failure(&self, session_id: SessionId, platform: &PlatformId) {
        let mut entries = self.entries.write().await;
        let metrics = entries.entry((session_id, platform.clone())).or_default();
        metrics.delivery_failures += 1;
        metrics.failed_syncs += 1;
    }

    /// Metrics for one platform; zeroed when nothing was recorded.
    pub async fn get(&self, session_id: SessionId, platform: &PlatformId) -> SyncMetrics {
        let entries = self.entries.read().await;
        entries
            .get(&(session_id, platform.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Every recorded platform in a session, ordered by platform.
    pub async fn session_metrics(&self, session_id: SessionId) -> Vec<(PlatformId, SyncMetrics)> {
        let entries = self.entries.read().await;
        let mut metrics: Vec<_> = entries
            .iter()
            .filter(|((session, _), _)| *session == session_id)
            .map(|((_, platform), metrics)| (platform.clone(), *metrics))
            .collect();
        metrics.sort_by(|a, b| a.0.cmp(&b.0));
        metrics
    }

    /// Drop everything recorded for a session.
    pub async fn forget_session(&self, session_id: SessionId) {
        self.entries
            .write()
            .await
            .retain(|(session, _), _| *session != session_id);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::PlatformKind;

    #[tokio::test]
    async fn unknown_platform_reads_as_zeroed() {
        let tracker = SyncMetricsTracker::new();
        let metrics = tracker
            .get(SessionId::new(), &PlatformId::new(PlatformKind::Web))
            .await;
        assert_eq!(metrics, SyncMetrics::default());
    }

    #[tokio::test]
    async fn records_counters_and_last_latency() {
        let tracker = SyncMetricsTracker::new();
        let session = SessionId::new();
        let ios = PlatformId::new(PlatformKind::Ios);

        tracker
            .record_attempt(session, &ios, Duration::from_millis(12), true)
            .await;
        tracker
            .record_attempt(session, &ios, Duration::from_millis(150), false)
            .await;
        tracker.record_delivery_failure(session, &ios).await;

        assert_eq!(
            tracker.get(session, &ios).await,
            SyncMetrics {
                total_sync_attempts: 2,
                successful_syncs: 1,
                failed_syncs: 2,
                last_latency_ms: 150,
                delivery_failures: 1,
            }
        );
    }

    #[tokio::test]
    async fn forget_session_only_drops_that_session() {
        let tracker = SyncMetricsTracker::new();
        let keep = SessionId::new();
        let drop = SessionId::new();
        let web = PlatformId::new(PlatformKind::Web);

        tracker.record_attempt(keep, &web, Duration::ZERO, true).await;
        tracker.record_attempt(drop, &web, Duration::ZERO, true).await;
        tracker.forget_session(drop).await;

        assert_eq!(tracker.session_metrics(keep).await.len(), 1);
        assert!(tracker.session_metrics(drop).await.is_empty());
    }
}
