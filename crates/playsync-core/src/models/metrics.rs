//! Per-platform sync counters

use serde::{Deserialize, Serialize};

/// Counters for one platform in one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetrics {
    pub total_sync_attempts: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    /// Latency of the most recent sync attempt
    pub last_latency_ms: u64,
    /// Fan-out deliveries that exhausted their retries
    pub delivery_failures: u64,
}

impl SyncMetrics {
    /// Observability hint only, never used for correctness.
    pub const fn is_healthy(&self) -> bool {
        self.successful_syncs > self.failed_syncs
    }
}
