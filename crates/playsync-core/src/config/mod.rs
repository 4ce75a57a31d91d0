//! Engine tuning knobs.
//!
//! Every value has a production default; the API binary overrides them from
//! the environment.

use std::time::Duration;

use crate::models::ResolutionStrategy;

/// Tunables shared by the session manager, coordinator, and fan-out worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Two reports closer than this in wall-clock time can conflict.
    pub conflict_window: Duration,
    /// Positions further apart than this (seconds) diverge.
    pub divergence_threshold_secs: u64,
    /// Critical-section budget for `SyncPosition` / `ResolveConflict`.
    pub latency_budget: Duration,
    /// Events and conflict records retained per session.
    pub history_limit: usize,
    /// A platform with no update for this long is marked stale.
    pub platform_idle_window: Duration,
    /// A session with no activity for this long is terminated by cleanup.
    pub session_idle_timeout: Duration,
    /// How long terminated sessions answer `SessionTerminated` before purge.
    pub terminated_retention: Duration,
    /// Period of the background cleanup task.
    pub cleanup_interval: Duration,
    /// Strategy for newly created sessions.
    pub default_strategy: ResolutionStrategy,
    /// Whether `SyncPosition` may register an unknown platform on the fly.
    pub implicit_registration: bool,
    pub fanout: FanoutConfig,
}

/// Delivery worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutConfig {
    /// Pending notifications per worker before new ones are dropped.
    pub queue_capacity: usize,
    /// Delivery workers; each (session, platform) target always uses the same one.
    pub workers: usize,
    /// Attempts per notification, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub initial_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_window: Duration::from_secs(2),
            divergence_threshold_secs: 5,
            latency_budget: Duration::from_millis(100),
            history_limit: 256,
            platform_idle_window: Duration::from_secs(60),
            session_idle_timeout: Duration::from_secs(30 * 60),
            terminated_retention: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(30),
            default_strategy: ResolutionStrategy::Latest,
            implicit_registration: true,
            fanout: FanoutConfig::default(),
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

impl SyncConfig {
    pub(crate) fn conflict_window_ms(&self) -> i64 {
        duration_ms(self.conflict_window)
    }
}

impl FanoutConfig {
    /// Backoff before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Milliseconds in `duration`, saturating at `i64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
