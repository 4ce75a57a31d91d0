//! In-memory fakes for exercising the engine without clients or services.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::Result;
use crate::lookup::{IdentityDirectory, VideoCatalog};
use crate::notify::{DeliveryError, Notifier, StateChange};

/// Notifier that records deliveries and can fail the first N attempts.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<StateChange>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
    changed: Notify,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    /// Total notify calls, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn delivered(&self) -> Vec<StateChange> {
        self.delivered.lock().await.clone()
    }

    /// Wait until at least `count` deliveries happened or `timeout` passes.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<StateChange> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            {
                let delivered = self.delivered.lock().await;
                if delivered.len() >= count {
                    return delivered.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.delivered().await;
            }
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, change: &StateChange) -> std::result::Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(DeliveryError::Transport("simulated outage".to_string()));
        }
        self.delivered.lock().await.push(change.clone());
        self.changed.notify_waiters();
        Ok(())
    }
}

/// Lookup answering from fixed sets of known videos and users.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    videos: HashSet<String>,
    users: HashSet<String>,
}

impl StaticDirectory {
    #[must_use]
    pub fn with_video(mut self, video_id: &str) -> Self {
        self.videos.insert(video_id.to_string());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: &str) -> Self {
        self.users.insert(user_id.to_string());
        self
    }
}

#[async_trait]
impl VideoCatalog for StaticDirectory {
    async fn is_playable(&self, video_id: &str) -> Result<bool> {
        Ok(self.videos.contains(video_id))
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn user_exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.users.contains(user_id))
    }
}
