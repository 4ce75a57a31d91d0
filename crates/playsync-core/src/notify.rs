//! Outbound state-change notifications.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::models::{PlatformId, PlaybackState, SessionId};

/// Authoritative state pushed to one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub session_id: SessionId,
    pub platform: PlatformId,
    pub state: PlaybackState,
    /// When the coordinator committed the state (Unix ms)
    pub issued_at: i64,
}

/// Why a notification was not delivered
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no subscriber is listening for {0}")]
    NoSubscribers(PlatformId),
    #[error("transport failed: {0}")]
    Transport(String),
}

/// Advisory push to a client. Best effort; callers retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, change: &StateChange) -> Result<(), DeliveryError>;
}

type Topic = (SessionId, Option<PlatformId>);

/// Publishes changes on in-process broadcast channels, one per subscribed
/// session or (session, platform) pair.
///
/// A change counts as delivered only if a subscriber for its session or for
/// its exact platform received it.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    capacity: usize,
    topics: Arc<RwLock<HashMap<Topic, broadcast::Sender<StateChange>>>>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Receive changes for every platform of a session, or for one platform.
    pub async fn subscribe(
        &self,
        session_id: SessionId,
        platform: Option<PlatformId>,
    ) -> broadcast::Receiver<StateChange> {
        let mut topics = self.topics.write().await;
        topics.retain(|_, sender| sender.receiver_count() > 0);
        topics
            .entry((session_id, platform))
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, change: &StateChange) -> Result<(), DeliveryError> {
        let topics = self.topics.read().await;
        let mut delivered = false;
        for topic in [
            (change.session_id, None),
            (change.session_id, Some(change.platform.clone())),
        ] {
            if let Some(sender) = topics.get(&topic) {
                delivered |= sender.send(change.clone()).is_ok();
            }
        }
        if delivered {
            Ok(())
        } else {
            Err(DeliveryError::NoSubscribers(change.platform.clone()))
        }
    }
}
