//! In-process implementation of `PlatformStateStore`

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::PlatformStateStore;
use crate::error::Result;
use crate::models::{PlatformId, PlatformSyncState, SessionId};

/// Map-backed store; one ordered map of platforms per session.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    sessions: RwLock<HashMap<SessionId, BTreeMap<PlatformId, PlatformSyncState>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlatformStateStore for InMemoryStateStore {
    async fn get(
        &self,
        session_id: &SessionId,
        platform: &PlatformId,
    ) -> Result<Option<PlatformSyncState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .and_then(|platforms| platforms.get(platform))
            .cloned())
    }

    async fn put(&self, state: PlatformSyncState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(state.session_id)
            .or_default()
            .insert(state.platform.clone(), state);
        Ok(())
    }

    async fn remove(
        &self,
        session_id: &SessionId,
        platform: &PlatformId,
    ) -> Result<Option<PlatformSyncState>> {
        let mut sessions = self.sessions.write().await;
        let Some(platforms) = sessions.get_mut(session_id) else {
            return Ok(None);
        };
        let removed = platforms.remove(platform);
        if platforms.is_empty() {
            sessions.remove(session_id);
        }
        Ok(removed)
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<PlatformSyncState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|platforms| platforms.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: &SessionId) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).map_or(0, |platforms| platforms.len()))
    }
}
