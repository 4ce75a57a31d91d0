//! Sync session model

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{
    ConflictId, PlatformId, PlaybackState, ResolutionStrategy, SessionId, SyncEvent,
    SyncEventKind,
};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Suspended,
    Terminated,
}

/// One user's cross-platform watch of one video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: SessionId,
    pub video_id: String,
    pub user_id: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last mutation of any kind (Unix ms)
    pub last_activity_at: i64,
    pub status: SessionStatus,
    /// Strategy applied when `SyncPosition` detects a conflict
    pub default_strategy: ResolutionStrategy,
    pub authority: Option<PlatformId>,
    /// Last state the coordinator committed as authoritative
    pub authoritative: Option<PlaybackState>,
    /// Timestamp of the last committed sync or resolution (Unix ms)
    pub last_sync_at: Option<i64>,
    pub conflict_count: u64,
    pub total_sync_events: u64,
    /// Most recent events, oldest first
    pub history: VecDeque<SyncEvent>,
}

impl SyncSession {
    #[must_use]
    pub fn new(
        video_id: impl Into<String>,
        user_id: impl Into<String>,
        default_strategy: ResolutionStrategy,
        now: i64,
    ) -> Self {
        Self {
            id: SessionId::new(),
            video_id: video_id.into(),
            user_id: user_id.into(),
            created_at: now,
            last_activity_at: now,
            status: SessionStatus::Active,
            default_strategy,
            authority: None,
            authoritative: None,
            last_sync_at: None,
            conflict_count: 0,
            total_sync_events: 0,
            history: VecDeque::new(),
        }
    }

    pub const fn is_terminated(&self) -> bool {
        matches!(self.status, SessionStatus::Terminated)
    }

    /// Append an event, evicting the oldest once `limit` is reached.
    pub fn push_event(&mut self, entry: EventEntry, now: i64, limit: usize) -> &SyncEvent {
        self.total_sync_events += 1;
        self.last_activity_at = now;
        while self.history.len() >= limit.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(SyncEvent {
            sequence: self.total_sync_events,
            session_id: self.id,
            kind: entry.kind,
            platform: entry.platform,
            position_secs: entry.position_secs,
            conflict_id: entry.conflict_id,
            occurred_at: now,
        });
        &self.history[self.history.len() - 1]
    }
}

/// Fields of a [`SyncEvent`] supplied by the caller
#[derive(Debug, Clone)]
pub struct EventEntry {
    pub kind: SyncEventKind,
    pub platform: Option<PlatformId>,
    pub position_secs: Option<u64>,
    pub conflict_id: Option<ConflictId>,
}

impl EventEntry {
    pub const fn new(kind: SyncEventKind) -> Self {
        Self {
            kind,
            platform: None,
            position_secs: None,
            conflict_id: None,
        }
    }

    #[must_use]
    pub fn platform(mut self, platform: &PlatformId) -> Self {
        self.platform = Some(platform.clone());
        self
    }

    #[must_use]
    pub const fn position(mut self, position_secs: u64) -> Self {
        self.position_secs = Some(position_secs);
        self
    }

    #[must_use]
    pub const fn conflict(mut self, conflict_id: ConflictId) -> Self {
        self.conflict_id = Some(conflict_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new_is_active() {
        let session = SyncSession::new("v1", "u1", ResolutionStrategy::Latest, 10);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.created_at, 10);
        assert!(session.history.is_empty());
    }

    #[test]
    fn test_history_is_bounded_and_ordered() {
        let mut session = SyncSession::new("v1", "u1", ResolutionStrategy::Latest, 0);
        for i in 0..5 {
            session.push_event(
                EventEntry::new(SyncEventKind::PositionUpdate).position(i),
                i64::try_from(i).unwrap(),
                3,
            );
        }

        assert_eq!(session.total_sync_events, 5);
        let sequences: Vec<u64> = session.history.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
        assert_eq!(session.last_activity_at, 4);
    }
}
