//! Audit log entries

use serde::{Deserialize, Serialize};

use super::{ConflictId, PlatformId, SessionId};

/// What happened in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    PlatformRegistered,
    PlatformDeregistered,
    PositionUpdate,
    Conflict,
    Resolution,
    ForceSync,
    Suspended,
    Resumed,
    Termination,
}

/// Immutable entry in a session's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Per-session sequence number, starting at 1
    pub sequence: u64,
    pub session_id: SessionId,
    pub kind: SyncEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<ConflictId>,
    /// Unix ms
    pub occurred_at: i64,
}
