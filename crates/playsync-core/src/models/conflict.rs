//! Conflict records and resolution strategies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ConflictId, PlatformId, PlatformSyncState, PlaybackState, SessionId};
use crate::error::Error;

/// Policy used to pick one authoritative state from conflicting ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Most recent update wins
    #[default]
    Latest,
    /// A designated platform wins
    Authority,
    /// Mean position, other fields from `Latest`
    Average,
    /// Caller supplies the result
    Manual,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Authority => "authority",
            Self::Average => "average",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "authority" => Ok(Self::Authority),
            "average" => Ok(Self::Average),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy `{other}`"
            ))),
        }
    }
}

/// A detected divergence between platforms and how it was settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub session_id: SessionId,
    /// Platform whose update exposed the conflict
    pub triggered_by: PlatformId,
    /// Snapshot of every state involved, including the triggering report
    pub states: Vec<PlatformSyncState>,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
    pub strategy: ResolutionStrategy,
    /// Authority consulted, when the strategy needed one
    pub authority: Option<PlatformId>,
    /// Authoritative result; `None` while awaiting manual resolution
    pub resolved: Option<PlaybackState>,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
}

impl ConflictRecord {
    pub const fn is_pending(&self) -> bool {
        self.resolved.is_none()
    }

    pub fn platforms(&self) -> impl Iterator<Item = &PlatformId> {
        self.states.iter().map(|state| &state.platform)
    }
}
