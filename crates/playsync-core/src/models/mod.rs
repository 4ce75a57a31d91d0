//! Data models for playsync

mod conflict;
mod event;
mod ids;
mod metrics;
mod platform;
mod session;

pub use conflict::{ConflictRecord, ResolutionStrategy};
pub use event::{SyncEvent, SyncEventKind};
pub use ids::{ConflictId, SessionId};
pub use metrics::SyncMetrics;
pub use platform::{
    PlatformId, PlatformKind, PlatformStatus, PlatformSyncState, PlaybackState, DEFAULT_QUALITY,
};
pub use session::{EventEntry, SessionStatus, SyncSession};
