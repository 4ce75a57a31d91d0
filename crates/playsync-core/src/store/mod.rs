//! Storage for per-platform sync state.
//!
//! Writes go through the session manager's per-session critical section;
//! implementations only need to be internally consistent for a single call.

mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{PlatformId, PlatformSyncState, SessionId};

pub use memory::InMemoryStateStore;

/// Trait for platform state storage operations
#[async_trait]
pub trait PlatformStateStore: Send + Sync {
    /// Get one platform's state
    async fn get(
        &self,
        session_id: &SessionId,
        platform: &PlatformId,
    ) -> Result<Option<PlatformSyncState>>;

    /// Insert or replace the state for `(state.session_id, state.platform)`
    async fn put(&self, state: PlatformSyncState) -> Result<()>;

    /// Remove one platform's state, returning it if present
    async fn remove(
        &self,
        session_id: &SessionId,
        platform: &PlatformId,
    ) -> Result<Option<PlatformSyncState>>;

    /// All states in a session, ordered by platform
    async fn list(&self, session_id: &SessionId) -> Result<Vec<PlatformSyncState>>;

    /// Remove every state in a session, returning how many were removed
    async fn clear(&self, session_id: &SessionId) -> Result<usize>;
}
