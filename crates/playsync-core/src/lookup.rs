//! Found/not-found lookups answered by services outside this crate.

use async_trait::async_trait;

use crate::error::Result;

/// Video metadata service: is this video known and playable?
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    async fn is_playable(&self, video_id: &str) -> Result<bool>;
}

/// Identity service: does this user exist?
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn user_exists(&self, user_id: &str) -> Result<bool>;
}

/// Accepts every video and user. Used when no external service is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl VideoCatalog for AllowAll {
    async fn is_playable(&self, _video_id: &str) -> Result<bool> {
        Ok(true)
    }
}

#[async_trait]
impl IdentityDirectory for AllowAll {
    async fn user_exists(&self, _user_id: &str) -> Result<bool> {
        Ok(true)
    }
}
