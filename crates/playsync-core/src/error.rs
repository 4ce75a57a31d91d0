//! Error types for playsync-core

use thiserror::Error;

use crate::models::{PlatformId, SessionId};

/// Result type alias using playsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in playsync-core operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Unknown or expired session id
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Operation attempted after the session was terminated
    #[error("Session terminated: {0}")]
    SessionTerminated(SessionId),

    /// Operation attempted while the session is suspended
    #[error("Session suspended: {0}")]
    SessionSuspended(SessionId),

    /// Update for a platform that never registered
    #[error("Platform not registered: {0}")]
    PlatformNotRegistered(PlatformId),

    /// Authority strategy chosen without an authority platform
    #[error("Authority strategy requires an authority platform")]
    NoAuthorityDesignated,

    /// A manual conflict must be resolved before state can be fanned out
    #[error("Conflict {0} is awaiting manual resolution")]
    ConflictPendingManualResolution(crate::models::ConflictId),

    /// Resolution requested for a missing record or with inconsistent parameters
    #[error("Resolution not applicable: {0}")]
    ResolutionNotApplicable(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Video lookup returned not-found or not-playable
    #[error("Video not found: {0}")]
    VideoNotFound(String),

    /// Identity lookup returned not-found
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// State store error
    #[error("Store error: {0}")]
    Store(String),

    /// External lookup failed to answer
    #[error("Lookup error: {0}")]
    Lookup(String),
}

impl Error {
    /// Whether the session should count this failure against a platform's metrics.
    ///
    /// Failures for sessions that were never known are not recorded.
    pub const fn is_recordable(&self) -> bool {
        !matches!(self, Self::SessionNotFound(_))
    }
}
