//! Platform identity and per-platform playback state

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::SessionId;
use crate::error::Error;

/// Quality label used until a platform reports one.
pub const DEFAULT_QUALITY: &str = "auto";

/// Client family participating in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Web,
    Ios,
    Android,
}

impl PlatformKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

/// A platform within a session: client family plus an optional device id.
///
/// Textual form is `ios` or `ios:<device-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlatformId {
    kind: PlatformKind,
    device_id: Option<String>,
}

impl PlatformId {
    #[must_use]
    pub const fn new(kind: PlatformKind) -> Self {
        Self {
            kind,
            device_id: None,
        }
    }

    /// Platform bound to a specific device. Blank device ids are dropped.
    #[must_use]
    pub fn with_device(kind: PlatformKind, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into().trim().to_string();
        Self {
            kind,
            device_id: (!device_id.is_empty()).then_some(device_id),
        }
    }

    pub const fn kind(&self) -> PlatformKind {
        self.kind
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device_id {
            Some(device) => write!(f, "{}:{device}", self.kind.as_str()),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

impl FromStr for PlatformId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, device) = match s.trim().split_once(':') {
            Some((kind, device)) => (kind, Some(device.trim())),
            None => (s.trim(), None),
        };

        let kind = match kind.to_ascii_lowercase().as_str() {
            "web" => PlatformKind::Web,
            "ios" => PlatformKind::Ios,
            "android" => PlatformKind::Android,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown platform `{other}` (expected web, ios, or android)"
                )))
            }
        };

        match device {
            Some("") => Err(Error::InvalidInput(
                "platform device id must not be empty".to_string(),
            )),
            Some(device) => Ok(Self::with_device(kind, device)),
            None => Ok(Self::new(kind)),
        }
    }
}

impl TryFrom<String> for PlatformId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PlatformId> for String {
    fn from(value: PlatformId) -> Self {
        value.to_string()
    }
}

// Ordered by textual form so tie-breaks read naturally in logs and tests.
impl Ord for PlatformId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .as_str()
            .cmp(other.kind.as_str())
            .then_with(|| self.device_id.cmp(&other.device_id))
    }
}

impl PartialOrd for PlatformId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Playback values shared between platforms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Position in whole seconds
    pub position_secs: u64,
    /// Quality label, e.g. `720p`
    pub quality: String,
    pub is_playing: bool,
}

impl PlaybackState {
    #[must_use]
    pub fn new(position_secs: u64, quality: impl Into<String>, is_playing: bool) -> Self {
        Self {
            position_secs,
            quality: quality.into(),
            is_playing,
        }
    }

    /// Copy of this state at another position
    #[must_use]
    pub fn at_position(&self, position_secs: u64) -> Self {
        Self {
            position_secs,
            ..self.clone()
        }
    }
}

/// Lifecycle of a platform within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStatus {
    Registered,
    Synced,
    Conflicted,
    Stale,
}

/// Latest known state of one platform in one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSyncState {
    pub session_id: SessionId,
    pub platform: PlatformId,
    position_secs: u64,
    pub quality: String,
    pub is_playing: bool,
    /// Seconds of media the client reports as buffered ahead
    pub buffered_secs: u32,
    /// Last write of any kind (Unix ms)
    updated_at: i64,
    /// Last write originating from the client itself (Unix ms)
    last_reported_at: Option<i64>,
    pub status: PlatformStatus,
}

impl PlatformSyncState {
    /// Fresh registration seeded at `initial_position`
    #[must_use]
    pub fn registered(
        session_id: SessionId,
        platform: PlatformId,
        initial_position: u64,
        now: i64,
    ) -> Self {
        Self {
            session_id,
            platform,
            position_secs: initial_position,
            quality: DEFAULT_QUALITY.to_string(),
            is_playing: false,
            buffered_secs: 0,
            updated_at: now,
            last_reported_at: None,
            status: PlatformStatus::Registered,
        }
    }

    pub const fn position_secs(&self) -> u64 {
        self.position_secs
    }

    pub const fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub const fn last_reported_at(&self) -> Option<i64> {
        self.last_reported_at
    }

    /// Playback portion of this state
    #[must_use]
    pub fn playback(&self) -> PlaybackState {
        PlaybackState {
            position_secs: self.position_secs,
            quality: self.quality.clone(),
            is_playing: self.is_playing,
        }
    }

    /// Apply state reported by the client itself.
    pub fn apply_report(
        &mut self,
        playback: &PlaybackState,
        buffered_secs: Option<u32>,
        now: i64,
        status: PlatformStatus,
    ) {
        self.apply_playback(playback, now, status);
        if let Some(buffered) = buffered_secs {
            self.buffered_secs = buffered;
        }
        self.last_reported_at = Some(now);
    }

    /// Apply state pushed by the coordinator. Position and timestamp move together.
    pub fn apply_playback(&mut self, playback: &PlaybackState, now: i64, status: PlatformStatus) {
        self.position_secs = playback.position_secs;
        self.quality.clone_from(&playback.quality);
        self.is_playing = playback.is_playing;
        self.updated_at = now;
        self.status = status;
    }

    /// Whether the client reported within `window_ms` of `now`.
    pub const fn reported_within(&self, now: i64, window_ms: i64) -> bool {
        match self.last_reported_at {
            Some(at) => (now - at).abs() <= window_ms,
            None => false,
        }
    }
}
