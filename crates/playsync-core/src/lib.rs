//! playsync-core - Core engine for playsync
//!
//! This crate keeps playback of one video in step across a user's web, iOS,
//! and Android clients: sessions and platform registration, conflict
//! detection and resolution, fan-out of authoritative state, and per-platform
//! sync metrics. The HTTP surface lives in `playsync-api`.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod lookup;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod resolver;
pub mod session_manager;
pub mod store;
pub mod testing;
pub mod util;

pub use config::{FanoutConfig, SyncConfig};
pub use coordinator::{
    ForceSyncOutcome, ResolveRequest, ResolvedConflict, SyncOutcome, SyncRequest, SyncStatus,
};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{Error, Result};
pub use models::{PlatformId, PlatformKind, SessionId};
pub use notify::{BroadcastNotifier, Notifier, StateChange};
