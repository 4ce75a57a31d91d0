//! Session lifecycle and platform registration.
//!
//! Every session carries its own `RwLock`; all mutations of a session (here
//! and in the coordinator) hold its write guard for the whole
//! read-check-write sequence, so updates to one session are serialized while
//! different sessions proceed in parallel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::{duration_ms, SyncConfig};
use crate::error::{Error, Result};
use crate::lookup::{IdentityDirectory, VideoCatalog};
use crate::metrics::SyncMetricsTracker;
use crate::models::{
    ConflictId, ConflictRecord, EventEntry, PlatformId, PlatformStatus, PlatformSyncState,
    ResolutionStrategy, SessionId, SessionStatus, SyncEventKind, SyncSession,
};
use crate::store::PlatformStateStore;
use crate::util::{compact_text, required_text};

/// Mutable state guarded by a session's lock.
#[derive(Debug)]
pub(crate) struct SessionRecord {
    pub session: SyncSession,
    /// Most recent conflict records, oldest first
    pub conflicts: VecDeque<ConflictRecord>,
    /// Manual conflict awaiting a caller-supplied value
    pub pending_conflict: Option<ConflictId>,
    pub terminated_at: Option<i64>,
}

impl SessionRecord {
    pub fn ensure_active(&self) -> Result<()> {
        match self.session.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Suspended => Err(Error::SessionSuspended(self.session.id)),
            SessionStatus::Terminated => Err(Error::SessionTerminated(self.session.id)),
        }
    }

    pub fn push_conflict(&mut self, conflict: ConflictRecord, limit: usize) {
        while self.conflicts.len() >= limit.max(1) {
            self.conflicts.pop_front();
        }
        self.conflicts.push_back(conflict);
    }
}

pub(crate) struct SessionHandle {
    pub record: RwLock<SessionRecord>,
}

/// Counts of sessions by lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub active: usize,
    pub suspended: usize,
    pub terminated: usize,
}

/// What one cleanup pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub platforms_marked_stale: usize,
    pub sessions_suspended: usize,
    pub sessions_terminated: usize,
    pub sessions_purged: usize,
}

/// Owns sessions, their platform registrations, and the state store.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    store: Arc<dyn PlatformStateStore>,
    metrics: Arc<SyncMetricsTracker>,
    clock: Arc<dyn Clock>,
    catalog: Arc<dyn VideoCatalog>,
    identity: Arc<dyn IdentityDirectory>,
    config: Arc<SyncConfig>,
}

impl SessionManager {
    pub fn new(
        config: Arc<SyncConfig>,
        store: Arc<dyn PlatformStateStore>,
        metrics: Arc<SyncMetricsTracker>,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn VideoCatalog>,
        identity: Arc<dyn IdentityDirectory>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            metrics,
            clock,
            catalog,
            identity,
            config,
        }
    }

    pub(crate) fn store(&self) -> &dyn PlatformStateStore {
        self.store.as_ref()
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub(crate) async fn handle(&self, session_id: &SessionId) -> Result<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(Error::SessionNotFound(*session_id))
    }

    /// Start a new session for `user_id` watching `video_id`.
    pub async fn create_session(&self, video_id: &str, user_id: &str) -> Result<SyncSession> {
        let video_id = required_text(video_id, "video_id")?;
        let user_id = required_text(user_id, "user_id")?;

        if !self.catalog.is_playable(&video_id).await? {
            return Err(Error::VideoNotFound(compact_text(&video_id)));
        }
        if !self.identity.user_exists(&user_id).await? {
            return Err(Error::UserNotFound(compact_text(&user_id)));
        }

        let session = SyncSession::new(
            video_id,
            user_id,
            self.config.default_strategy,
            self.now(),
        );
        let handle = Arc::new(SessionHandle {
            record: RwLock::new(SessionRecord {
                session: session.clone(),
                conflicts: VecDeque::new(),
                pending_conflict: None,
                terminated_at: None,
            }),
        });
        self.sessions.write().await.insert(session.id, handle);

        tracing::info!(
            session = %session.id,
            video = %session.video_id,
            "Created sync session"
        );
        Ok(session)
    }

    /// Register (or re-register) a platform at `initial_position`.
    pub async fn register_platform(
        &self,
        session_id: &SessionId,
        platform: PlatformId,
        initial_position: u64,
    ) -> Result<PlatformSyncState> {
        let handle = self.handle(session_id).await?;
        let mut record = handle.record.write().await;
        if record.session.is_terminated() {
            return Err(Error::SessionNotFound(*session_id));
        }

        let now = self.now();
        if record.session.status == SessionStatus::Suspended {
            record.session.status = SessionStatus::Active;
            record.session.push_event(
                EventEntry::new(SyncEventKind::Resumed).platform(&platform),
                now,
                self.config.history_limit,
            );
        }

        let state = PlatformSyncState::registered(*session_id, platform, initial_position, now);
        self.store.put(state.clone()).await?;
        record.session.push_event(
            EventEntry::new(SyncEventKind::PlatformRegistered)
                .platform(&state.platform)
                .position(initial_position),
            now,
            self.config.history_limit,
        );

        tracing::info!(
            session = %session_id,
            platform = %state.platform,
            position = initial_position,
            "Registered platform"
        );
        Ok(state)
    }

    /// Remove a platform. Unknown platforms are ignored.
    pub async fn deregister_platform(
        &self,
        session_id: &SessionId,
        platform: &PlatformId,
    ) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let mut record = handle.record.write().await;
        if record.session.is_terminated() {
            return Err(Error::SessionNotFound(*session_id));
        }

        if self.store.remove(session_id, platform).await?.is_none() {
            return Ok(());
        }
        if record.session.authority.as_ref() == Some(platform) {
            record.session.authority = None;
        }
        record.session.push_event(
            EventEntry::new(SyncEventKind::PlatformDeregistered).platform(platform),
            self.now(),
            self.config.history_limit,
        );
        tracing::info!(session = %session_id, platform = %platform, "Deregistered platform");
        Ok(())
    }

    pub async fn suspend_session(&self, session_id: &SessionId) -> Result<SyncSession> {
        self.set_suspended(session_id, true).await
    }

    pub async fn resume_session(&self, session_id: &SessionId) -> Result<SyncSession> {
        self.set_suspended(session_id, false).await
    }

    async fn set_suspended(&self, session_id: &SessionId, suspend: bool) -> Result<SyncSession> {
        let handle = self.handle(session_id).await?;
        let mut record = handle.record.write().await;
        let (from, to, kind) = if suspend {
            (
                SessionStatus::Active,
                SessionStatus::Suspended,
                SyncEventKind::Suspended,
            )
        } else {
            (
                SessionStatus::Suspended,
                SessionStatus::Active,
                SyncEventKind::Resumed,
            )
        };

        if record.session.is_terminated() {
            return Err(Error::SessionTerminated(*session_id));
        }
        if record.session.status == from {
            record.session.status = to;
            record
                .session
                .push_event(EventEntry::new(kind), self.now(), self.config.history_limit);
            tracing::info!(session = %session_id, status = ?to, "Session lifecycle changed");
        }
        Ok(record.session.clone())
    }

    /// Terminate a session and drop all of its platform states.
    pub async fn terminate_session(&self, session_id: &SessionId) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let mut record = handle.record.write().await;
        if record.session.is_terminated() {
            return Err(Error::SessionNotFound(*session_id));
        }
        self.terminate_locked(&mut record).await
    }

    async fn terminate_locked(&self, record: &mut SessionRecord) -> Result<()> {
        let now = self.now();
        let removed = self.store.clear(&record.session.id).await?;
        record.session.status = SessionStatus::Terminated;
        record.pending_conflict = None;
        record.terminated_at = Some(now);
        record.session.push_event(
            EventEntry::new(SyncEventKind::Termination),
            now,
            self.config.history_limit,
        );
        tracing::info!(
            session = %record.session.id,
            platforms_removed = removed,
            "Terminated sync session"
        );
        Ok(())
    }

    /// Consistent snapshot of every platform's state; empty once terminated.
    pub async fn get_platform_states(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PlatformSyncState>> {
        let handle = self.handle(session_id).await?;
        let record = handle.record.read().await;
        if record.session.is_terminated() {
            return Ok(Vec::new());
        }
        self.store.list(session_id).await
    }

    /// Snapshot of the session record.
    pub async fn get_session(&self, session_id: &SessionId) -> Result<SyncSession> {
        let handle = self.handle(session_id).await?;
        let session = handle.record.read().await.session.clone();
        Ok(session)
    }

    /// Change the strategy applied when `SyncPosition` detects a conflict.
    pub async fn set_resolution_policy(
        &self,
        session_id: &SessionId,
        strategy: ResolutionStrategy,
        authority: Option<PlatformId>,
    ) -> Result<SyncSession> {
        let handle = self.handle(session_id).await?;
        let mut record = handle.record.write().await;
        if record.session.is_terminated() {
            return Err(Error::SessionTerminated(*session_id));
        }

        if let Some(platform) = &authority {
            if self.store.get(session_id, platform).await?.is_none() {
                return Err(Error::PlatformNotRegistered(platform.clone()));
            }
        }
        let authority = authority.or_else(|| record.session.authority.clone());
        if strategy == ResolutionStrategy::Authority && authority.is_none() {
            return Err(Error::NoAuthorityDesignated);
        }

        record.session.default_strategy = strategy;
        record.session.authority = authority;
        tracing::info!(
            session = %session_id,
            strategy = %strategy,
            authority = record.session.authority.as_ref().map(ToString::to_string),
            "Updated resolution policy"
        );
        Ok(record.session.clone())
    }

    pub async fn session_counts(&self) -> SessionCounts {
        let handles: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut counts = SessionCounts::default();
        for handle in handles {
            match handle.record.read().await.session.status {
                SessionStatus::Active => counts.active += 1,
                SessionStatus::Suspended => counts.suspended += 1,
                SessionStatus::Terminated => counts.terminated += 1,
            }
        }
        counts
    }

    /// Mark idle platforms stale, suspend or terminate idle sessions, and
    /// purge expired tombstones.
    pub async fn cleanup_idle(&self) -> Result<CleanupReport> {
        let handles: Vec<(SessionId, Arc<SessionHandle>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        let platform_idle_ms = duration_ms(self.config.platform_idle_window);
        let session_idle_ms = duration_ms(self.config.session_idle_timeout);
        let retention_ms = duration_ms(self.config.terminated_retention);
        let mut report = CleanupReport::default();
        let mut expired = Vec::new();

        for (session_id, handle) in handles {
            let mut record = handle.record.write().await;
            let now = self.now();

            if let Some(terminated_at) = record.terminated_at {
                if now - terminated_at >= retention_ms {
                    expired.push(session_id);
                }
                continue;
            }

            if now - record.session.last_activity_at >= session_idle_ms {
                self.terminate_locked(&mut record).await?;
                report.sessions_terminated += 1;
                continue;
            }

            let mut states = self.store.list(&session_id).await?;
            for state in &mut states {
                let last_seen = state.last_reported_at().unwrap_or_else(|| state.updated_at());
                if state.status != PlatformStatus::Stale && now - last_seen >= platform_idle_ms {
                    state.status = PlatformStatus::Stale;
                    self.store.put(state.clone()).await?;
                    report.platforms_marked_stale += 1;
                    tracing::debug!(
                        session = %session_id,
                        platform = %state.platform,
                        "Marked platform stale"
                    );
                }
            }

            let all_stale = states
                .iter()
                .all(|state| state.status == PlatformStatus::Stale);
            let quiet = now - record.session.last_activity_at >= platform_idle_ms;
            if record.session.status == SessionStatus::Active && all_stale && quiet {
                record.session.status = SessionStatus::Suspended;
                record.session.push_event(
                    EventEntry::new(SyncEventKind::Suspended),
                    now,
                    self.config.history_limit,
                );
                report.sessions_suspended += 1;
                tracing::info!(session = %session_id, "Suspended idle session");
            }
        }

        if !expired.is_empty() {
            let mut sessions = self.sessions.write().await;
            for session_id in &expired {
                sessions.remove(session_id);
            }
        }
        for session_id in expired {
            self.metrics.forget_session(session_id).await;
            report.sessions_purged += 1;
        }

        Ok(report)
    }

    /// Run [`cleanup_idle`](Self::cleanup_idle) every `cleanup_interval`.
    pub fn start_cleanup_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.cleanup_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                match self.cleanup_idle().await {
                    Ok(report) if report != CleanupReport::default() => {
                        tracing::info!(?report, "Session cleanup complete");
                    }
                    Ok(_) => {}
                    Err(error) => tracing::warn!("Session cleanup failed: {error}"),
                }
            }
        })
    }
}
