//! Wires the session manager, coordinator, metrics, and fan-out together.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::coordinator::{
    ForceSyncOutcome, ResolveRequest, ResolvedConflict, SyncCoordinator, SyncOutcome,
    SyncRequest, SyncStatus,
};
use crate::error::Result;
use crate::fanout::{FanoutDispatcher, FanoutWorkers};
use crate::lookup::{AllowAll, IdentityDirectory, VideoCatalog};
use crate::metrics::SyncMetricsTracker;
use crate::models::{
    ConflictRecord, PlatformId, PlatformSyncState, ResolutionStrategy, SessionId, SyncEvent,
    SyncMetrics, SyncSession,
};
use crate::notify::Notifier;
use crate::session_manager::{CleanupReport, SessionCounts, SessionManager};
use crate::store::{InMemoryStateStore, PlatformStateStore};

/// Builder for [`SyncEngine`]. Only the notifier is required.
pub struct SyncEngineBuilder {
    config: SyncConfig,
    notifier: Arc<dyn Notifier>,
    store: Option<Arc<dyn PlatformStateStore>>,
    clock: Option<Arc<dyn Clock>>,
    catalog: Option<Arc<dyn VideoCatalog>>,
    identity: Option<Arc<dyn IdentityDirectory>>,
}

impl SyncEngineBuilder {
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn PlatformStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn video_catalog(mut self, catalog: Arc<dyn VideoCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    #[must_use]
    pub fn identity_directory(mut self, identity: Arc<dyn IdentityDirectory>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Build the engine and start its delivery workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> SyncEngine {
        let config = Arc::new(self.config);
        let metrics = Arc::new(SyncMetricsTracker::new());
        let sessions = Arc::new(SessionManager::new(
            config.clone(),
            self.store
                .unwrap_or_else(|| Arc::new(InMemoryStateStore::new())),
            metrics.clone(),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.catalog.unwrap_or_else(|| Arc::new(AllowAll)),
            self.identity.unwrap_or_else(|| Arc::new(AllowAll)),
        ));
        let (fanout, fanout_workers) =
            FanoutDispatcher::spawn(self.notifier, metrics.clone(), config.fanout.clone());
        let coordinator = SyncCoordinator::new(config, sessions.clone(), metrics, fanout);

        SyncEngine {
            sessions,
            coordinator,
            fanout_workers,
        }
    }
}

/// Entry point for every sync operation.
pub struct SyncEngine {
    sessions: Arc<SessionManager>,
    coordinator: SyncCoordinator,
    fanout_workers: FanoutWorkers,
}

impl SyncEngine {
    pub fn builder(notifier: Arc<dyn Notifier>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config: SyncConfig::default(),
            notifier,
            store: None,
            clock: None,
            catalog: None,
            identity: None,
        }
    }

    pub async fn create_session(&self, video_id: &str, user_id: &str) -> Result<SyncSession> {
        self.sessions.create_session(video_id, user_id).await
    }

    pub async fn register_platform(
        &self,
        session_id: SessionId,
        platform: PlatformId,
        initial_position: u64,
    ) -> Result<PlatformSyncState> {
        self.sessions
            .register_platform(&session_id, platform, initial_position)
            .await
    }

    pub async fn deregister_platform(
        &self,
        session_id: SessionId,
        platform: &PlatformId,
    ) -> Result<()> {
        self.sessions.deregister_platform(&session_id, platform).await
    }

    pub async fn terminate_session(&self, session_id: SessionId) -> Result<()> {
        self.sessions.terminate_session(&session_id).await
    }

    pub async fn suspend_session(&self, session_id: SessionId) -> Result<SyncSession> {
        self.sessions.suspend_session(&session_id).await
    }

    pub async fn resume_session(&self, session_id: SessionId) -> Result<SyncSession> {
        self.sessions.resume_session(&session_id).await
    }

    pub async fn set_resolution_policy(
        &self,
        session_id: SessionId,
        strategy: ResolutionStrategy,
        authority: Option<PlatformId>,
    ) -> Result<SyncSession> {
        self.sessions
            .set_resolution_policy(&session_id, strategy, authority)
            .await
    }

    pub async fn get_platform_states(&self, session_id: SessionId) -> Result<Vec<PlatformSyncState>> {
        self.sessions.get_platform_states(&session_id).await
    }

    pub async fn sync_position(
        &self,
        session_id: SessionId,
        request: SyncRequest,
    ) -> Result<SyncOutcome> {
        self.coordinator.sync_position(session_id, request).await
    }

    pub async fn resolve_conflict(
        &self,
        session_id: SessionId,
        request: ResolveRequest,
    ) -> Result<ResolvedConflict> {
        self.coordinator.resolve_conflict(session_id, request).await
    }

    pub async fn force_sync_all(
        &self,
        session_id: SessionId,
        position_secs: Option<u64>,
    ) -> Result<ForceSyncOutcome> {
        self.coordinator.force_sync_all(session_id, position_secs).await
    }

    pub async fn get_sync_status(&self, session_id: SessionId) -> Result<SyncStatus> {
        self.coordinator.get_sync_status(session_id).await
    }

    pub async fn get_sync_history(&self, session_id: SessionId) -> Result<Vec<SyncEvent>> {
        self.coordinator.get_sync_history(session_id).await
    }

    pub async fn get_conflicts(&self, session_id: SessionId) -> Result<Vec<ConflictRecord>> {
        self.coordinator.get_conflicts(session_id).await
    }

    pub async fn get_metrics(&self, session_id: SessionId, platform: &PlatformId) -> SyncMetrics {
        self.coordinator.get_metrics(session_id, platform).await
    }

    pub async fn session_counts(&self) -> SessionCounts {
        self.sessions.session_counts().await
    }

    pub async fn cleanup_idle(&self) -> Result<CleanupReport> {
        self.sessions.cleanup_idle().await
    }

    /// Start periodic cleanup on the current runtime.
    pub fn start_cleanup_task(&self) -> JoinHandle<()> {
        self.sessions.clone().start_cleanup_task()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.fanout_workers.abort();
    }
}
