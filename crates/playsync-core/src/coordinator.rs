//! Position updates, conflict handling, and read views over sessions.
//!
//! Every mutating operation holds the session's write guard from the first
//! read of platform states until the last store write, then enqueues the
//! resulting notifications without waiting for delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::fanout::FanoutDispatcher;
use crate::metrics::SyncMetricsTracker;
use crate::models::{
    ConflictId, ConflictRecord, EventEntry, PlatformId, PlatformStatus, PlatformSyncState,
    PlaybackState, ResolutionStrategy, SessionId, SessionStatus, SyncEvent, SyncEventKind,
    SyncMetrics,
};
use crate::notify::StateChange;
use crate::resolver::{ConflictResolver, Resolution};
use crate::session_manager::{SessionManager, SessionRecord};
use crate::util::required_text;

/// A platform's report of its own playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub platform: PlatformId,
    pub position_secs: u64,
    pub quality: String,
    pub is_playing: bool,
    #[serde(default)]
    pub buffered_secs: Option<u32>,
}

impl SyncRequest {
    pub fn new(platform: PlatformId, position_secs: u64, quality: impl Into<String>) -> Self {
        Self {
            platform,
            position_secs,
            quality: quality.into(),
            is_playing: true,
            buffered_secs: None,
        }
    }

    #[must_use]
    pub const fn paused(mut self) -> Self {
        self.is_playing = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Position of the state committed as authoritative
    pub updated_position: u64,
    pub state: PlaybackState,
    /// Platforms that received the committed state
    pub synced_platforms: Vec<PlatformId>,
    pub latency_ms: u64,
    pub conflict_detected: bool,
    pub conflict_id: Option<ConflictId>,
    /// Set when the conflict waits for `resolve_conflict` with a manual value
    pub pending_manual_resolution: bool,
}

/// Parameters for an explicit resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub strategy: ResolutionStrategy,
    #[serde(default)]
    pub authority: Option<PlatformId>,
    /// Required when `strategy` is `manual`
    #[serde(default)]
    pub manual_state: Option<PlaybackState>,
    /// Defaults to the most recent conflict
    #[serde(default)]
    pub conflict_id: Option<ConflictId>,
}

impl ResolveRequest {
    pub const fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy,
            authority: None,
            manual_state: None,
            conflict_id: None,
        }
    }

    #[must_use]
    pub fn manual(state: PlaybackState) -> Self {
        Self {
            manual_state: Some(state),
            ..Self::new(ResolutionStrategy::Manual)
        }
    }

    #[must_use]
    pub fn with_authority(mut self, authority: PlatformId) -> Self {
        self.authority = Some(authority);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConflict {
    pub conflict_id: ConflictId,
    pub resolved_state: PlaybackState,
    pub strategy: ResolutionStrategy,
    /// The conflict had already been settled; nothing was written
    pub already_resolved: bool,
    pub synced_platforms: Vec<PlatformId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForceSyncOutcome {
    pub state: PlaybackState,
    pub synced_platforms: Vec<PlatformId>,
}

/// Aggregated view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub session_id: SessionId,
    pub video_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub platforms: Vec<PlatformSyncState>,
    pub authoritative: Option<PlaybackState>,
    pub last_sync_at: Option<i64>,
    pub conflict_count: u64,
    pub total_sync_events: u64,
    pub pending_conflict: Option<ConflictId>,
    pub default_strategy: ResolutionStrategy,
    pub authority: Option<PlatformId>,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub struct SyncCoordinator {
    sessions: Arc<SessionManager>,
    metrics: Arc<SyncMetricsTracker>,
    fanout: FanoutDispatcher,
    resolver: ConflictResolver,
    config: Arc<SyncConfig>,
}

impl SyncCoordinator {
    pub fn new(
        config: Arc<SyncConfig>,
        sessions: Arc<SessionManager>,
        metrics: Arc<SyncMetricsTracker>,
        fanout: FanoutDispatcher,
    ) -> Self {
        Self {
            sessions,
            metrics,
            fanout,
            resolver: ConflictResolver::new(),
            config,
        }
    }

    /// Apply a platform's reported position and propagate the result.
    pub async fn sync_position(
        &self,
        session_id: SessionId,
        request: SyncRequest,
    ) -> Result<SyncOutcome> {
        let handle = self.sessions.handle(&session_id).await?;
        let mut record = handle.record.write().await;
        // Budget covers the critical section, not the wait for the guard.
        let started = Instant::now();
        let result = self.apply_sync(&mut record, session_id, &request).await;
        let latency = started.elapsed();
        drop(record);

        match &result {
            Ok(_) => {
                let within_budget = latency <= self.config.latency_budget;
                if !within_budget {
                    tracing::warn!(
                        session = %session_id,
                        platform = %request.platform,
                        latency_ms = millis(latency),
                        "Sync exceeded latency budget"
                    );
                }
                self.metrics
                    .record_attempt(session_id, &request.platform, latency, within_budget)
                    .await;
            }
            Err(error) if error.is_recordable() => {
                tracing::debug!(
                    session = %session_id,
                    platform = %request.platform,
                    "Sync rejected: {error}"
                );
                self.metrics
                    .record_attempt(session_id, &request.platform, latency, false)
                    .await;
            }
            Err(_) => {}
        }

        result.map(|mut outcome| {
            outcome.latency_ms = millis(latency);
            outcome
        })
    }

    async fn apply_sync(
        &self,
        record: &mut SessionRecord,
        session_id: SessionId,
        request: &SyncRequest,
    ) -> Result<SyncOutcome> {
        record.ensure_active()?;
        if let Some(pending) = record.pending_conflict {
            return Err(Error::ConflictPendingManualResolution(pending));
        }

        let quality = required_text(request.quality.as_str(), "quality")?;
        let proposed = PlaybackState::new(request.position_secs, quality, request.is_playing);
        let store = self.sessions.store();
        let now = self.sessions.now();

        let (mut current, others): (Vec<_>, Vec<_>) = store
            .list(&session_id)
            .await?
            .into_iter()
            .partition(|state| state.platform == request.platform);

        let mut current = match current.pop() {
            Some(state) => state,
            None if self.config.implicit_registration => {
                record.session.push_event(
                    EventEntry::new(SyncEventKind::PlatformRegistered)
                        .platform(&request.platform)
                        .position(request.position_secs),
                    now,
                    self.config.history_limit,
                );
                tracing::info!(
                    session = %session_id,
                    platform = %request.platform,
                    "Implicitly registered platform"
                );
                PlatformSyncState::registered(
                    session_id,
                    request.platform.clone(),
                    request.position_secs,
                    now,
                )
            }
            None => return Err(Error::PlatformNotRegistered(request.platform.clone())),
        };

        let window_ms = self.config.conflict_window_ms();
        let threshold = self.config.divergence_threshold_secs;
        let conflicting: Vec<PlatformSyncState> = others
            .iter()
            .filter(|other| {
                other.status != PlatformStatus::Stale
                    && other.reported_within(now, window_ms)
                    && other.position_secs().abs_diff(proposed.position_secs) > threshold
            })
            .cloned()
            .collect();

        if conflicting.is_empty() {
            current.apply_report(&proposed, request.buffered_secs, now, PlatformStatus::Synced);
            store.put(current).await?;
            let synced = self
                .commit(record, &proposed, now, Some(&request.platform))
                .await?;
            record.session.push_event(
                EventEntry::new(SyncEventKind::PositionUpdate)
                    .platform(&request.platform)
                    .position(proposed.position_secs),
                now,
                self.config.history_limit,
            );
            tracing::debug!(
                session = %session_id,
                platform = %request.platform,
                position = proposed.position_secs,
                synced = synced.len(),
                "Applied position update"
            );
            return Ok(SyncOutcome {
                updated_position: proposed.position_secs,
                state: proposed,
                synced_platforms: synced,
                latency_ms: 0,
                conflict_detected: false,
                conflict_id: None,
                pending_manual_resolution: false,
            });
        }

        current.apply_report(
            &proposed,
            request.buffered_secs,
            now,
            PlatformStatus::Conflicted,
        );
        store.put(current.clone()).await?;
        let mut involved = vec![current];
        for mut other in conflicting {
            other.status = PlatformStatus::Conflicted;
            store.put(other.clone()).await?;
            involved.push(other);
        }
        record.session.conflict_count += 1;

        let strategy = record.session.default_strategy;
        let authority = record.session.authority.clone();
        let candidates = if strategy == ResolutionStrategy::Authority {
            with_authority(involved.clone(), &others, authority.as_ref())
        } else {
            involved.clone()
        };
        let (resolution, applied) = self.auto_resolve(&candidates, strategy, authority.as_ref())?;

        let conflict_id = ConflictId::new();
        record.session.push_event(
            EventEntry::new(SyncEventKind::Conflict)
                .platform(&request.platform)
                .position(proposed.position_secs)
                .conflict(conflict_id),
            now,
            self.config.history_limit,
        );
        tracing::info!(
            session = %session_id,
            conflict = %conflict_id,
            trigger = %request.platform,
            platforms = involved.len(),
            strategy = %applied,
            "Detected playback conflict"
        );

        let mut conflict = ConflictRecord {
            id: conflict_id,
            session_id,
            triggered_by: request.platform.clone(),
            states: involved,
            detected_at: now,
            strategy: applied,
            authority: (applied == ResolutionStrategy::Authority)
                .then_some(authority)
                .flatten(),
            resolved: None,
            resolved_at: None,
        };

        let Resolution::Resolved { state, .. } = resolution else {
            record.pending_conflict = Some(conflict_id);
            record.push_conflict(conflict, self.config.history_limit);
            tracing::info!(
                session = %session_id,
                conflict = %conflict_id,
                "Conflict awaiting manual resolution"
            );
            return Ok(SyncOutcome {
                updated_position: proposed.position_secs,
                state: proposed,
                synced_platforms: Vec::new(),
                latency_ms: 0,
                conflict_detected: true,
                conflict_id: Some(conflict_id),
                pending_manual_resolution: true,
            });
        };

        conflict.resolved = Some(state.clone());
        conflict.resolved_at = Some(now);
        record.push_conflict(conflict, self.config.history_limit);
        let synced = self.commit(record, &state, now, None).await?;
        record.session.push_event(
            EventEntry::new(SyncEventKind::Resolution)
                .position(state.position_secs)
                .conflict(conflict_id),
            now,
            self.config.history_limit,
        );

        Ok(SyncOutcome {
            updated_position: state.position_secs,
            state,
            synced_platforms: synced,
            latency_ms: 0,
            conflict_detected: true,
            conflict_id: Some(conflict_id),
            pending_manual_resolution: false,
        })
    }

    /// Apply `strategy`; an unusable authority falls back to `Latest`.
    fn auto_resolve(
        &self,
        candidates: &[PlatformSyncState],
        strategy: ResolutionStrategy,
        authority: Option<&PlatformId>,
    ) -> Result<(Resolution, ResolutionStrategy)> {
        match self.resolver.resolve(candidates, strategy, authority) {
            Err(Error::NoAuthorityDesignated | Error::ResolutionNotApplicable(_))
                if strategy == ResolutionStrategy::Authority =>
            {
                tracing::warn!(
                    authority = authority.map(ToString::to_string),
                    "Authority unavailable for conflict; falling back to latest"
                );
                let resolution =
                    self.resolver
                        .resolve(candidates, ResolutionStrategy::Latest, None)?;
                Ok((resolution, ResolutionStrategy::Latest))
            }
            other => other.map(|resolution| (resolution, strategy)),
        }
    }

    /// Write `state` into every platform except `skip`, record it as
    /// authoritative, then enqueue one notification per written platform.
    async fn commit(
        &self,
        record: &mut SessionRecord,
        state: &PlaybackState,
        now: i64,
        skip: Option<&PlatformId>,
    ) -> Result<Vec<PlatformId>> {
        let session_id = record.session.id;
        let store = self.sessions.store();
        let mut synced = Vec::new();

        for mut target in store.list(&session_id).await? {
            if skip == Some(&target.platform) {
                continue;
            }
            let status = if target.status == PlatformStatus::Stale {
                PlatformStatus::Stale
            } else {
                PlatformStatus::Synced
            };
            target.apply_playback(state, now, status);
            store.put(target.clone()).await?;
            synced.push(target.platform);
        }

        record.session.authoritative = Some(state.clone());
        record.session.last_sync_at = Some(now);

        for platform in &synced {
            self.fanout
                .dispatch(StateChange {
                    session_id,
                    platform: platform.clone(),
                    state: state.clone(),
                    issued_at: now,
                })
                .await;
        }
        Ok(synced)
    }

    /// Settle a recorded conflict with an explicit strategy.
    pub async fn resolve_conflict(
        &self,
        session_id: SessionId,
        request: ResolveRequest,
    ) -> Result<ResolvedConflict> {
        let handle = self.sessions.handle(&session_id).await?;
        let mut record = handle.record.write().await;
        let started = Instant::now();
        record.ensure_active()?;

        let index = match request.conflict_id {
            Some(id) => record.conflicts.iter().rposition(|conflict| conflict.id == id),
            None => record.conflicts.len().checked_sub(1),
        }
        .ok_or_else(|| {
            Error::ResolutionNotApplicable(match request.conflict_id {
                Some(id) => format!("conflict {id} not found"),
                None => "no conflict recorded for session".to_string(),
            })
        })?;
        let conflict = record.conflicts[index].clone();

        if let Some(resolved) = &conflict.resolved {
            let same_value = request
                .manual_state
                .as_ref()
                .is_none_or(|manual| manual == resolved);
            let same_authority =
                request.authority.is_none() || request.authority == conflict.authority;
            if request.strategy == conflict.strategy && same_value && same_authority {
                return Ok(ResolvedConflict {
                    conflict_id: conflict.id,
                    resolved_state: resolved.clone(),
                    strategy: conflict.strategy,
                    already_resolved: true,
                    synced_platforms: Vec::new(),
                });
            }
            return Err(Error::ResolutionNotApplicable(format!(
                "conflict {} was already resolved with {}",
                conflict.id, conflict.strategy
            )));
        }

        let authority = request
            .authority
            .clone()
            .or_else(|| record.session.authority.clone());
        let state = if request.strategy == ResolutionStrategy::Manual {
            let manual = request.manual_state.clone().ok_or_else(|| {
                Error::ResolutionNotApplicable("manual resolution requires a state".to_string())
            })?;
            let quality = required_text(manual.quality.as_str(), "quality")?;
            PlaybackState::new(manual.position_secs, quality, manual.is_playing)
        } else {
            let mut candidates = conflict.states.clone();
            if request.strategy == ResolutionStrategy::Authority {
                let current = self.sessions.store().list(&session_id).await?;
                candidates = with_authority(candidates, &current, authority.as_ref());
            }
            self.resolver
                .resolve(&candidates, request.strategy, authority.as_ref())?
                .state()
                .cloned()
                .ok_or_else(|| {
                    Error::ResolutionNotApplicable("strategy produced no state".to_string())
                })?
        };

        let now = self.sessions.now();
        {
            let stored = &mut record.conflicts[index];
            stored.strategy = request.strategy;
            stored.authority = (request.strategy == ResolutionStrategy::Authority)
                .then_some(authority)
                .flatten();
            stored.resolved = Some(state.clone());
            stored.resolved_at = Some(now);
        }
        if record.pending_conflict == Some(conflict.id) {
            record.pending_conflict = None;
        }

        let synced = self.commit(&mut record, &state, now, None).await?;
        record.session.push_event(
            EventEntry::new(SyncEventKind::Resolution)
                .position(state.position_secs)
                .conflict(conflict.id),
            now,
            self.config.history_limit,
        );
        drop(record);

        let latency = started.elapsed();
        self.metrics
            .record_attempt(
                session_id,
                &conflict.triggered_by,
                latency,
                latency <= self.config.latency_budget,
            )
            .await;
        tracing::info!(
            session = %session_id,
            conflict = %conflict.id,
            strategy = %request.strategy,
            position = state.position_secs,
            "Resolved conflict"
        );

        Ok(ResolvedConflict {
            conflict_id: conflict.id,
            resolved_state: state,
            strategy: request.strategy,
            already_resolved: false,
            synced_platforms: synced,
        })
    }

    /// Push the authoritative state to every platform, optionally at a new position.
    pub async fn force_sync_all(
        &self,
        session_id: SessionId,
        position_secs: Option<u64>,
    ) -> Result<ForceSyncOutcome> {
        let handle = self.sessions.handle(&session_id).await?;
        let mut record = handle.record.write().await;
        record.ensure_active()?;
        if let Some(pending) = record.pending_conflict {
            return Err(Error::ConflictPendingManualResolution(pending));
        }

        let states = self.sessions.store().list(&session_id).await?;
        if states.is_empty() {
            return Err(Error::ResolutionNotApplicable(
                "session has no registered platforms".to_string(),
            ));
        }

        let base = match record.session.authoritative.clone() {
            Some(state) => state,
            None => self
                .resolver
                .resolve(&states, ResolutionStrategy::Latest, None)?
                .state()
                .cloned()
                .ok_or_else(|| {
                    Error::ResolutionNotApplicable("no state to force".to_string())
                })?,
        };
        let state = position_secs.map_or_else(|| base.clone(), |position| base.at_position(position));

        let now = self.sessions.now();
        let synced = self.commit(&mut record, &state, now, None).await?;
        record.session.push_event(
            EventEntry::new(SyncEventKind::ForceSync).position(state.position_secs),
            now,
            self.config.history_limit,
        );
        tracing::info!(
            session = %session_id,
            position = state.position_secs,
            platforms = synced.len(),
            "Forced sync across platforms"
        );

        Ok(ForceSyncOutcome {
            state,
            synced_platforms: synced,
        })
    }

    pub async fn get_sync_status(&self, session_id: SessionId) -> Result<SyncStatus> {
        let handle = self.sessions.handle(&session_id).await?;
        let record = handle.record.read().await;
        let platforms = if record.session.is_terminated() {
            Vec::new()
        } else {
            self.sessions.store().list(&session_id).await?
        };
        let session = &record.session;

        Ok(SyncStatus {
            session_id,
            video_id: session.video_id.clone(),
            user_id: session.user_id.clone(),
            status: session.status,
            platforms,
            authoritative: session.authoritative.clone(),
            last_sync_at: session.last_sync_at,
            conflict_count: session.conflict_count,
            total_sync_events: session.total_sync_events,
            pending_conflict: record.pending_conflict,
            default_strategy: session.default_strategy,
            authority: session.authority.clone(),
        })
    }

    /// Retained events, oldest first.
    pub async fn get_sync_history(&self, session_id: SessionId) -> Result<Vec<SyncEvent>> {
        let handle = self.sessions.handle(&session_id).await?;
        let history = handle.record.read().await.session.history.iter().cloned().collect();
        Ok(history)
    }

    /// Retained conflict records, oldest first.
    pub async fn get_conflicts(&self, session_id: SessionId) -> Result<Vec<ConflictRecord>> {
        let handle = self.sessions.handle(&session_id).await?;
        let conflicts = handle.record.read().await.conflicts.iter().cloned().collect();
        Ok(conflicts)
    }

    /// Never fails; unknown platforms report zeroed metrics.
    pub async fn get_metrics(&self, session_id: SessionId, platform: &PlatformId) -> SyncMetrics {
        self.metrics.get(session_id, platform).await
    }
}

/// Add the authority's current state to `candidates` when it is missing.
fn with_authority(
    mut candidates: Vec<PlatformSyncState>,
    current: &[PlatformSyncState],
    authority: Option<&PlatformId>,
) -> Vec<PlatformSyncState> {
    if let Some(authority) = authority {
        let missing = !candidates.iter().any(|state| &state.platform == authority);
        if missing {
            if let Some(state) = current.iter().find(|state| &state.platform == authority) {
                candidates.push(state.clone());
            }
        }
    }
    candidates
}
