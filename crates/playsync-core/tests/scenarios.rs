use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use playsync_core::clock::ManualClock;
use playsync_core::models::{PlatformStatus, ResolutionStrategy, SessionStatus, SyncEventKind};
use playsync_core::testing::{RecordingNotifier, StaticDirectory};
use playsync_core::{
    Error, PlatformId, PlatformKind, ResolveRequest, SyncConfig, SyncEngine, SyncRequest,
};

struct Fixture {
    engine: SyncEngine,
    clock: ManualClock,
    notifier: Arc<RecordingNotifier>,
}

fn fixture() -> Fixture {
    let clock = ManualClock::new(1_700_000_000_000);
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = SyncEngine::builder(notifier.clone())
        .config(SyncConfig::default())
        .clock(Arc::new(clock.clone()))
        .build();
    Fixture {
        engine,
        clock,
        notifier,
    }
}

fn platform(kind: PlatformKind) -> PlatformId {
    PlatformId::new(kind)
}

#[tokio::test]
async fn fan_out_reaches_idle_platform() {
    let f = fixture();
    let ios = platform(PlatformKind::Ios);
    let android = platform(PlatformKind::Android);

    let session = f.engine.create_session("v1", "u1").await.unwrap();
    f.engine.register_platform(session.id, ios.clone(), 0).await.unwrap();
    f.engine
        .register_platform(session.id, android.clone(), 0)
        .await
        .unwrap();

    let outcome = f
        .engine
        .sync_position(session.id, SyncRequest::new(ios, 120, "720p"))
        .await
        .unwrap();
    assert!(!outcome.conflict_detected);

    let delivered = f.notifier.wait_for(1, Duration::from_secs(2)).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].platform, android);

    let status = f.engine.get_sync_status(session.id).await.unwrap();
    assert_eq!(status.conflict_count, 0);
    let android_state = status
        .platforms
        .iter()
        .find(|state| state.platform == android)
        .unwrap();
    assert_eq!(android_state.position_secs(), 120);
}

#[tokio::test]
async fn near_simultaneous_divergence_is_resolved_deterministically() {
    let f = fixture();
    let web = platform(PlatformKind::Web);
    let ios = platform(PlatformKind::Ios);

    let session = f.engine.create_session("v1", "u1").await.unwrap();
    f.engine.register_platform(session.id, web.clone(), 0).await.unwrap();
    f.engine.register_platform(session.id, ios.clone(), 0).await.unwrap();

    f.engine
        .sync_position(session.id, SyncRequest::new(web.clone(), 30, "480p"))
        .await
        .unwrap();
    f.clock.advance(Duration::from_millis(200));
    let outcome = f
        .engine
        .sync_position(session.id, SyncRequest::new(ios, 200, "1080p"))
        .await
        .unwrap();

    assert!(outcome.conflict_detected);
    assert_eq!(outcome.updated_position, 200);
    assert_eq!(outcome.state.quality, "1080p");

    let conflicts = f.engine.get_conflicts(session.id).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].strategy, ResolutionStrategy::Latest);
    assert_eq!(Some(conflicts[0].id), outcome.conflict_id);

    for state in f.engine.get_platform_states(session.id).await.unwrap() {
        assert_eq!(state.position_secs(), 200);
        assert_eq!(state.status, PlatformStatus::Synced);
    }

    let resolved = f
        .engine
        .resolve_conflict(session.id, ResolveRequest::new(ResolutionStrategy::Latest))
        .await
        .unwrap();
    let again = f
        .engine
        .resolve_conflict(session.id, ResolveRequest::new(ResolutionStrategy::Latest))
        .await
        .unwrap();
    assert!(resolved.already_resolved);
    assert_eq!(resolved, again);
}

#[tokio::test]
async fn earlier_report_outside_window_is_not_a_conflict() {
    let f = fixture();
    let a = platform(PlatformKind::Web);
    let b = platform(PlatformKind::Android);

    let session = f.engine.create_session("v1", "u1").await.unwrap();
    f.engine
        .sync_position(session.id, SyncRequest::new(a, 50, "720p"))
        .await
        .unwrap();
    f.clock.advance(Duration::from_secs(10));
    let outcome = f
        .engine
        .sync_position(session.id, SyncRequest::new(b, 55, "720p"))
        .await
        .unwrap();

    assert!(!outcome.conflict_detected);
    for state in f.engine.get_platform_states(session.id).await.unwrap() {
        assert_eq!(state.status, PlatformStatus::Synced);
        assert_eq!(state.position_secs(), 55);
    }
}

#[tokio::test]
async fn average_of_40_and_100_resolves_to_70() {
    let f = fixture();
    let web = platform(PlatformKind::Web);
    let android = platform(PlatformKind::Android);

    let session = f.engine.create_session("v1", "u1").await.unwrap();
    f.engine
        .set_resolution_policy(session.id, ResolutionStrategy::Average, None)
        .await
        .unwrap();

    f.engine
        .sync_position(session.id, SyncRequest::new(web, 40, "720p"))
        .await
        .unwrap();
    f.clock.advance(Duration::from_secs(1));
    let outcome = f
        .engine
        .sync_position(session.id, SyncRequest::new(android, 100, "720p"))
        .await
        .unwrap();

    assert!(outcome.conflict_detected);
    assert_eq!(outcome.updated_position, 70);
}

#[tokio::test]
async fn terminated_session_rejects_updates() {
    let f = fixture();
    let web = platform(PlatformKind::Web);

    let session = f.engine.create_session("v1", "u1").await.unwrap();
    f.engine.register_platform(session.id, web.clone(), 5).await.unwrap();
    f.engine.terminate_session(session.id).await.unwrap();

    let err = f
        .engine
        .sync_position(session.id, SyncRequest::new(web.clone(), 10, "720p"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::SessionNotFound(_) | Error::SessionTerminated(_)
    ));
    assert!(f
        .engine
        .get_platform_states(session.id)
        .await
        .unwrap()
        .is_empty());

    let history = f.engine.get_sync_history(session.id).await.unwrap();
    assert_eq!(history.last().map(|event| event.kind), Some(SyncEventKind::Termination));
}

#[tokio::test]
async fn platform_ids_stay_unique_per_session() {
    let f = fixture();
    let session = f.engine.create_session("v1", "u1").await.unwrap();
    let tablet = PlatformId::with_device(PlatformKind::Ios, "ipad");

    for position in [0, 10, 20] {
        f.engine
            .register_platform(session.id, platform(PlatformKind::Ios), position)
            .await
            .unwrap();
        f.engine
            .register_platform(session.id, tablet.clone(), position)
            .await
            .unwrap();
        f.engine
            .sync_position(
                session.id,
                SyncRequest::new(platform(PlatformKind::Web), position, "auto").paused(),
            )
            .await
            .unwrap();
    }

    let states = f.engine.get_platform_states(session.id).await.unwrap();
    let unique: HashSet<_> = states.iter().map(|state| state.platform.clone()).collect();
    assert_eq!(states.len(), 3);
    assert_eq!(unique.len(), 3);
}

#[tokio::test]
async fn lookups_gate_session_creation() {
    let directory = Arc::new(StaticDirectory::default().with_video("v1").with_user("u1"));
    let engine = SyncEngine::builder(Arc::new(RecordingNotifier::new()))
        .video_catalog(directory.clone())
        .identity_directory(directory)
        .build();

    assert!(engine.create_session("v1", "u1").await.is_ok());
    assert!(matches!(
        engine.create_session("missing", "u1").await,
        Err(Error::VideoNotFound(_))
    ));
}

#[tokio::test]
async fn idle_sessions_are_suspended_then_resumed_by_registration() {
    let f = fixture();
    let web = platform(PlatformKind::Web);
    let session = f.engine.create_session("v1", "u1").await.unwrap();
    f.engine.register_platform(session.id, web.clone(), 0).await.unwrap();

    f.clock.advance(Duration::from_secs(120));
    let report = f.engine.cleanup_idle().await.unwrap();
    assert_eq!(report.sessions_suspended, 1);
    assert_eq!(f.engine.session_counts().await.suspended, 1);

    f.engine.register_platform(session.id, web, 30).await.unwrap();
    let status = f.engine.get_sync_status(session.id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Active);
}

#[tokio::test]
async fn retried_push_never_lands_after_a_newer_one() {
    let clock = ManualClock::new(1_700_000_000_000);
    let notifier = Arc::new(RecordingNotifier::failing_first(1));
    let engine = SyncEngine::builder(notifier.clone())
        .clock(Arc::new(clock))
        .build();
    let ios = platform(PlatformKind::Ios);
    let android = platform(PlatformKind::Android);

    let session = engine.create_session("v1", "u1").await.unwrap();
    engine.register_platform(session.id, ios.clone(), 0).await.unwrap();
    engine
        .register_platform(session.id, android.clone(), 0)
        .await
        .unwrap();

    for position in [120, 130] {
        engine
            .sync_position(session.id, SyncRequest::new(ios.clone(), position, "720p"))
            .await
            .unwrap();
    }

    let delivered = notifier.wait_for(2, Duration::from_secs(2)).await;
    let to_android: Vec<u64> = delivered
        .iter()
        .filter(|change| change.platform == android)
        .map(|change| change.state.position_secs)
        .collect();
    assert_eq!(to_android, vec![120, 130]);
    assert_eq!(notifier.attempts(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_on_one_session_stay_consistent() {
    const SYNCS_PER_PLATFORM: u64 = 10;

    let f = fixture();
    let engine = Arc::new(f.engine);
    let session = engine.create_session("v1", "u1").await.unwrap();
    let platforms = vec![
        platform(PlatformKind::Web),
        platform(PlatformKind::Ios),
        platform(PlatformKind::Android),
        PlatformId::with_device(PlatformKind::Ios, "ipad"),
    ];

    let tasks: Vec<_> = platforms
        .iter()
        .enumerate()
        .map(|(index, target)| {
            let engine = engine.clone();
            let target = target.clone();
            let offset = u64::try_from(index).unwrap() * 100;
            tokio::spawn(async move {
                engine
                    .register_platform(session.id, target.clone(), offset)
                    .await
                    .unwrap();
                for step in 0..SYNCS_PER_PLATFORM {
                    engine
                        .sync_position(
                            session.id,
                            SyncRequest::new(target.clone(), offset + step, "720p"),
                        )
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let states = engine.get_platform_states(session.id).await.unwrap();
    let unique: HashSet<_> = states.iter().map(|state| state.platform.clone()).collect();
    assert_eq!(states.len(), platforms.len());
    assert_eq!(unique.len(), platforms.len());

    let status = engine.get_sync_status(session.id).await.unwrap();
    let history = engine.get_sync_history(session.id).await.unwrap();
    let sequences: Vec<u64> = history.iter().map(|event| event.sequence).collect();
    let expected: Vec<u64> = (1..=status.total_sync_events).collect();
    assert_eq!(sequences, expected);

    let count = |kind: SyncEventKind| history.iter().filter(|event| event.kind == kind).count();
    let syncs = usize::try_from(SYNCS_PER_PLATFORM).unwrap() * platforms.len();
    assert_eq!(count(SyncEventKind::PlatformRegistered), platforms.len());
    assert_eq!(
        count(SyncEventKind::PositionUpdate) + count(SyncEventKind::Conflict),
        syncs
    );
    assert_eq!(
        count(SyncEventKind::Conflict),
        usize::try_from(status.conflict_count).unwrap()
    );

    for target in &platforms {
        let metrics = engine.get_metrics(session.id, target).await;
        assert_eq!(metrics.total_sync_attempts, SYNCS_PER_PLATFORM);
        assert_eq!(
            metrics.successful_syncs + metrics.failed_syncs,
            SYNCS_PER_PLATFORM
        );
    }
}
