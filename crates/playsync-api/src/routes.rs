use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::Stream;
use playsync_core::models::{
    ConflictRecord, PlatformSyncState, ResolutionStrategy, SyncEvent, SyncMetrics, SyncSession,
};
use playsync_core::session_manager::SessionCounts;
use playsync_core::{
    BroadcastNotifier, ForceSyncOutcome, PlatformId, ResolveRequest, ResolvedConflict, SessionId,
    SyncEngine, SyncOutcome, SyncRequest, SyncStatus,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<SyncEngine>,
    events: BroadcastNotifier,
}

impl AppState {
    /// Build the engine; must run inside a tokio runtime.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let events = BroadcastNotifier::new(config.event_buffer);
        let engine = SyncEngine::builder(Arc::new(events.clone()))
            .config(config.sync.clone())
            .build();
        Self {
            config,
            engine: Arc::new(engine),
            events,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(sync_status).delete(terminate_session))
        .route("/sessions/{id}/suspend", post(suspend_session))
        .route("/sessions/{id}/resume", post(resume_session))
        .route("/sessions/{id}/policy", put(set_policy))
        .route(
            "/sessions/{id}/platforms",
            get(platform_states).post(register_platform),
        )
        .route(
            "/sessions/{id}/platforms/{platform}",
            delete(deregister_platform),
        )
        .route("/sessions/{id}/sync", post(sync_position))
        .route("/sessions/{id}/resolve", post(resolve_conflict))
        .route("/sessions/{id}/force-sync", post(force_sync))
        .route("/sessions/{id}/history", get(sync_history))
        .route("/sessions/{id}/conflicts", get(conflicts))
        .route("/sessions/{id}/metrics/{platform}", get(platform_metrics))
        .route("/sessions/{id}/events", get(state_events));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", session_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

fn parse_session(raw: &str) -> Result<SessionId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("`{raw}` is not a valid session id")))
}

fn parse_platform(raw: &str) -> Result<PlatformId, AppError> {
    Ok(raw.parse()?)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    sessions: SessionCounts,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        sessions: state.engine.session_counts().await,
    })
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    video_id: String,
    user_id: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SyncSession>), AppError> {
    let session = state
        .engine
        .create_session(&request.video_id, &request.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn sync_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncStatus>, AppError> {
    let status = state.engine.get_sync_status(parse_session(&id)?).await?;
    Ok(Json(status))
}

async fn terminate_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.terminate_session(parse_session(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn suspend_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncSession>, AppError> {
    let session = state.engine.suspend_session(parse_session(&id)?).await?;
    Ok(Json(session))
}

async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncSession>, AppError> {
    let session = state.engine.resume_session(parse_session(&id)?).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct PolicyRequest {
    strategy: ResolutionStrategy,
    #[serde(default)]
    authority: Option<PlatformId>,
}

async fn set_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PolicyRequest>,
) -> Result<Json<SyncSession>, AppError> {
    let session = state
        .engine
        .set_resolution_policy(parse_session(&id)?, request.strategy, request.authority)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    platform: PlatformId,
    #[serde(default)]
    initial_position: u64,
}

async fn register_platform(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PlatformSyncState>), AppError> {
    let platform_state = state
        .engine
        .register_platform(parse_session(&id)?, request.platform, request.initial_position)
        .await?;
    Ok((StatusCode::CREATED, Json(platform_state)))
}

async fn deregister_platform(
    State(state): State<AppState>,
    Path((id, platform)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let session_id = parse_session(&id)?;
    let platform = parse_platform(&platform)?;
    state
        .engine
        .deregister_platform(session_id, &platform)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn platform_states(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PlatformSyncState>>, AppError> {
    let states = state.engine.get_platform_states(parse_session(&id)?).await?;
    Ok(Json(states))
}

async fn sync_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncOutcome>, AppError> {
    let outcome = state
        .engine
        .sync_position(parse_session(&id)?, request)
        .await?;
    Ok(Json(outcome))
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolvedConflict>, AppError> {
    let resolved = state
        .engine
        .resolve_conflict(parse_session(&id)?, request)
        .await?;
    Ok(Json(resolved))
}

#[derive(Debug, Default, Deserialize)]
struct ForceSyncRequest {
    #[serde(default)]
    position: Option<u64>,
}

async fn force_sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ForceSyncRequest>,
) -> Result<Json<ForceSyncOutcome>, AppError> {
    let outcome = state
        .engine
        .force_sync_all(parse_session(&id)?, request.position)
        .await?;
    Ok(Json(outcome))
}

async fn sync_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SyncEvent>>, AppError> {
    let history = state.engine.get_sync_history(parse_session(&id)?).await?;
    Ok(Json(history))
}

async fn conflicts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ConflictRecord>>, AppError> {
    let conflicts = state.engine.get_conflicts(parse_session(&id)?).await?;
    Ok(Json(conflicts))
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    platform: PlatformId,
    #[serde(flatten)]
    metrics: SyncMetrics,
    healthy: bool,
}

async fn platform_metrics(
    State(state): State<AppState>,
    Path((id, platform)): Path<(String, String)>,
) -> Result<Json<MetricsResponse>, AppError> {
    let session_id = parse_session(&id)?;
    let platform = parse_platform(&platform)?;
    let metrics = state.engine.get_metrics(session_id, &platform).await;
    Ok(Json(MetricsResponse {
        platform,
        healthy: metrics.is_healthy(),
        metrics,
    }))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    platform: Option<String>,
}

/// SSE stream of state changes pushed to a session's platforms.
async fn state_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let session_id = parse_session(&id)?;
    let platform = query
        .platform
        .as_deref()
        .map(parse_platform)
        .transpose()?;
    // Subscribe before the existence check so no change slips in between.
    let rx = state.events.subscribe(session_id, platform.clone()).await;
    state.engine.get_sync_status(session_id).await?;

    tracing::debug!(
        session = %session_id,
        platform = platform.as_ref().map(ToString::to_string),
        "SSE subscriber connected"
    );

    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(change) => {
            let json = serde_json::to_string(&change).unwrap_or_default();
            Some(Ok(Event::default().event("state_change").data(json)))
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(session = %session_id, skipped, "SSE subscriber lagged");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    fn router() -> Router {
        let config = Arc::new(AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            sync: playsync_core::SyncConfig::default(),
            event_buffer: 64,
        });
        app_router(AppState::from_config(config))
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn new_session(router: &Router) -> String {
        let (status, body) = send(
            router,
            "POST",
            "/v1/sessions",
            Some(json!({"video_id": "v1", "user_id": "u1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn healthz_reports_session_counts() {
        let router = router();
        new_session(&router).await;

        let (status, body) = send(&router, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"]["active"], 1);
    }

    #[tokio::test]
    async fn sync_flow_over_http() {
        let router = router();
        let id = new_session(&router).await;

        for platform in ["ios", "android"] {
            let (status, _) = send(
                &router,
                "POST",
                &format!("/v1/sessions/{id}/platforms"),
                Some(json!({"platform": platform, "initial_position": 0})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, outcome) = send(
            &router,
            "POST",
            &format!("/v1/sessions/{id}/sync"),
            Some(json!({
                "platform": "ios",
                "position_secs": 120,
                "quality": "720p",
                "is_playing": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["conflict_detected"], false);
        assert_eq!(outcome["synced_platforms"], json!(["android"]));

        let (_, sync_status) = send(&router, "GET", &format!("/v1/sessions/{id}"), None).await;
        assert_eq!(sync_status["conflict_count"], 0);
        assert_eq!(sync_status["platforms"][0]["platform"], "android");
        assert_eq!(sync_status["platforms"][0]["position_secs"], 120);

        let (status, metrics) =
            send(&router, "GET", &format!("/v1/sessions/{id}/metrics/ios"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(metrics["total_sync_attempts"], 1);
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let router = router();
        let missing = SessionId::new();
        let (status, body) = send(&router, "GET", &format!("/v1/sessions/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "session_not_found");
    }

    #[tokio::test]
    async fn malformed_ids_are_400() {
        let router = router();
        let (status, body) = send(&router, "GET", "/v1/sessions/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");

        let id = new_session(&router).await;
        let (status, body) = send(
            &router,
            "DELETE",
            &format!("/v1/sessions/{id}/platforms/tv"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_input");
    }

    #[tokio::test]
    async fn terminated_session_is_gone() {
        let router = router();
        let id = new_session(&router).await;

        let (status, _) = send(&router, "DELETE", &format!("/v1/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(
            &router,
            "POST",
            &format!("/v1/sessions/{id}/sync"),
            Some(json!({
                "platform": "web",
                "position_secs": 5,
                "quality": "auto",
                "is_playing": false
            })),
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["code"], "session_terminated");

        let (_, states) = send(&router, "GET", &format!("/v1/sessions/{id}/platforms"), None).await;
        assert_eq!(states, json!([]));
    }

    #[tokio::test]
    async fn manual_policy_returns_pending_then_conflict() {
        let router = router();
        let id = new_session(&router).await;
        let (status, _) = send(
            &router,
            "PUT",
            &format!("/v1/sessions/{id}/policy"),
            Some(json!({"strategy": "manual"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let report = |platform: &str, position: u64| {
            json!({
                "platform": platform,
                "position_secs": position,
                "quality": "720p",
                "is_playing": true
            })
        };
        send(&router, "POST", &format!("/v1/sessions/{id}/sync"), Some(report("web", 30))).await;
        let (_, outcome) = send(
            &router,
            "POST",
            &format!("/v1/sessions/{id}/sync"),
            Some(report("ios", 200)),
        )
        .await;
        assert_eq!(outcome["pending_manual_resolution"], true);

        let (status, body) = send(
            &router,
            "POST",
            &format!("/v1/sessions/{id}/force-sync"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict_pending_manual_resolution");

        let (status, resolved) = send(
            &router,
            "POST",
            &format!("/v1/sessions/{id}/resolve"),
            Some(json!({
                "strategy": "manual",
                "manual_state": {"position_secs": 90, "quality": "720p", "is_playing": true}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["resolved_state"]["position_secs"], 90);
    }

    #[tokio::test]
    async fn events_stream_requires_known_session() {
        let router = router();
        let missing = SessionId::new();
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/sessions/{missing}/events"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let id = new_session(&router).await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/sessions/{id}/events?platform=ios"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
    }
}
