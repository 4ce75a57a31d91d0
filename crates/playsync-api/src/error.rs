use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use playsync_core::Error as CoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Sync(#[from] CoreError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Sync(error) => match error {
                CoreError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
                CoreError::SessionTerminated(_) => (StatusCode::GONE, "session_terminated"),
                CoreError::SessionSuspended(_) => (StatusCode::CONFLICT, "session_suspended"),
                CoreError::PlatformNotRegistered(_) => {
                    (StatusCode::NOT_FOUND, "platform_not_registered")
                }
                CoreError::NoAuthorityDesignated => {
                    (StatusCode::BAD_REQUEST, "no_authority_designated")
                }
                CoreError::ConflictPendingManualResolution(_) => {
                    (StatusCode::CONFLICT, "conflict_pending_manual_resolution")
                }
                CoreError::ResolutionNotApplicable(_) => {
                    (StatusCode::CONFLICT, "resolution_not_applicable")
                }
                CoreError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
                CoreError::VideoNotFound(_) => (StatusCode::NOT_FOUND, "video_not_found"),
                CoreError::UserNotFound(_) => (StatusCode::FORBIDDEN, "user_not_found"),
                CoreError::Store(_) | CoreError::Lookup(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, "Request failed: {self}");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}
