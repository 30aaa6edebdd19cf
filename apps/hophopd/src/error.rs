use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use hophop_core::CoreError;
use hophop_core::proto::{ErrorBody, ErrorCode};
use hophop_provision::ProvisionError;
use hophop_rcon::RconError;
use hophop_supervisor::SupervisorError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Rcon(#[from] RconError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0}")]
    Internal(String),
}

// Extractor rejections are client mistakes; reported through the same
// `{error, code}` body as every other failure.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {err}"))
    }
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::BadRequest(_) => ErrorCode::BadRequest,
            ApiError::Unauthorized => ErrorCode::Unauthorized,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::Rcon(RconError::NotConnected) => ErrorCode::RconUnavailable,
            ApiError::Rcon(RconError::Timeout { .. }) => ErrorCode::Timeout,
            ApiError::Supervisor(err) => err.code(),
            ApiError::Provision(err) => match err {
                ProvisionError::InvalidName(_)
                | ProvisionError::Invalid(_)
                | ProvisionError::Json(_) => ErrorCode::BadRequest,
                ProvisionError::NotFound(_) => ErrorCode::NotFound,
                ProvisionError::Io(_) => ErrorCode::IoError,
                ProvisionError::Core(core) => core_code(core),
                _ => ErrorCode::Internal,
            },
            ApiError::Core(core) => core_code(core),
            ApiError::Internal(_) => ErrorCode::Internal,
        }
    }
}

fn core_code(err: &CoreError) -> ErrorCode {
    match err {
        CoreError::InvalidConfig(_) | CoreError::InvalidValue { .. } => ErrorCode::InvalidConfig,
        CoreError::Io { .. } => ErrorCode::IoError,
        CoreError::Internal(_) => ErrorCode::Internal,
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::BadRequest | ErrorCode::InvalidConfig => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::ServerAlreadyRunning | ErrorCode::ServerNotRunning => StatusCode::CONFLICT,
        ErrorCode::RconUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::IoError | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = status_for(code);
        if status.is_server_error() {
            warn!(%status, "request failed: {self}");
        }
        (status, Json(ErrorBody::new(code, self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rcon_failures_map_to_gateway_statuses() {
        assert_eq!(
            status_for(ApiError::Rcon(RconError::NotConnected).code()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let timeout = ApiError::Rcon(RconError::Timeout {
            command: "serverinfo".into(),
            timeout: Duration::from_secs(5),
        });
        assert_eq!(status_for(timeout.code()), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn plugin_errors_map_to_client_statuses() {
        let missing = ApiError::Provision(ProvisionError::NotFound("plugin source x.cs".into()));
        assert_eq!(status_for(missing.code()), StatusCode::NOT_FOUND);
        let bad = ApiError::Provision(ProvisionError::InvalidName("../x".into()));
        assert_eq!(status_for(bad.code()), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ApiError::Supervisor(SupervisorError::AlreadyRunning).code()),
            StatusCode::CONFLICT
        );
    }
}
