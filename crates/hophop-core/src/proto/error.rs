use serde::{Deserialize, Serialize};

/// JSON error payload returned by every dashboard endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    NotFound,

    ServerAlreadyRunning,
    ServerNotRunning,

    RconUnavailable,
    Timeout,

    InvalidConfig,
    IoError,

    Internal,
}
