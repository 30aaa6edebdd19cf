use thiserror::Error;

use crate::proto::{ErrorBody, ErrorCode};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub fn invalid_value(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Map internal errors -> stable wire errors.
impl From<CoreError> for ErrorBody {
    fn from(e: CoreError) -> Self {
        let code = match &e {
            CoreError::InvalidConfig(_) | CoreError::InvalidValue { .. } => ErrorCode::InvalidConfig,
            CoreError::Io { .. } => ErrorCode::IoError,
            CoreError::Internal(_) => ErrorCode::Internal,
        };
        ErrorBody::new(code, e.to_string())
    }
}
