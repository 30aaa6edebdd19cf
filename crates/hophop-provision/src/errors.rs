use hophop_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("not enough disk space: need {required_gb}GB, only {available_gb:.2}GB available")]
    InsufficientDiskSpace { required_gb: u64, available_gb: f64 },

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("failed to extract {archive}: {message}")]
    Extract { archive: String, message: String },

    #[error("`{program}` failed: {message}")]
    Command { program: String, message: String },

    #[error("invalid plugin name: {0}")]
    InvalidName(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ProvisionError {
    pub(crate) fn download(url: &str, err: impl std::fmt::Display) -> Self {
        ProvisionError::Download {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}
