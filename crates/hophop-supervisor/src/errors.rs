use hophop_core::proto::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("server already running")]
    AlreadyRunning,

    #[error("server not running")]
    NotRunning,

    #[error("another lifecycle operation in progress")]
    Busy,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SupervisorError::AlreadyRunning => ErrorCode::ServerAlreadyRunning,
            SupervisorError::NotRunning => ErrorCode::ServerNotRunning,
            SupervisorError::Busy => ErrorCode::Internal,
            SupervisorError::Spawn { .. } | SupervisorError::Signal { .. } => ErrorCode::IoError,
        }
    }
}
