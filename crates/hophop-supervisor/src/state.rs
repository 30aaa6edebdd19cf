use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::Mutex;

use hophop_core::proto::ServerState;

pub type SharedState = Arc<Mutex<SupervisorState>>;

pub struct SupervisorState {
    pub(crate) status: ServerState,
    pub(crate) child: Option<Child>,
    /// Incremented per spawn; lets waiters match an exit to the run they
    /// asked about.
    pub(crate) run: u64,
    pub(crate) stop_requested: bool,
    pub(crate) started_at_ms: Option<u64>,
    // Serializes start/stop/restart
    pub(crate) lifecycle_lock: Arc<Mutex<()>>,
}

impl SupervisorState {
    pub fn new() -> Self {
        Self {
            status: ServerState::NotStarted {},
            child: None,
            run: 0,
            stop_requested: false,
            started_at_ms: None,
            lifecycle_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some() && self.status.is_live()
    }
}
