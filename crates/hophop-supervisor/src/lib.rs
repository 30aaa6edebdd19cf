mod errors;
mod logs;
mod monitor;
mod plan;
mod server;
mod state;

pub use errors::SupervisorError;
pub use logs::{LogStore, LogWriter, LogWriterFactory};
pub use plan::LaunchPlan;
pub use server::{QUIT_GRACE, RESTART_DELAY, Supervisor, TERMINATE_GRACE};
