use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

use hophop_core::proto::{ControlNotice, ControlPhase, ExitInfo, ServerState};
use hophop_utils::now_millis;

use crate::logs::LogStore;
use crate::state::SharedState;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub(crate) type ExitSender = Arc<watch::Sender<Option<(u64, ExitInfo)>>>;

pub(crate) fn exit_info(status: ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code(),
        signal: status.signal(),
    }
}

/// Watches the child of run `run` until it exits, then records the outcome.
pub(crate) fn spawn_monitor(
    state: SharedState,
    run: u64,
    exits: ExitSender,
    events: broadcast::Sender<ControlNotice>,
    logs: LogStore,
) {
    tokio::spawn(async move {
        loop {
            sleep(POLL_INTERVAL).await;

            let mut guard = state.lock().await;
            if guard.run != run {
                return;
            }
            let Some(child) = guard.child.as_mut() else {
                return;
            };
            let status = match child.try_wait() {
                Ok(Some(status)) => status,
                Ok(None) => continue,
                Err(err) => {
                    warn!("failed to poll server process: {err}");
                    continue;
                }
            };

            let exit = exit_info(status);
            let at_ms = now_millis();
            guard.child = None;
            guard.started_at_ms = None;

            let notice = if guard.stop_requested || exit.success() {
                guard.status = ServerState::Stopped { exit, at_ms };
                info!(code = ?exit.code, signal = ?exit.signal, "server stopped");
                logs.push_daemon(format!("server stopped: exit_code={:?}", exit.code));
                ControlNotice {
                    status: ControlPhase::Stopped,
                    message: "Server stopped".into(),
                }
            } else {
                guard.status = ServerState::Crashed { exit, at_ms };
                warn!(code = ?exit.code, signal = ?exit.signal, "server crashed");
                logs.push_daemon(format!(
                    "server crashed: exit_code={:?} signal={:?}",
                    exit.code, exit.signal
                ));
                ControlNotice {
                    status: ControlPhase::Error,
                    message: match (exit.code, exit.signal) {
                        (Some(code), _) => format!("Server exited with code {code}"),
                        (None, Some(signal)) => format!("Server killed by signal {signal}"),
                        (None, None) => "Server exited unexpectedly".into(),
                    },
                }
            };
            drop(guard);

            let _ = events.send(notice);
            exits.send_replace(Some((run, exit)));
            return;
        }
    });
}
