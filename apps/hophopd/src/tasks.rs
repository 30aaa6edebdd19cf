use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use hophop_core::proto::{ControlNotice, ControlPhase, DashboardEvent, StatusSnapshot};
use hophop_provision::HostSystem;
use hophop_rcon::{DEFAULT_EXECUTE_TIMEOUT, RconError, join_console_messages};
use hophop_supervisor::Supervisor;

use crate::context::{AppContext, SharedContext};

pub const CONSOLE_INTERVAL: Duration = Duration::from_secs(1);
pub const STATUS_INTERVAL: Duration = Duration::from_secs(30);
pub const CONSOLE_TAIL_COMMAND: &str = "console.tail 128";
pub const WAITING_MESSAGE: &str = "Waiting for server to start...";

/// `serverinfo` over RCON; offline when the console is down.
pub async fn query_status(ctx: &AppContext) -> StatusSnapshot {
    if !ctx.rcon.is_connected() {
        return StatusSnapshot::offline();
    }
    match ctx.rcon.execute("serverinfo", DEFAULT_EXECUTE_TIMEOUT).await {
        Ok(body) => StatusSnapshot::from_serverinfo(&body),
        Err(RconError::NotConnected) => StatusSnapshot::offline(),
        Err(err) => {
            debug!("serverinfo failed: {err}");
            StatusSnapshot::online()
        }
    }
}

pub async fn broadcast_status(ctx: &AppContext) {
    let snapshot = query_status(ctx).await;
    ctx.publish(DashboardEvent::ServerStatus(snapshot));
}

/// Starts every loop the dashboard needs. All of them end when the context's
/// shutdown token fires.
pub fn spawn_all(ctx: &SharedContext, journal: Option<Arc<HostSystem>>) {
    tokio::spawn(console_loop(ctx.clone()));
    tokio::spawn(status_loop(ctx.clone()));
    spawn_rcon_relay(ctx);
    if let crate::control::ControlBackend::Supervised(supervisor) = &ctx.control {
        tokio::spawn(supervisor_relay(ctx.clone(), supervisor.clone()));
    }
    if let Some(system) = journal {
        tokio::spawn(journal_relay(ctx.clone(), system));
    }
}

async fn console_loop(ctx: SharedContext) {
    let mut ticker = interval(CONSOLE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let content = if ctx.rcon.is_connected() {
            match ctx.rcon.execute(CONSOLE_TAIL_COMMAND, DEFAULT_EXECUTE_TIMEOUT).await {
                Ok(body) => join_console_messages(&body),
                Err(err) => {
                    debug!("console tail failed: {err}");
                    None
                }
            }
        } else {
            Some(WAITING_MESSAGE.to_string())
        };
        if let Some(content) = content {
            ctx.update_console(content);
        }
    }
}

async fn status_loop(ctx: SharedContext) {
    let mut ticker = interval(STATUS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if ctx.rcon.is_connected() {
            broadcast_status(&ctx).await;
        }
    }
}

/// Every RCON transition produces a fresh `server_status`. The observer only
/// forwards the flag, so the client does not hold the context alive.
fn spawn_rcon_relay(ctx: &SharedContext) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    ctx.rcon.on_state_change(move |connected| {
        let _ = tx.send(connected);
    });
    let ctx = ctx.clone();
    tokio::spawn(async move {
        loop {
            let connected = tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(connected) => connected,
                    None => break,
                },
            };
            info!(connected, "RCON state changed");
            if connected {
                broadcast_status(&ctx).await;
            } else {
                ctx.publish(DashboardEvent::ServerStatus(StatusSnapshot::offline()));
            }
        }
    });
}

fn startup_line(line: String) -> DashboardEvent {
    DashboardEvent::ServerControl(ControlNotice {
        status: ControlPhase::Starting,
        message: line,
    })
}

/// Lifecycle notices always; output lines only until RCON comes up.
async fn supervisor_relay(ctx: SharedContext, supervisor: Supervisor) {
    let mut notices = supervisor.subscribe();
    let mut lines = supervisor.logs().server_subscribe();
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            notice = notices.recv() => match notice {
                Ok(notice) => ctx.publish(DashboardEvent::ServerControl(notice)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.recv() => match line {
                Ok(line) if !ctx.rcon.is_connected() => ctx.publish(startup_line(line.line)),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn journal_relay(ctx: SharedContext, system: Arc<HostSystem>) {
    let mut child = match system.follow_journal() {
        Ok(child) => child,
        Err(err) => {
            warn!("journal follow unavailable: {err}");
            return;
        }
    };
    let Some(stdout) = child.stdout.take() else {
        return;
    };
    let mut reader = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            line = reader.next_line() => match line {
                Ok(Some(line)) => {
                    if !ctx.rcon.is_connected() {
                        ctx.publish(startup_line(line));
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("journal read failed: {err}");
                    break;
                }
            },
        }
    }
    let _ = child.kill().await;
}
