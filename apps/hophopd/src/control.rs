use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use hophop_core::config::RunMode;
use hophop_core::proto::{ControlAction, ControlStatus};
use hophop_provision::system::format_uptime;
use hophop_provision::{ScreenSession, ServiceAction, SystemController};
use hophop_supervisor::{LaunchPlan, QUIT_GRACE, RESTART_DELAY, Supervisor, SupervisorError};

use crate::context::AppContext;
use crate::error::ApiError;

/// Lines of recent output included in a status answer.
pub const STARTUP_LOG_LINES: usize = 50;

/// Where the game server lives, picked from `RUN_MODE` at startup.
pub enum ControlBackend {
    /// Child of this daemon.
    Supervised(Supervisor),
    /// Detached `screen` session running `hophop up`.
    Screen { session: ScreenSession, exe: PathBuf },
    /// systemd unit running `hophop up`.
    Service {
        name: String,
        system: Arc<dyn SystemController>,
    },
}

impl ControlBackend {
    pub fn mode(&self) -> RunMode {
        match self {
            ControlBackend::Supervised(_) => RunMode::Foreground,
            ControlBackend::Screen { .. } => RunMode::Screen,
            ControlBackend::Service { .. } => RunMode::Systemd,
        }
    }
}

/// Answer to a control request.
pub enum ControlReply {
    Message(String),
    Status(ControlStatus),
}

pub async fn perform(ctx: &AppContext, action: ControlAction) -> Result<ControlReply, ApiError> {
    info!(?action, mode = ?ctx.control.mode(), "server control requested");
    let reply = match action {
        ControlAction::Start => ControlReply::Message(start(ctx).await?),
        ControlAction::Stop => ControlReply::Message(stop(ctx).await?),
        ControlAction::Restart => ControlReply::Message(restart(ctx).await?),
        ControlAction::Status => ControlReply::Status(status(ctx).await?),
    };
    Ok(reply)
}

fn launch_plan(ctx: &AppContext) -> LaunchPlan {
    LaunchPlan::from_config(&ctx.config.server_config(), &ctx.paths)
}

async fn start(ctx: &AppContext) -> Result<String, ApiError> {
    match &ctx.control {
        ControlBackend::Supervised(supervisor) => {
            let pid = supervisor.start(launch_plan(ctx)).await?;
            Ok(format!("Server started (pid {pid})"))
        }
        ControlBackend::Screen { session, exe } => {
            if session.is_running().await? {
                return Err(SupervisorError::AlreadyRunning.into());
            }
            session.start(exe, &ctx.paths.root).await?;
            Ok(format!("Server started in screen session {}", session.name()))
        }
        ControlBackend::Service { name, system } => {
            system.service_control(ServiceAction::Start).await?;
            Ok(format!("Service {name} started"))
        }
    }
}

async fn stop(ctx: &AppContext) -> Result<String, ApiError> {
    match &ctx.control {
        ControlBackend::Supervised(supervisor) => {
            let exit = supervisor.stop(Some(&ctx.rcon)).await?;
            Ok(match exit.code {
                Some(code) => format!("Server stopped (exit code {code})"),
                None => "Server stopped".to_string(),
            })
        }
        ControlBackend::Screen { session, .. } => {
            if !session.is_running().await? {
                return Err(SupervisorError::NotRunning.into());
            }
            if ctx.rcon.is_connected() {
                ctx.rcon.send_detached("quit");
                sleep(QUIT_GRACE).await;
            }
            if session.is_running().await? {
                session.stop().await?;
            }
            Ok(format!("Screen session {} stopped", session.name()))
        }
        ControlBackend::Service { name, system } => {
            system.service_control(ServiceAction::Stop).await?;
            Ok(format!("Service {name} stopped"))
        }
    }
}

async fn restart(ctx: &AppContext) -> Result<String, ApiError> {
    match &ctx.control {
        ControlBackend::Supervised(supervisor) => {
            let pid = supervisor.restart(launch_plan(ctx), Some(&ctx.rcon)).await?;
            Ok(format!("Server restarted (pid {pid})"))
        }
        ControlBackend::Screen { .. } => {
            match stop(ctx).await {
                Ok(_) | Err(ApiError::Supervisor(SupervisorError::NotRunning)) => {}
                Err(err) => return Err(err),
            }
            sleep(RESTART_DELAY).await;
            start(ctx).await
        }
        ControlBackend::Service { name, system } => {
            system.service_control(ServiceAction::Restart).await?;
            Ok(format!("Service {name} restarted"))
        }
    }
}

async fn status(ctx: &AppContext) -> Result<ControlStatus, ApiError> {
    match &ctx.control {
        ControlBackend::Supervised(supervisor) => {
            let state = supervisor.status().await;
            Ok(ControlStatus {
                running: supervisor.is_running().await,
                state: state.label().to_string(),
                startup_logs: supervisor.logs().tail_server_text(STARTUP_LOG_LINES),
                uptime: supervisor.uptime().await.map(format_uptime),
                enabled: None,
            })
        }
        ControlBackend::Screen { session, .. } => {
            let running = session.is_running().await?;
            let startup_logs = if running {
                hardcopy_tail(session, ctx).await
            } else {
                Vec::new()
            };
            Ok(ControlStatus {
                running,
                state: if running { "running" } else { "stopped" }.to_string(),
                startup_logs,
                uptime: None,
                enabled: None,
            })
        }
        ControlBackend::Service { system, .. } => {
            let status = system.service_status().await?;
            let startup_logs = system
                .tail_logs(STARTUP_LOG_LINES)
                .await
                .unwrap_or_else(|err| {
                    warn!("journal unavailable: {err}");
                    Vec::new()
                });
            Ok(ControlStatus {
                running: status.is_active(),
                uptime: status.uptime(Utc::now()).map(format_uptime),
                state: status.state,
                startup_logs,
                enabled: system.service_enabled().await.ok(),
            })
        }
    }
}

async fn hardcopy_tail(session: &ScreenSession, ctx: &AppContext) -> Vec<String> {
    match session.hardcopy(&ctx.paths.tmp_dir).await {
        Ok(lines) => {
            let skip = lines.len().saturating_sub(STARTUP_LOG_LINES);
            lines.into_iter().skip(skip).collect()
        }
        Err(err) => {
            warn!("screen hardcopy failed: {err}");
            Vec::new()
        }
    }
}
