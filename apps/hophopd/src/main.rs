use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hophop_core::config::{RunMode, ServerConfig};
use hophop_provision::fetch::http_client;
use hophop_provision::{HostSystem, ScreenSession};
use hophop_rcon::{RconClient, RconSettings};
use hophop_supervisor::{LogStore, Supervisor, SupervisorError};
use hophop_utils::{ProjectPaths, ensure_dir};

mod config;
mod context;
mod control;
mod daemon;
mod error;
mod lock;
mod signals;
mod tasks;

use crate::config::ConfigStore;
use crate::context::AppContext;
use crate::control::ControlBackend;

const LOG_LINES: usize = 2000;

#[derive(Parser)]
#[command(name = "hophopd")]
#[command(about = "Web dashboard and control API for a hophop game server", long_about = None)]
struct Args {
    /// Listen address (defaults to DASHBOARD_BIND)
    #[arg(long)]
    bind: Option<String>,
    /// Project root (defaults to $HOPHOP_ROOT, then the current directory)
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logs = LogStore::new(LOG_LINES, false);
    tracing_subscriber::fmt()
        .with_writer(logs.daemon_writer())
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let paths = match args.root {
        Some(root) => ProjectPaths::new(root),
        None => ProjectPaths::discover().context("Failed to resolve the project root")?,
    };
    ensure_dir(&paths.tmp_dir)?;

    // single-instance lock
    let _guard = match lock::acquire_lock(&paths.lock_path) {
        Ok(guard) => guard,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            warn!("daemon already running (lock held), exiting");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to take the daemon lock"),
    };

    let config = ConfigStore::load(paths.clone()).context("Invalid configuration")?;
    let server_config = config.server_config();
    let (control, journal) = build_control(&server_config, &paths, &logs)?;
    let rcon = RconClient::new(RconSettings::from_config(&server_config));
    let ctx = Arc::new(AppContext::new(paths, config, rcon, control, logs));

    tasks::spawn_all(&ctx, journal);
    ctx.rcon.spawn_connect();

    let bind = args.bind.unwrap_or(server_config.dashboard_bind);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    let token = ctx.shutdown.clone();
    let shutdown = async move {
        if let Err(err) = signals::shutdown_signal().await {
            warn!("signal handling unavailable: {err}");
            std::future::pending::<()>().await;
        }
        token.cancel();
    };
    daemon::serve(listener, ctx.clone(), shutdown).await?;

    ctx.shutdown.cancel();
    if let ControlBackend::Supervised(supervisor) = &ctx.control {
        match supervisor.stop(Some(&ctx.rcon)).await {
            Ok(exit) => info!(code = ?exit.code, "game server stopped"),
            Err(SupervisorError::NotRunning) => {}
            Err(err) => warn!("failed to stop game server: {err}"),
        }
    }
    ctx.rcon.disconnect().await;
    info!("dashboard stopped");
    Ok(())
}

fn build_control(
    config: &ServerConfig,
    paths: &ProjectPaths,
    logs: &LogStore,
) -> Result<(ControlBackend, Option<Arc<HostSystem>>)> {
    let backend = match config.run_mode {
        RunMode::Foreground => (ControlBackend::Supervised(Supervisor::new(logs.clone())), None),
        RunMode::Screen => (
            ControlBackend::Screen {
                session: ScreenSession::new(config.screen_name()),
                exe: hophop_exe(),
            },
            None,
        ),
        RunMode::Systemd => {
            let system = Arc::new(HostSystem::new(
                config.service_name.clone(),
                paths.steamcmd_dir.clone(),
                http_client()?,
            ));
            (
                ControlBackend::Service {
                    name: config.service_name.clone(),
                    system: system.clone(),
                },
                Some(system),
            )
        }
    };
    info!(mode = ?config.run_mode, "control backend ready");
    Ok(backend)
}

/// The `hophop` binary installed next to this one, else whatever is on PATH.
fn hophop_exe() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("hophop")))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from("hophop"))
}
