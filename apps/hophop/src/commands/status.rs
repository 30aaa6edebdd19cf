use anyhow::Result;
use chrono::Utc;
use tokio::time::{Duration, timeout};

use hophop_core::config::RunMode;
use hophop_core::proto::StatusSnapshot;
use hophop_provision::system::format_uptime;
use hophop_provision::{ScreenSession, SystemController};
use hophop_rcon::DEFAULT_EXECUTE_TIMEOUT;

use crate::context::AppContext;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn exec(ctx: &AppContext) -> Result<()> {
    println!("Server: {}", ctx.config.server_name);
    println!("Branch: {}", ctx.config.branch);

    match ctx.config.run_mode {
        RunMode::Foreground => {}
        RunMode::Screen => {
            let session = ScreenSession::new(ctx.config.screen_name());
            let running = session.is_running().await?;
            println!(
                "Screen session {}: {}",
                session.name(),
                if running { "running" } else { "not running" }
            );
        }
        RunMode::Systemd => {
            let system = ctx.host_system()?;
            let status = system.service_status().await?;
            println!("Service {}: {}", ctx.config.service_name, status.state);
            if let Some(uptime) = status.uptime(Utc::now()) {
                println!("Uptime: {}", format_uptime(uptime));
            }
        }
    }

    let snapshot = query_snapshot(ctx).await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn query_snapshot(ctx: &AppContext) -> StatusSnapshot {
    let rcon = ctx.rcon();
    if timeout(CONNECT_TIMEOUT, rcon.connect()).await.is_err() {
        rcon.disconnect().await;
        return StatusSnapshot::offline();
    }
    let snapshot = match rcon.execute("serverinfo", DEFAULT_EXECUTE_TIMEOUT).await {
        Ok(body) => StatusSnapshot::from_serverinfo(&body),
        Err(_) => StatusSnapshot::online(),
    };
    rcon.disconnect().await;
    snapshot
}
