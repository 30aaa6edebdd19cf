use anyhow::{Context, Result};
use tracing::{info, warn};

use hophop_core::proto::ExitInfo;
use hophop_supervisor::{LaunchPlan, LogStore, Supervisor, SupervisorError};

use crate::commands::install;
use crate::context::AppContext;
use crate::signals::shutdown_signal;

const LOG_LINES: usize = 2000;

/// Runs the server in the foreground. Returns the process exit code: 0 after
/// a signal-driven shutdown, otherwise the server's own code.
pub async fn exec(ctx: &AppContext, skip_install: bool) -> Result<i32> {
    if skip_install {
        info!("skipping install");
    } else {
        install::run(ctx).await?;
    }

    let plan = LaunchPlan::from_config(&ctx.config, &ctx.paths);
    info!("launching {}", plan.display_command());

    let supervisor = Supervisor::new(LogStore::new(LOG_LINES, true));
    let pid = supervisor
        .start(plan)
        .await
        .context("Failed to start the game server")?;
    info!(pid, "game server started");

    let rcon = ctx.rcon();
    rcon.spawn_connect();

    let code = tokio::select! {
        exit = supervisor.wait() => {
            let exit = exit?;
            info!(code = ?exit.code, signal = ?exit.signal, "game server exited");
            exit_code(exit)
        }
        signal = shutdown_signal() => {
            signal?;
            info!("stopping game server");
            match supervisor.stop(Some(&rcon)).await {
                Ok(exit) => info!(code = ?exit.code, "game server stopped"),
                Err(SupervisorError::NotRunning) => {}
                Err(err) => warn!("stop failed: {err}"),
            }
            0
        }
    };

    rcon.disconnect().await;
    Ok(code)
}

fn exit_code(exit: ExitInfo) -> i32 {
    match exit.code {
        Some(code) => code,
        None if exit.success() => 0,
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_child() {
        assert_eq!(exit_code(ExitInfo { code: Some(0), signal: None }), 0);
        assert_eq!(exit_code(ExitInfo { code: Some(3), signal: None }), 3);
        assert_eq!(exit_code(ExitInfo { code: None, signal: Some(9) }), 1);
    }
}
