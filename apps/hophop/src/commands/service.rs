use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Subcommand;
use tokio::io::{AsyncBufReadExt, BufReader};

use hophop_provision::system::format_uptime;
use hophop_provision::{ServiceAction, SystemController, UnitSpec, install_unit, resolve_service_user};

use crate::context::AppContext;
use crate::signals::shutdown_signal;

#[derive(Subcommand)]
pub enum ServiceCommand {
    /// Write and enable the systemd unit running `hophop up`
    Install {
        /// Account the service runs as (defaults to $SUDO_USER, then $USER)
        #[arg(long)]
        user: Option<String>,
    },
    Start,
    Stop,
    Restart,
    Status,
    /// Print recent journal lines
    Logs {
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
        /// Keep following new lines
        #[arg(short, long)]
        follow: bool,
    },
}

pub async fn exec(ctx: &AppContext, command: ServiceCommand) -> Result<()> {
    if !cfg!(target_os = "linux") {
        bail!("Service management is only supported on Linux systemd hosts.");
    }

    let system = ctx.host_system()?;
    match command {
        ServiceCommand::Install { user } => {
            let spec = UnitSpec {
                service_name: ctx.config.service_name.clone(),
                exec_path: std::env::current_exe().context("Failed to resolve hophop path")?,
                project_root: ctx.paths.root.clone(),
                user: resolve_service_user(user),
            };
            let path = install_unit(&spec).await?;
            println!("Installed {}. Start it with `hophop service start`.", path.display());
        }
        ServiceCommand::Start => {
            system.service_control(ServiceAction::Start).await?;
            println!("{} started.", system.service_name());
        }
        ServiceCommand::Stop => {
            system.service_control(ServiceAction::Stop).await?;
            println!("{} stopped.", system.service_name());
        }
        ServiceCommand::Restart => {
            system.service_control(ServiceAction::Restart).await?;
            println!("{} restarted.", system.service_name());
        }
        ServiceCommand::Status => {
            let status = system.service_status().await?;
            let enabled = system.service_enabled().await.unwrap_or(false);
            println!("Service: {}", system.service_name());
            println!("State: {}", status.state);
            println!("Enabled: {}", if enabled { "yes" } else { "no" });
            if let Some(uptime) = status.uptime(Utc::now()) {
                println!("Uptime: {}", format_uptime(uptime));
            }
        }
        ServiceCommand::Logs { lines, follow } => {
            for line in system.tail_logs(lines).await? {
                println!("{line}");
            }
            if follow {
                let mut child = system.follow_journal()?;
                let stdout = child.stdout.take().context("journalctl has no stdout")?;
                let mut reader = BufReader::new(stdout).lines();
                let relay = async {
                    while let Some(line) = reader.next_line().await? {
                        println!("{line}");
                    }
                    Ok::<_, std::io::Error>(())
                };
                tokio::select! {
                    result = relay => result?,
                    signal = shutdown_signal() => signal?,
                }
            }
        }
    }
    Ok(())
}
