use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod context;
mod signals;

use crate::commands::service::ServiceCommand;
use crate::context::AppContext;

#[derive(Parser)]
#[command(name = "hophop")]
#[command(about = "Install, launch and operate a modded dedicated game server", long_about = None)]
struct Cli {
    /// Project root (defaults to $HOPHOP_ROOT, then the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or update the game server, framework and plugins
    Install,
    /// Install, then run the server in the foreground until it exits
    Up {
        /// Launch straight away without running the installer
        #[arg(long)]
        skip_install: bool,
    },
    /// Run `hophop up` inside a detached screen session
    Screen {
        /// Quit the session instead of starting it
        #[arg(long)]
        stop: bool,
    },
    /// Manage the systemd unit
    Service {
        #[command(subcommand)]
        command: ServiceCommand,
    },
    /// Execute a command via RCON
    Exec {
        /// Command to execute
        command: String,
    },
    /// Show server status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = AppContext::load(cli.root)?;

    match cli.command {
        Commands::Install => {
            commands::install::exec(&ctx).await?;
        }
        Commands::Up { skip_install } => {
            let code = commands::up::exec(&ctx, skip_install).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Screen { stop } => {
            commands::screen::exec(&ctx, stop).await?;
        }
        Commands::Service { command } => {
            commands::service::exec(&ctx, command).await?;
        }
        Commands::Exec { command } => {
            commands::exec::exec(&ctx, &command).await?;
        }
        Commands::Status => {
            commands::status::exec(&ctx).await?;
        }
    }

    Ok(())
}
