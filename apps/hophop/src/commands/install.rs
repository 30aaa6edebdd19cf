use anyhow::{Context, Result};

use hophop_provision::fetch::http_client;
use hophop_provision::{InstallSummary, Installer};

use crate::context::AppContext;

pub async fn exec(ctx: &AppContext) -> Result<()> {
    let summary = run(ctx).await?;
    print_summary(&summary);
    Ok(())
}

pub async fn run(ctx: &AppContext) -> Result<InstallSummary> {
    let system = ctx.host_system()?;
    let installer = Installer::new(ctx.paths.clone(), ctx.config.clone(), system, http_client()?);
    installer.run().await.context("Install failed")
}

fn print_summary(summary: &InstallSummary) {
    let mark = |ok: bool| if ok { "ok" } else { "FAILED (see log)" };
    println!("Disk space: {:.2}GB available", summary.available_gb);
    println!("System packages: {}", mark(summary.packages_ok));
    println!("Game server: {}", mark(summary.game_ok));
    println!("Framework: {}", mark(summary.framework_ok));
    match summary.plugins_synced {
        Some(count) => println!("Plugins: {count} files synced"),
        None => println!("Plugins: sync disabled"),
    }
    println!(
        "DeveloperMode: {}",
        if summary.developer_mode { "enabled" } else { "no framework config yet" }
    );
    println!("Owners: {}", summary.owners);
}
