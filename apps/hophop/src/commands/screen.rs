use anyhow::{Context, Result, bail};

use hophop_provision::ScreenSession;

use crate::context::AppContext;

pub async fn exec(ctx: &AppContext, stop: bool) -> Result<()> {
    let session = ScreenSession::new(ctx.config.screen_name());

    if stop {
        if !session.is_running().await? {
            println!("Screen session {} is not running.", session.name());
            return Ok(());
        }
        session.stop().await?;
        println!("Screen session {} stopped.", session.name());
        return Ok(());
    }

    if session.is_running().await? {
        bail!("Screen session {} is already running", session.name());
    }
    let exe = std::env::current_exe().context("Failed to resolve hophop path")?;
    session.start(&exe, &ctx.paths.root).await?;
    println!("Server started in screen session {}.", session.name());
    println!("Attach with: screen -r {}", session.name());
    Ok(())
}
