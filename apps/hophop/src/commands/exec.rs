use anyhow::{Context, Result};
use tokio::time::{Duration, timeout};

use hophop_rcon::DEFAULT_EXECUTE_TIMEOUT;

use crate::context::AppContext;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn exec(ctx: &AppContext, command: &str) -> Result<()> {
    let rcon = ctx.rcon();
    let connected = timeout(CONNECT_TIMEOUT, rcon.connect()).await;
    if connected.is_err() {
        rcon.disconnect().await;
        anyhow::bail!(
            "Could not reach RCON at {}:{}",
            rcon.settings().host,
            rcon.settings().port
        );
    }

    let response = rcon
        .execute(command, DEFAULT_EXECUTE_TIMEOUT)
        .await
        .with_context(|| format!("RCON command `{command}` failed"));
    rcon.disconnect().await;

    println!("{}", response?);
    Ok(())
}
