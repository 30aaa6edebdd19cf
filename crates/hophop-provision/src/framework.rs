use std::path::Path;

use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{info, warn};

use hophop_core::config::Branch;
use hophop_utils::ProjectPaths;

use crate::errors::ProvisionError;
use crate::fetch::{download_to, extract_tar_gz};

const RELEASES_BASE: &str = "https://github.com/CarbonCommunity/Carbon/releases/download";

/// Release asset for the framework build matching a game branch. Beta
/// branches get debug builds, the default branch the production release.
pub fn framework_url(branch: Branch) -> String {
    let asset = match branch {
        Branch::Staging => "rustbeta_staging_build/Carbon.Linux.Debug.tar.gz",
        Branch::Aux01 => "rustbeta_aux01_build/Carbon.Linux.Debug.tar.gz",
        Branch::Aux02 => "rustbeta_aux02_build/Carbon.Linux.Debug.tar.gz",
        Branch::Aux03 => "rustbeta_aux03_build/Carbon.Linux.Debug.tar.gz",
        Branch::Edge => "edge_build/Carbon.Linux.Debug.tar.gz",
        Branch::Preview => "preview_build/Carbon.Linux.Debug.tar.gz",
        Branch::Master => "production_build/Carbon.Linux.Release.tar.gz",
    };
    format!("{RELEASES_BASE}/{asset}")
}

fn read_config(path: &Path) -> Result<Map<String, Value>, ProvisionError> {
    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(ProvisionError::Invalid(format!(
            "{} is not a JSON object",
            path.display()
        ))),
    }
}

fn write_config(path: &Path, map: &Map<String, Value>) -> Result<(), ProvisionError> {
    let body = serde_json::to_string_pretty(map)?;
    std::fs::write(path, body)?;
    Ok(())
}

/// Reads the framework config (if any) with `DeveloperMode` forced on.
pub fn backup_config(path: &Path) -> Result<Option<Map<String, Value>>, ProvisionError> {
    if !path.exists() {
        return Ok(None);
    }
    let mut map = read_config(path)?;
    map.insert("DeveloperMode".into(), Value::Bool(true));
    Ok(Some(map))
}

/// Sets `DeveloperMode=true`, leaving every other key alone. Returns `false`
/// when there is no config file to patch.
pub fn ensure_developer_mode(path: &Path) -> Result<bool, ProvisionError> {
    let Some(map) = backup_config(path)? else {
        return Ok(false);
    };
    write_config(path, &map)?;
    Ok(true)
}

/// Replaces the installed framework with a fresh download for `branch`,
/// carrying the previous config across.
pub async fn install_framework(
    client: &Client,
    paths: &ProjectPaths,
    branch: Branch,
) -> Result<(), ProvisionError> {
    let carbon_dir = paths.carbon_dir();
    let config_path = paths.carbon_config_path();
    let archive = paths.framework_archive_path();

    let backup = match backup_config(&config_path) {
        Ok(value) => {
            if value.is_some() {
                info!("backed up framework config");
            }
            value
        }
        Err(err) => {
            warn!("could not back up framework config: {err}");
            None
        }
    };

    info!("removing previous framework install");
    if tokio::fs::try_exists(&carbon_dir).await? {
        tokio::fs::remove_dir_all(&carbon_dir).await?;
    }
    if tokio::fs::try_exists(&archive).await? {
        tokio::fs::remove_file(&archive).await?;
    }

    let url = framework_url(branch);
    info!(%branch, "downloading framework from {url}");
    download_to(client, &url, &archive).await?;
    info!("extracting framework into {}", paths.server_dir.display());
    extract_tar_gz(&archive, &paths.server_dir).await?;

    match backup {
        Some(map) => {
            write_config(&config_path, &map)?;
            info!("restored framework config with DeveloperMode enabled");
        }
        None => {
            if ensure_developer_mode(&config_path)? {
                info!("enabled DeveloperMode in fresh framework config");
            }
        }
    }
    Ok(())
}
