use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use hophop_core::config::{ConfigLayers, ServerConfig};
use hophop_provision::HostSystem;
use hophop_provision::fetch::http_client;
use hophop_rcon::{RconClient, RconSettings};
use hophop_utils::ProjectPaths;

/// Project paths plus the configuration resolved from them.
pub struct AppContext {
    pub paths: ProjectPaths,
    pub config: ServerConfig,
}

impl AppContext {
    pub fn load(root: Option<PathBuf>) -> Result<Self> {
        let paths = match root {
            Some(root) => ProjectPaths::new(root),
            None => ProjectPaths::discover().context("Failed to resolve the project root")?,
        };
        let layers = ConfigLayers::load(&paths.env_path, &paths.env_local_path)
            .with_context(|| format!("Failed to read env files under {}", paths.root.display()))?;
        let config = ServerConfig::from_layers(&layers).context("Invalid configuration")?;
        Ok(Self { paths, config })
    }

    pub fn host_system(&self) -> Result<Arc<HostSystem>> {
        let client = http_client()?;
        Ok(Arc::new(HostSystem::new(
            self.config.service_name.clone(),
            self.paths.steamcmd_dir.clone(),
            client,
        )))
    }

    pub fn rcon(&self) -> RconClient {
        RconClient::new(RconSettings::from_config(&self.config))
    }
}
