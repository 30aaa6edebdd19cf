use std::sync::{RwLock, RwLockReadGuard};

use serde::Serialize;

use hophop_core::CoreError;
use hophop_core::config::{ConfigLayers, EnvMap, ServerConfig, write_env_file};
use hophop_utils::ProjectPaths;

/// What `GET /api/config` returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigView {
    pub current: EnvMap,
    pub defaults: EnvMap,
}

struct Loaded {
    layers: ConfigLayers,
    config: ServerConfig,
}

/// The env-file layers and the typed config resolved from them. Rewriting the
/// override file is the only way the config changes at runtime.
pub struct ConfigStore {
    paths: ProjectPaths,
    loaded: RwLock<Loaded>,
}

impl ConfigStore {
    pub fn load(paths: ProjectPaths) -> Result<Self, CoreError> {
        let loaded = read_layers(&paths)?;
        Ok(Self {
            paths,
            loaded: RwLock::new(loaded),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Loaded> {
        self.loaded.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn server_config(&self) -> ServerConfig {
        self.read().config.clone()
    }

    pub fn secret(&self) -> Option<String> {
        self.read().config.dashboard_secret.clone()
    }

    pub fn view(&self) -> ConfigView {
        let guard = self.read();
        ConfigView {
            current: guard.layers.current(),
            defaults: guard.layers.defaults.clone(),
        }
    }

    /// Replaces `.env.local` with `values` and reloads. A map that does not
    /// resolve to a valid config is rejected before anything is written.
    pub fn update(&self, values: EnvMap) -> Result<ServerConfig, CoreError> {
        let candidate = {
            let guard = self.read();
            ConfigLayers {
                defaults: guard.layers.defaults.clone(),
                overrides: Some(values.clone()),
            }
        };
        ServerConfig::from_layers(&candidate)?;
        write_env_file(&self.paths.env_local_path, &values)?;
        self.reload()
    }

    pub fn reload(&self) -> Result<ServerConfig, CoreError> {
        let loaded = read_layers(&self.paths)?;
        let config = loaded.config.clone();
        *self
            .loaded
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = loaded;
        Ok(config)
    }
}

fn read_layers(paths: &ProjectPaths) -> Result<Loaded, CoreError> {
    let layers = ConfigLayers::load(&paths.env_path, &paths.env_local_path)?;
    let config = ServerConfig::from_layers(&layers)?;
    Ok(Loaded { layers, config })
}
