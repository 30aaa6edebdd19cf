use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::envfile::{EnvMap, read_env_file};
use crate::CoreError;

/// The two env files backing the configuration: `.env` holds the defaults,
/// `.env.local` the operator's overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub defaults: EnvMap,
    pub overrides: Option<EnvMap>,
}

impl ConfigLayers {
    pub fn load(env_path: &Path, env_local_path: &Path) -> Result<Self, CoreError> {
        Ok(Self {
            defaults: read_env_file(env_path)?.unwrap_or_default(),
            overrides: read_env_file(env_local_path)?,
        })
    }

    /// The override layer as shown to operators; falls back to the defaults
    /// until an override file has been written.
    pub fn current(&self) -> EnvMap {
        self.overrides
            .clone()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Process environment wins over `.env.local`, which wins over `.env`.
    pub fn resolve(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().or_else(|| self.resolve_files(key))
    }

    pub fn resolve_files(&self, key: &str) -> Option<String> {
        self.overrides
            .as_ref()
            .and_then(|map| map.get(key))
            .or_else(|| self.defaults.get(key))
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    #[default]
    Master,
    Staging,
    Aux01,
    Aux02,
    Aux03,
    Edge,
    Preview,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Master => "master",
            Branch::Staging => "staging",
            Branch::Aux01 => "aux01",
            Branch::Aux02 => "aux02",
            Branch::Aux03 => "aux03",
            Branch::Edge => "edge",
            Branch::Preview => "preview",
        }
    }

    /// steamcmd `-beta` name; the default branch has none.
    pub fn beta_name(&self) -> Option<&'static str> {
        match self {
            Branch::Master => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Branch {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "master" => Ok(Branch::Master),
            "staging" => Ok(Branch::Staging),
            "aux01" => Ok(Branch::Aux01),
            "aux02" => Ok(Branch::Aux02),
            "aux03" => Ok(Branch::Aux03),
            "edge" => Ok(Branch::Edge),
            "preview" => Ok(Branch::Preview),
            other => Err(CoreError::invalid_value("RUST_BRANCH", other)),
        }
    }
}

/// How the game server process is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Supervised child of the current process.
    #[default]
    Foreground,
    /// Detached `screen` session running `hophop up`.
    Screen,
    /// systemd unit running `hophop up`.
    Systemd,
}

impl FromStr for RunMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "foreground" => Ok(RunMode::Foreground),
            "screen" => Ok(RunMode::Screen),
            "systemd" => Ok(RunMode::Systemd),
            other => Err(CoreError::invalid_value("RUN_MODE", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub rust_id: u32,
    pub required_gb: u64,
    pub branch: Branch,
    pub server_name: String,
    pub map_size: u32,
    pub map_seed: u32,
    pub server_port: u16,
    pub query_port: u16,
    pub rcon_port: u16,
    pub rcon_password: String,
    pub rcon_host: String,
    pub max_players: u32,
    pub level_url: String,
    pub app_port: u16,
    pub app_listen_ip: String,
    pub app_public_ip: String,
    pub run_mode: RunMode,
    pub service_name: String,
    pub sync_plugins: bool,
    pub dashboard_bind: String,
    pub dashboard_secret: Option<String>,
    pub dashboard_static_dir: String,
}

impl ServerConfig {
    /// Resolves every key through the layered sources (process env first).
    pub fn from_layers(layers: &ConfigLayers) -> Result<Self, CoreError> {
        Self::from_lookup(|key| layers.resolve(key))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = Source(lookup);
        let dashboard_secret = src
            .string("DASHBOARD_SECRET_KEY", "")
            .trim()
            .to_string();
        let dashboard_secret = if dashboard_secret.is_empty() {
            src.string("FLASK_SECRET_KEY", "").trim().to_string()
        } else {
            dashboard_secret
        };

        Ok(Self {
            rust_id: src.parse("RUST_ID", 258550)?,
            required_gb: src.parse("REQUIRED_GB", 20)?,
            branch: src.parse("RUST_BRANCH", Branch::Master)?,
            server_name: src.string("SERVER_NAME", "HopHop Build server | Main"),
            map_size: src.parse("SERVER_MAP_SIZE", 4800)?,
            map_seed: src.parse("SERVER_MAP_SEED", 12345)?,
            server_port: src.parse("SERVER_PORT", 28015)?,
            query_port: src.parse("SERVER_QUERY", 28016)?,
            rcon_port: src.parse("SERVER_RCON_PORT", 28017)?,
            rcon_password: src.string("SERVER_RCON_PASS", "avoid-unelected-thee"),
            rcon_host: src.string("RCON_HOST", "localhost"),
            max_players: src.parse("SERVER_MAX_PLAYERS", 8)?,
            level_url: src.string("SERVER_LEVEL_URL", ""),
            app_port: src.parse("APP_PORT", 28082)?,
            app_listen_ip: src.string("APP_LISTENIP", ""),
            app_public_ip: src.string("APP_PUBLICIP", ""),
            run_mode: src.parse("RUN_MODE", RunMode::Foreground)?,
            service_name: src.string("SERVICE_NAME", "hophop"),
            sync_plugins: src.flag("SYNC_PLUGINS", true)?,
            dashboard_bind: src.string("DASHBOARD_BIND", "0.0.0.0:5000"),
            dashboard_secret: (!dashboard_secret.is_empty()).then_some(dashboard_secret),
            dashboard_static_dir: src.string("DASHBOARD_STATIC_DIR", "web"),
        })
    }

    /// Session name for the detached `screen` wrapper, derived from the server
    /// name: lowercase, spaces to underscores, `|` and `"` dropped.
    pub fn screen_name(&self) -> String {
        self.server_name
            .to_lowercase()
            .replace(' ', "_")
            .replace(['|', '"'], "")
            .trim()
            .to_string()
    }
}

struct Source<F>(F);

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    /// Missing or blank values fall back to `default`.
    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, CoreError> {
        match (self.0)(key) {
            Some(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<T>()
                .map_err(|_| CoreError::invalid_value(key, &raw)),
            _ => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, CoreError> {
        match (self.0)(key) {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "" => Ok(default),
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(CoreError::invalid_value(key, &raw)),
            },
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ServerConfig::from_lookup(|_| None).expect("default config");

        assert_eq!(config.rust_id, 258550);
        assert_eq!(config.required_gb, 20);
        assert_eq!(config.branch, Branch::Master);
        assert_eq!(config.rcon_port, 28017);
        assert_eq!(config.app_port, 28082);
        assert_eq!(config.run_mode, RunMode::Foreground);
        assert!(config.sync_plugins);
        assert!(config.dashboard_secret.is_none());
    }

    #[test]
    fn typed_values_and_blank_numbers() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("RUST_BRANCH", "staging"),
            ("SERVER_MAX_PLAYERS", "50"),
            ("SERVER_MAP_SEED", "  "),
            ("RUN_MODE", "systemd"),
            ("SYNC_PLUGINS", "false"),
            ("FLASK_SECRET_KEY", "s3cret"),
        ]))
        .expect("config");

        assert_eq!(config.branch, Branch::Staging);
        assert_eq!(config.branch.beta_name(), Some("staging"));
        assert_eq!(config.max_players, 50);
        assert_eq!(config.map_seed, 12345);
        assert_eq!(config.run_mode, RunMode::Systemd);
        assert!(!config.sync_plugins);
        assert_eq!(config.dashboard_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("SERVER_PORT", "abc")]))
            .expect_err("port must be numeric");
        assert!(err.to_string().contains("SERVER_PORT"));
    }

    #[test]
    fn unknown_branch_is_rejected() {
        assert!("nightly".parse::<Branch>().is_err());
        assert_eq!("Preview".parse::<Branch>().expect("branch"), Branch::Preview);
    }

    #[test]
    fn override_layer_shadows_defaults() {
        let mut defaults = EnvMap::new();
        defaults.insert("SERVER_NAME".into(), "base".into());
        defaults.insert("SERVER_PORT".into(), "28015".into());
        let mut overrides = EnvMap::new();
        overrides.insert("SERVER_NAME".into(), "local".into());

        let layers = ConfigLayers {
            defaults: defaults.clone(),
            overrides: Some(overrides.clone()),
        };
        assert_eq!(layers.resolve_files("SERVER_NAME").as_deref(), Some("local"));
        assert_eq!(layers.resolve_files("SERVER_PORT").as_deref(), Some("28015"));
        assert_eq!(layers.current(), overrides);

        let bare = ConfigLayers { defaults: defaults.clone(), overrides: None };
        assert_eq!(bare.current(), defaults);
    }

    #[test]
    fn screen_name_is_shell_friendly() {
        let config = ServerConfig::from_lookup(|_| None).expect("config");
        assert_eq!(config.screen_name(), "hophop_build_server__main");
    }
}
