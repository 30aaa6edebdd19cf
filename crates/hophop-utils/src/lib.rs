use std::path::{Path, PathBuf};

/// Environment variable that pins the project root. Every path the bundle
/// touches (env files, server install, plugin sources) hangs off this root.
pub const ROOT_ENV: &str = "HOPHOP_ROOT";

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub env_path: PathBuf,
    pub env_local_path: PathBuf,
    pub owners_path: PathBuf,
    pub server_dir: PathBuf,
    pub steamcmd_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub lock_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let tmp_dir = root.join("tmp");
        Self {
            env_path: root.join(".env"),
            env_local_path: root.join(".env.local"),
            owners_path: root.join("owners.toml"),
            server_dir: root.join("rust_server"),
            steamcmd_dir: root.join("steam_cmd"),
            scripts_dir: root.join("scripts"),
            lock_path: tmp_dir.join("hophopd.lock"),
            tmp_dir,
            root,
        }
    }

    /// `$HOPHOP_ROOT` if set, otherwise the current working directory.
    pub fn discover() -> std::io::Result<Self> {
        if let Some(root) = std::env::var_os(ROOT_ENV) {
            if !root.is_empty() {
                return Ok(Self::new(PathBuf::from(root)));
            }
        }
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn server_binary(&self) -> PathBuf {
        self.server_dir.join("RustDedicated")
    }

    pub fn carbon_dir(&self) -> PathBuf {
        self.server_dir.join("carbon")
    }

    pub fn carbon_config_path(&self) -> PathBuf {
        self.carbon_dir().join("config.json")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.carbon_dir().join("plugins")
    }

    pub fn plugin_configs_dir(&self) -> PathBuf {
        self.carbon_dir().join("configs")
    }

    pub fn plugin_data_dir(&self) -> PathBuf {
        self.carbon_dir().join("data")
    }

    pub fn plugin_lang_dir(&self) -> PathBuf {
        self.carbon_dir().join("lang").join("en")
    }

    pub fn users_cfg_path(&self) -> PathBuf {
        self.server_dir
            .join("server")
            .join("carbon")
            .join("cfg")
            .join("users.cfg")
    }

    pub fn doorstop_config_path(&self) -> PathBuf {
        self.server_dir.join("doorstop_config.ini")
    }

    pub fn framework_archive_path(&self) -> PathBuf {
        self.tmp_dir.join("carbon.tar.gz")
    }

    /// Creates the runtime directories the installer writes into.
    pub fn ensure_runtime_dirs(&self) -> std::io::Result<()> {
        ensure_dir(&self.server_dir)?;
        ensure_dir(&self.steamcmd_dir)?;
        ensure_dir(&self.tmp_dir)
    }
}

pub fn ensure_dir(p: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(p)
}

pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::ProjectPaths;
    use std::path::PathBuf;

    #[test]
    fn every_path_hangs_off_the_project_root() {
        let paths = ProjectPaths::new("/srv/hophop");
        let root = PathBuf::from("/srv/hophop");

        assert_eq!(paths.env_local_path, root.join(".env.local"));
        assert_eq!(paths.plugins_dir(), root.join("rust_server/carbon/plugins"));
        assert_eq!(paths.plugin_lang_dir(), root.join("rust_server/carbon/lang/en"));
        assert_eq!(
            paths.users_cfg_path(),
            root.join("rust_server/server/carbon/cfg/users.cfg")
        );
        assert!(paths.lock_path.starts_with(&paths.tmp_dir));
    }
}
