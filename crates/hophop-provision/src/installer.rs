use std::sync::Arc;

use reqwest::Client;
use tracing::{info, warn};

use hophop_core::config::{OwnerList, ServerConfig};
use hophop_utils::ProjectPaths;

use crate::errors::ProvisionError;
use crate::files::{write_doorstop_config, write_owner_list};
use crate::framework::{ensure_developer_mode, install_framework};
use crate::plugins::sync_plugins;
use crate::preflight::check_disk_space;
use crate::system::SystemController;

/// What a run of the installer did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallSummary {
    pub available_gb: f64,
    pub packages_ok: bool,
    pub game_ok: bool,
    pub framework_ok: bool,
    pub plugins_synced: Option<usize>,
    pub developer_mode: bool,
    pub owners: usize,
}

pub struct Installer {
    paths: ProjectPaths,
    config: ServerConfig,
    system: Arc<dyn SystemController>,
    client: Client,
    skip_downloads: bool,
}

impl Installer {
    pub fn new(
        paths: ProjectPaths,
        config: ServerConfig,
        system: Arc<dyn SystemController>,
        client: Client,
    ) -> Self {
        Self {
            paths,
            config,
            system,
            client,
            skip_downloads: false,
        }
    }

    /// Skip the package, game and framework steps (local file steps only).
    pub fn skip_downloads(mut self, skip: bool) -> Self {
        self.skip_downloads = skip;
        self
    }

    /// Disk preflight is fatal; package, game and framework steps are
    /// best-effort; plugin sync and file writes propagate their errors.
    pub async fn run(&self) -> Result<InstallSummary, ProvisionError> {
        self.paths.ensure_runtime_dirs()?;
        let mut summary = InstallSummary {
            available_gb: check_disk_space(&self.paths.root, self.config.required_gb)?,
            ..InstallSummary::default()
        };

        if !self.skip_downloads {
            summary.packages_ok = best_effort("system packages", self.system.install_packages().await);
            summary.game_ok = best_effort(
                "game server update",
                self.system
                    .app_update(&self.paths.server_dir, self.config.rust_id, self.config.branch)
                    .await,
            );
            summary.framework_ok = best_effort(
                "framework install",
                install_framework(&self.client, &self.paths, self.config.branch).await,
            );
        }

        if self.config.sync_plugins {
            let scripts = self.paths.scripts_dir.clone();
            let plugins = self.paths.plugins_dir();
            let copied = tokio::task::spawn_blocking(move || sync_plugins(&scripts, &plugins))
                .await
                .map_err(|err| ProvisionError::Invalid(format!("plugin sync task failed: {err}")))??;
            info!("synced {copied} plugin files");
            summary.plugins_synced = Some(copied);
        }

        summary.developer_mode = ensure_developer_mode(&self.paths.carbon_config_path())?;
        if summary.developer_mode {
            info!("framework DeveloperMode enabled");
        } else {
            info!(
                "framework config not found at {}",
                self.paths.carbon_config_path().display()
            );
        }

        write_doorstop_config(&self.paths.doorstop_config_path())?;
        let owners = OwnerList::load(&self.paths.owners_path)?;
        summary.owners = write_owner_list(&self.paths.users_cfg_path(), &owners)?;
        info!("wrote {} owner entries", summary.owners);

        Ok(summary)
    }
}

fn best_effort(step: &str, result: Result<(), ProvisionError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!("{step} failed: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{ServiceAction, ServiceStatus};
    use async_trait::async_trait;
    use hophop_core::config::Branch;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("hophop-installer-{prefix}-{nanos}"))
    }

    #[derive(Default)]
    struct FakeSystem {
        calls: Mutex<Vec<String>>,
    }

    impl FakeSystem {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls").clone()
        }
    }

    #[async_trait]
    impl SystemController for FakeSystem {
        async fn install_packages(&self) -> Result<(), ProvisionError> {
            self.calls.lock().expect("calls").push("packages".into());
            Err(ProvisionError::Invalid("apt unavailable".into()))
        }

        async fn app_update(&self, _dir: &Path, app_id: u32, branch: Branch) -> Result<(), ProvisionError> {
            self.calls
                .lock()
                .expect("calls")
                .push(format!("app_update {app_id} {branch}"));
            Ok(())
        }

        async fn service_control(&self, _action: ServiceAction) -> Result<(), ProvisionError> {
            Ok(())
        }

        async fn service_status(&self) -> Result<ServiceStatus, ProvisionError> {
            Ok(ServiceStatus {
                state: "inactive".into(),
                since: None,
                raw: String::new(),
            })
        }

        async fn service_enabled(&self) -> Result<bool, ProvisionError> {
            Ok(false)
        }

        async fn tail_logs(&self, _lines: usize) -> Result<Vec<String>, ProvisionError> {
            Ok(Vec::new())
        }
    }

    fn seed_project(prefix: &str) -> ProjectPaths {
        let paths = ProjectPaths::new(unique_temp_dir(prefix));
        std::fs::create_dir_all(&paths.scripts_dir).expect("scripts");
        std::fs::write(paths.scripts_dir.join("build.cs"), "class Build {}").expect("plugin");
        std::fs::write(paths.scripts_dir.join("settings.cs"), "class Settings {}").expect("plugin");
        std::fs::create_dir_all(paths.carbon_dir()).expect("carbon");
        std::fs::write(paths.carbon_config_path(), r#"{"DeveloperMode":false,"Language":"en"}"#)
            .expect("config");
        std::fs::write(
            &paths.owners_path,
            "[[owner]]\nid = 76561198000000001\nname = \"first\"\n",
        )
        .expect("owners");
        paths
    }

    fn config() -> ServerConfig {
        let mut config = ServerConfig::from_lookup(|_| None).expect("config");
        config.required_gb = 0;
        config
    }

    #[tokio::test]
    async fn second_run_converges_to_the_same_tree() {
        let paths = seed_project("idempotent");
        let system = Arc::new(FakeSystem::default());
        let installer = Installer::new(paths.clone(), config(), system.clone(), Client::new())
            .skip_downloads(true);

        let first = installer.run().await.expect("first run");
        let second = installer.run().await.expect("second run");

        assert_eq!(first.plugins_synced, Some(2));
        assert_eq!(
            InstallSummary { available_gb: 0.0, ..first },
            InstallSummary { available_gb: 0.0, ..second.clone() }
        );
        assert!(second.developer_mode);
        assert_eq!(second.owners, 1);
        assert!(system.calls().is_empty());

        let config: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(paths.carbon_config_path()).expect("read config"),
        )
        .expect("json");
        assert_eq!(config["DeveloperMode"], true);
        assert_eq!(config["Language"], "en");
        assert!(paths.plugins_dir().join("settings.cs").exists());
        assert!(paths.doorstop_config_path().exists());
        assert_eq!(
            std::fs::read_to_string(paths.users_cfg_path()).expect("users"),
            "ownerid 76561198000000001 \"first\"\n"
        );
        let _ = std::fs::remove_dir_all(&paths.root);
    }

    #[tokio::test]
    async fn disk_preflight_is_fatal() {
        let paths = seed_project("disk");
        let mut config = config();
        config.required_gb = u64::MAX / 2;
        let installer = Installer::new(paths.clone(), config, Arc::new(FakeSystem::default()), Client::new());

        let err = installer.run().await.expect_err("preflight");
        assert!(matches!(err, ProvisionError::InsufficientDiskSpace { .. }));
        assert!(!paths.plugins_dir().exists());
        let _ = std::fs::remove_dir_all(&paths.root);
    }

    #[tokio::test]
    async fn plugin_sync_can_be_disabled() {
        let paths = seed_project("nosync");
        let mut config = config();
        config.sync_plugins = false;
        let installer = Installer::new(paths.clone(), config, Arc::new(FakeSystem::default()), Client::new())
            .skip_downloads(true);

        let summary = installer.run().await.expect("run");
        assert_eq!(summary.plugins_synced, None);
        assert!(!paths.plugins_dir().exists());
        let _ = std::fs::remove_dir_all(&paths.root);
    }
}
