use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::ProvisionError;
use crate::system::{is_root, privileged, run_checked};

pub const UNIT_DIR: &str = "/etc/systemd/system";

/// Inputs for the systemd unit that runs `hophop up`.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub service_name: String,
    pub exec_path: PathBuf,
    pub project_root: PathBuf,
    pub user: Option<String>,
}

impl UnitSpec {
    pub fn unit_path(&self) -> PathBuf {
        Path::new(UNIT_DIR).join(format!("{}.service", self.service_name))
    }
}

pub fn build_unit_file(spec: &UnitSpec) -> String {
    let root = spec.project_root.display();
    let mut unit = String::new();
    unit.push_str("[Unit]\n");
    unit.push_str(&format!("Description=HopHop game server ({})\n", spec.service_name));
    unit.push_str("After=network-online.target\n");
    unit.push_str("Wants=network-online.target\n\n");
    unit.push_str("[Service]\n");
    unit.push_str("Type=simple\n");
    if let Some(user) = &spec.user {
        unit.push_str(&format!("User={user}\n"));
    }
    unit.push_str(&format!("WorkingDirectory={root}\n"));
    unit.push_str(&format!("ExecStart={} up\n", spec.exec_path.display()));
    unit.push_str("KillSignal=SIGTERM\n");
    unit.push_str("TimeoutStopSec=30\n");
    unit.push_str("Restart=on-failure\n");
    unit.push_str("RestartSec=5\n");
    unit.push_str(&format!("Environment=HOPHOP_ROOT={root}\n"));
    unit.push_str("Environment=RUST_LOG=info\n\n");
    unit.push_str("[Install]\n");
    unit.push_str("WantedBy=multi-user.target\n");
    unit
}

/// Explicit value, then `SUDO_USER`, then `USER`.
pub fn resolve_service_user(explicit: Option<String>) -> Option<String> {
    resolve_service_user_from(explicit, |key| std::env::var(key).ok())
}

fn resolve_service_user_from<F>(explicit: Option<String>, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .into_iter()
        .chain(["SUDO_USER", "USER"].into_iter().filter_map(|key| lookup(key)))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Writes the unit, reloads systemd and enables the service. Requires root.
pub async fn install_unit(spec: &UnitSpec) -> Result<PathBuf, ProvisionError> {
    if !is_root() {
        return Err(ProvisionError::Invalid(
            "service install requires root; re-run with sudo".into(),
        ));
    }
    let path = spec.unit_path();
    tokio::fs::write(&path, build_unit_file(spec)).await?;
    run_checked(privileged("systemctl", &["daemon-reload"])).await?;
    run_checked(privileged("systemctl", &["enable", spec.service_name.as_str()])).await?;
    info!("installed {}", path.display());
    Ok(path)
}
