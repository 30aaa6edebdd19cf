use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use reqwest::Client;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use hophop_core::config::Branch;

use crate::errors::ProvisionError;
use crate::fetch::ensure_steamcmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// `ActiveState`-style word from the `Active:` line, e.g. `active`.
    pub state: String,
    pub since: Option<DateTime<Utc>>,
    pub raw: String,
}

impl ServiceStatus {
    pub fn is_active(&self) -> bool {
        self.state == "active"
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Option<Duration> {
        let since = self.since.filter(|_| self.is_active())?;
        (now - since).to_std().ok()
    }
}

/// Everything the bundle asks of the host OS. Kept narrow so the installer
/// and the dashboard can run against a fake.
#[async_trait]
pub trait SystemController: Send + Sync {
    async fn install_packages(&self) -> Result<(), ProvisionError>;
    async fn app_update(&self, install_dir: &Path, app_id: u32, branch: Branch) -> Result<(), ProvisionError>;
    async fn service_control(&self, action: ServiceAction) -> Result<(), ProvisionError>;
    async fn service_status(&self) -> Result<ServiceStatus, ProvisionError>;
    async fn service_enabled(&self) -> Result<bool, ProvisionError>;
    async fn tail_logs(&self, lines: usize) -> Result<Vec<String>, ProvisionError>;
}

/// apt, steamcmd, systemctl and journalctl on the local machine.
pub struct HostSystem {
    service_name: String,
    steamcmd_dir: PathBuf,
    client: Client,
}

impl HostSystem {
    pub fn new(service_name: impl Into<String>, steamcmd_dir: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            service_name: service_name.into(),
            steamcmd_dir: steamcmd_dir.into(),
            client,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// `journalctl -f` on the unit; the caller owns the child and its stdout.
    pub fn follow_journal(&self) -> Result<Child, ProvisionError> {
        let child = Command::new("journalctl")
            .args(["-u", self.service_name.as_str(), "-f", "-n", "0", "-o", "cat", "--no-pager"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| command_error("journalctl", err))?;
        Ok(child)
    }

    async fn steamcmd(&self) -> PathBuf {
        match ensure_steamcmd(&self.client, &self.steamcmd_dir).await {
            Ok(script) => script,
            Err(err) => {
                warn!("falling back to steamcmd from PATH: {err}");
                PathBuf::from("steamcmd")
            }
        }
    }
}

#[async_trait]
impl SystemController for HostSystem {
    async fn install_packages(&self) -> Result<(), ProvisionError> {
        let steps: [(&str, Vec<&str>); 4] = [
            ("add-apt-repository", vec!["multiverse", "-y"]),
            ("dpkg", vec!["--add-architecture", "i386"]),
            ("apt-get", vec!["update"]),
            (
                "sh",
                vec!["-c", "echo 'steamcmd steam/question select I AGREE' | debconf-set-selections"],
            ),
        ];
        let mut failures = Vec::new();
        for (program, args) in steps {
            if let Err(err) = run_checked(privileged(program, &args[..])).await {
                warn!("{err}");
                failures.push(program);
            }
        }

        let mut install = privileged("apt-get", &["install", "-y", "steamcmd"]);
        install.env("DEBIAN_FRONTEND", "noninteractive");
        run_checked(install).await?;
        info!("steamcmd package installed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProvisionError::Command {
                program: failures.join(", "),
                message: "package preparation steps failed".into(),
            })
        }
    }

    async fn app_update(&self, install_dir: &Path, app_id: u32, branch: Branch) -> Result<(), ProvisionError> {
        let steamcmd = self.steamcmd().await;
        let mut cmd = Command::new(&steamcmd);
        cmd.args(steamcmd_args(install_dir, app_id, branch));
        info!(%branch, "updating game server {app_id} via {}", steamcmd.display());
        run_checked(cmd).await?;
        Ok(())
    }

    async fn service_control(&self, action: ServiceAction) -> Result<(), ProvisionError> {
        run_checked(privileged("systemctl", &[action.as_str(), self.service_name.as_str()])).await?;
        Ok(())
    }

    async fn service_status(&self) -> Result<ServiceStatus, ProvisionError> {
        // `systemctl status` exits non-zero for inactive units; that is an
        // answer, not a failure.
        let output = Command::new("systemctl")
            .args(["status", self.service_name.as_str(), "--no-pager"])
            .env("LC_ALL", "C")
            .output()
            .await
            .map_err(|err| command_error("systemctl", err))?;
        Ok(parse_service_status(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn service_enabled(&self) -> Result<bool, ProvisionError> {
        let output = Command::new("systemctl")
            .args(["is-enabled", self.service_name.as_str()])
            .output()
            .await
            .map_err(|err| command_error("systemctl", err))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "enabled")
    }

    async fn tail_logs(&self, lines: usize) -> Result<Vec<String>, ProvisionError> {
        let count = lines.to_string();
        let mut cmd = Command::new("journalctl");
        cmd.args(["-u", self.service_name.as_str(), "-n", count.as_str(), "-o", "cat", "--no-pager"]);
        let stdout = run_checked(cmd).await?;
        Ok(stdout.lines().map(str::to_string).collect())
    }
}

pub fn steamcmd_args(install_dir: &Path, app_id: u32, branch: Branch) -> Vec<String> {
    let mut args = vec![
        "+force_install_dir".to_string(),
        install_dir.display().to_string(),
        "+login".into(),
        "anonymous".into(),
        "+app_update".into(),
        app_id.to_string(),
    ];
    if let Some(beta) = branch.beta_name() {
        args.push("-beta".into());
        args.push(beta.into());
    }
    args.push("validate".into());
    args.push("+quit".into());
    args
}

pub(crate) fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Prefixes `sudo` unless we already run as root.
pub(crate) fn privileged<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Command {
    let mut cmd = if is_root() {
        Command::new(program)
    } else {
        let mut cmd = Command::new("sudo");
        cmd.arg(program);
        cmd
    };
    cmd.args(args);
    cmd
}

pub(crate) fn command_error(program: &str, err: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::Command {
        program: program.to_string(),
        message: err.to_string(),
    }
}

/// Runs to completion; non-zero exit is an error carrying stderr.
pub(crate) async fn run_checked(mut cmd: Command) -> Result<String, ProvisionError> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| command_error(&program, err))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => format!("exited with {}", output.status),
            text => text.to_string(),
        };
        return Err(command_error(&program, message));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn parse_service_status(text: &str) -> ServiceStatus {
    let active_line = text
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("Active:"))
        .map(str::trim);
    let state = active_line
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or("unknown")
        .to_string();
    ServiceStatus {
        state,
        since: active_line.and_then(parse_active_since),
        raw: text.to_string(),
    }
}

/// Parses the timestamp of `active (running) since Tue 2024-01-02 03:04:05 UTC; 1h ago`.
/// Zones other than UTC/GMT are read as local time.
pub fn parse_active_since(line: &str) -> Option<DateTime<Utc>> {
    let (_, rest) = line.split_once(" since ")?;
    let stamp = rest.split(';').next()?.trim();
    let tokens: Vec<&str> = stamp.split_whitespace().collect();
    let date_idx = tokens
        .iter()
        .position(|token| NaiveDate::parse_from_str(token, "%Y-%m-%d").is_ok())?;
    let date = NaiveDate::parse_from_str(tokens[date_idx], "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(tokens.get(date_idx + 1)?, "%H:%M:%S").ok()?;
    let naive = NaiveDateTime::new(date, time);

    match tokens.get(date_idx + 2).copied() {
        Some("UTC") | Some("GMT") => Some(Utc.from_utc_datetime(&naive)),
        _ => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc)),
    }
}

/// `3d 4h 5m 6s`, dropping leading zero units.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        (total % 86_400) / 3_600,
        (total % 3_600) / 60,
        total % 60,
    );
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_RUNNING: &str = "\
● hophop.service - HopHop game server
     Loaded: loaded (/etc/systemd/system/hophop.service; enabled; preset: enabled)
     Active: active (running) since Tue 2024-01-02 03:04:05 UTC; 1h 2min ago
   Main PID: 4242 (hophop)
";

    #[test]
    fn steamcmd_beta_flag_only_for_beta_branches() {
        let dir = Path::new("/srv/hophop/rust_server");
        let master = steamcmd_args(dir, 258550, Branch::Master);
        assert_eq!(
            master,
            vec![
                "+force_install_dir",
                "/srv/hophop/rust_server",
                "+login",
                "anonymous",
                "+app_update",
                "258550",
                "validate",
                "+quit"
            ]
        );

        let staging = steamcmd_args(dir, 258550, Branch::Staging);
        let beta = staging.iter().position(|arg| arg == "-beta").expect("beta flag");
        assert_eq!(staging[beta + 1], "staging");
        assert_eq!(staging.last().map(String::as_str), Some("+quit"));
    }

    #[test]
    fn running_unit_reports_uptime() {
        let status = parse_service_status(STATUS_RUNNING);
        assert!(status.is_active());

        let since = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().expect("date");
        assert_eq!(status.since, Some(since));

        let now = since + chrono::Duration::seconds(3_725);
        assert_eq!(status.uptime(now), Some(Duration::from_secs(3_725)));
    }

    #[test]
    fn inactive_unit_has_no_uptime() {
        let status = parse_service_status(
            "     Active: inactive (dead) since Tue 2024-01-02 03:04:05 UTC; 5s ago\n",
        );
        assert_eq!(status.state, "inactive");
        assert_eq!(status.uptime(Utc::now()), None);

        let missing = parse_service_status("Unit hophop.service could not be found.\n");
        assert_eq!(missing.state, "unknown");
        assert!(missing.since.is_none());
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(42)), "42s");
        assert_eq!(format_uptime(Duration::from_secs(3_725)), "1h 2m 5s");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 1h 1m 1s");
    }
}
