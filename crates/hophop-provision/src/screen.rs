use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use hophop_utils::ROOT_ENV;

use crate::errors::ProvisionError;
use crate::system::{command_error, run_checked};

/// A detached `screen` session hosting `hophop up`.
#[derive(Debug, Clone)]
pub struct ScreenSession {
    name: String,
}

impl ScreenSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn start(&self, exe: &Path, project_root: &Path) -> Result<(), ProvisionError> {
        if self.is_running().await? {
            return Err(ProvisionError::Invalid(format!(
                "screen session {} already running",
                self.name
            )));
        }
        let mut cmd = Command::new("screen");
        cmd.args(["-dmS", self.name.as_str()])
            .arg(exe)
            .arg("up")
            .current_dir(project_root)
            .env(ROOT_ENV, project_root);
        run_checked(cmd).await?;
        info!("started screen session {}", self.name);
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ProvisionError> {
        let mut cmd = Command::new("screen");
        cmd.args(["-S", self.name.as_str(), "-X", "quit"]);
        run_checked(cmd).await?;
        Ok(())
    }

    pub async fn is_running(&self) -> Result<bool, ProvisionError> {
        // `screen -ls` exits 1 when there are no sessions at all.
        let output = Command::new("screen")
            .arg("-ls")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| command_error("screen", err))?;
        Ok(session_listed(&String::from_utf8_lossy(&output.stdout), &self.name))
    }

    /// Dumps the session's visible window into `dir` and returns its lines.
    pub async fn hardcopy(&self, dir: &Path) -> Result<Vec<String>, ProvisionError> {
        let path: PathBuf = dir.join(format!("{}.hardcopy", self.name));
        let mut cmd = Command::new("screen");
        cmd.args(["-S", self.name.as_str(), "-X", "hardcopy"]).arg(&path);
        run_checked(cmd).await?;
        let body = tokio::fs::read_to_string(&path).await?;
        let _ = tokio::fs::remove_file(&path).await;
        Ok(body
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Sessions are listed as `\t<pid>.<name>\t(<date>)\t(Detached)`.
pub fn session_listed(listing: &str, name: &str) -> bool {
    listing.lines().any(|line| {
        line.split_whitespace()
            .next()
            .and_then(|id| id.split_once('.'))
            .is_some_and(|(pid, session)| {
                session == name && pid.chars().all(|c| c.is_ascii_digit())
            })
    })
}
