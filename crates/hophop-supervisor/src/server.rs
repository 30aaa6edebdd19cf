use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast, watch};
use tokio::time::{Duration, sleep, timeout};
use tracing::{info, warn};

use hophop_core::proto::{ControlNotice, ControlPhase, ExitInfo, LogStream, ServerState};
use hophop_rcon::RconClient;
use hophop_utils::now_millis;

use crate::errors::SupervisorError;
use crate::logs::LogStore;
use crate::monitor::{ExitSender, spawn_monitor};
use crate::plan::LaunchPlan;
use crate::state::{SharedState, SupervisorState};

/// How long `terminate` waits after SIGTERM before SIGKILL.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(10);
/// How long `stop` waits for the game to honour `quit`.
pub const QUIT_GRACE: Duration = Duration::from_secs(5);
pub const RESTART_DELAY: Duration = Duration::from_secs(2);

const LIFECYCLE_WAIT: Duration = Duration::from_secs(5);

/// Owns the game-server child process and its lifecycle.
#[derive(Clone)]
pub struct Supervisor {
    state: SharedState,
    logs: LogStore,
    exits: ExitSender,
    events: broadcast::Sender<ControlNotice>,
}

impl Supervisor {
    pub fn new(logs: LogStore) -> Self {
        let (exits, _) = watch::channel(None);
        let (events, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(SupervisorState::new())),
            logs,
            exits: Arc::new(exits),
            events,
        }
    }

    pub fn logs(&self) -> &LogStore {
        &self.logs
    }

    /// Lifecycle notices: starting, running, stopped, crashed.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlNotice> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> ServerState {
        self.state.lock().await.status.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_running()
    }

    pub async fn uptime(&self) -> Option<Duration> {
        let started = self.state.lock().await.started_at_ms?;
        Some(Duration::from_millis(now_millis().saturating_sub(started)))
    }

    pub async fn start(&self, plan: LaunchPlan) -> Result<u32, SupervisorError> {
        let _lifecycle = self.lifecycle().await?;
        self.start_locked(plan).await
    }

    pub async fn stop(&self, rcon: Option<&RconClient>) -> Result<ExitInfo, SupervisorError> {
        let _lifecycle = self.lifecycle().await?;
        self.stop_locked(rcon).await
    }

    /// Stops the server if it is up, pauses briefly, then starts it again.
    pub async fn restart(
        &self,
        plan: LaunchPlan,
        rcon: Option<&RconClient>,
    ) -> Result<u32, SupervisorError> {
        let _lifecycle = self.lifecycle().await?;
        match self.stop_locked(rcon).await {
            Ok(_) | Err(SupervisorError::NotRunning) => {}
            Err(err) => return Err(err),
        }
        sleep(RESTART_DELAY).await;
        self.start_locked(plan).await
    }

    /// Waits for the current run to exit.
    pub async fn wait(&self) -> Result<ExitInfo, SupervisorError> {
        let run = {
            let guard = self.state.lock().await;
            if guard.run == 0 {
                return Err(SupervisorError::NotRunning);
            }
            guard.run
        };
        let mut rx = self.exits.subscribe();
        let seen = rx
            .wait_for(|exit| matches!(exit, Some((id, _)) if *id == run))
            .await
            .map_err(|_| SupervisorError::NotRunning)?;
        match *seen {
            Some((_, exit)) => Ok(exit),
            None => Err(SupervisorError::NotRunning),
        }
    }

    /// SIGTERM, then SIGKILL once `grace` has passed.
    pub async fn terminate(&self, grace: Duration) -> Result<ExitInfo, SupervisorError> {
        let pid = {
            let mut guard = self.state.lock().await;
            if !guard.is_running() {
                return Err(SupervisorError::NotRunning);
            }
            let pid = guard.child.as_ref().and_then(Child::id).unwrap_or_default();
            guard.stop_requested = true;
            guard.status = ServerState::Stopping {
                pid,
                since_ms: now_millis(),
            };
            pid
        };

        info!(pid, "sending SIGTERM to server");
        send_sigterm(pid)?;
        if let Ok(exit) = timeout(grace, self.wait()).await {
            return exit;
        }

        warn!(pid, "server ignored SIGTERM for {}s, killing", grace.as_secs());
        {
            let mut guard = self.state.lock().await;
            if let Some(child) = guard.child.as_mut() {
                child
                    .start_kill()
                    .map_err(|source| SupervisorError::Signal { pid, source })?;
            }
        }
        self.wait().await
    }

    async fn lifecycle(&self) -> Result<OwnedMutexGuard<()>, SupervisorError> {
        let lock = self.state.lock().await.lifecycle_lock.clone();
        timeout(LIFECYCLE_WAIT, lock.lock_owned())
            .await
            .map_err(|_| SupervisorError::Busy)
    }

    async fn start_locked(&self, plan: LaunchPlan) -> Result<u32, SupervisorError> {
        let previous = {
            let mut guard = self.state.lock().await;
            if guard.is_running() {
                return Err(SupervisorError::AlreadyRunning);
            }
            let previous = guard.status.clone();
            guard.status = ServerState::Starting {
                since_ms: now_millis(),
            };
            previous
        };
        let _ = self.events.send(ControlNotice {
            status: ControlPhase::Starting,
            message: "Server is starting".into(),
        });
        self.logs.clear_server();
        info!(command = %plan.display_command(), "starting server");

        let child = match spawn_child(&plan, &self.logs) {
            Ok(child) => child,
            Err(source) => {
                self.state.lock().await.status = previous;
                let err = SupervisorError::Spawn {
                    program: plan.program.display().to_string(),
                    source,
                };
                let _ = self.events.send(ControlNotice {
                    status: ControlPhase::Error,
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let pid = child.id().unwrap_or_default();
        let started_at_ms = now_millis();
        let run = {
            let mut guard = self.state.lock().await;
            guard.run += 1;
            guard.child = Some(child);
            guard.stop_requested = false;
            guard.started_at_ms = Some(started_at_ms);
            guard.status = ServerState::Running { pid, started_at_ms };
            guard.run
        };

        self.logs.push_daemon(format!("server started: pid={pid}"));
        spawn_monitor(
            self.state.clone(),
            run,
            self.exits.clone(),
            self.events.clone(),
            self.logs.clone(),
        );
        let _ = self.events.send(ControlNotice {
            status: ControlPhase::Running,
            message: format!("Server started (pid {pid})"),
        });
        Ok(pid)
    }

    async fn stop_locked(&self, rcon: Option<&RconClient>) -> Result<ExitInfo, SupervisorError> {
        if !self.is_running().await {
            return Err(SupervisorError::NotRunning);
        }

        if let Some(rcon) = rcon.filter(|rcon| rcon.is_connected()) {
            self.state.lock().await.stop_requested = true;
            info!("asking server to quit over RCON");
            if rcon.send_detached("quit").is_some() {
                if let Ok(exit) = timeout(QUIT_GRACE, self.wait()).await {
                    return exit;
                }
            }
        }

        self.terminate(TERMINATE_GRACE).await
    }
}

fn spawn_child(plan: &LaunchPlan, logs: &LogStore) -> std::io::Result<Child> {
    let mut cmd = Command::new(&plan.program);
    cmd.args(&plan.args)
        .envs(&plan.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !plan.cwd.as_os_str().is_empty() {
        cmd.current_dir(&plan.cwd);
    }

    let mut child = cmd.spawn()?;
    if let Some(stdout) = child.stdout.take() {
        relay(stdout, LogStream::Stdout, logs.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        relay(stderr, LogStream::Stderr, logs.clone());
    }
    Ok(child)
}

fn relay<R>(reader: R, stream: LogStream, logs: LogStore)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            logs.push_server(stream, line);
        }
    });
}

fn send_sigterm(pid: u32) -> Result<(), SupervisorError> {
    if pid == 0 {
        return Err(SupervisorError::NotRunning);
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(SupervisorError::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn shell(script: &str) -> LaunchPlan {
        LaunchPlan {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            env: BTreeMap::new(),
            cwd: PathBuf::new(),
        }
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(LogStore::new(100, false))
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let sup = supervisor();
        sup.start(shell("sleep 30")).await.expect("first start");

        let err = sup.start(shell("sleep 30")).await.expect_err("second start");
        assert!(matches!(err, SupervisorError::AlreadyRunning));

        let exit = sup.terminate(Duration::from_secs(5)).await.expect("terminate");
        assert_eq!(exit.signal, Some(libc::SIGTERM));
        assert!(matches!(sup.status().await, ServerState::Stopped { .. }));
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_crash() {
        let sup = supervisor();
        let mut events = sup.subscribe();
        sup.start(shell("echo booting; echo oops >&2; exit 3"))
            .await
            .expect("start");

        let exit = sup.wait().await.expect("exit");
        assert_eq!(exit.code, Some(3));
        assert!(matches!(sup.status().await, ServerState::Crashed { .. }));

        let mut phases = Vec::new();
        while let Ok(notice) = events.try_recv() {
            phases.push(notice.status);
        }
        assert_eq!(
            phases,
            vec![ControlPhase::Starting, ControlPhase::Running, ControlPhase::Error]
        );

        let lines = sup.logs().tail_server_text(10);
        assert!(lines.contains(&"booting".to_string()));
        assert!(lines.contains(&"oops".to_string()));
    }

    #[tokio::test]
    async fn clean_exit_is_stopped_and_wait_returns_immediately_after() {
        let sup = supervisor();
        sup.start(shell("exit 0")).await.expect("start");
        let first = sup.wait().await.expect("exit");
        let again = sup.wait().await.expect("exit again");

        assert!(first.success());
        assert_eq!(first, again);
        assert!(matches!(sup.status().await, ServerState::Stopped { .. }));
    }

    #[tokio::test]
    async fn stubborn_process_is_killed_after_grace() {
        let sup = supervisor();
        sup.start(shell("trap '' TERM; sleep 30")).await.expect("start");
        sleep(Duration::from_millis(200)).await;

        let exit = sup
            .terminate(Duration::from_millis(500))
            .await
            .expect("terminate");
        assert_eq!(exit.signal, Some(libc::SIGKILL));
        assert!(!sup.is_running().await);
    }

    #[tokio::test]
    async fn stop_without_process_reports_not_running() {
        let sup = supervisor();
        assert!(matches!(sup.stop(None).await, Err(SupervisorError::NotRunning)));
        assert!(matches!(sup.wait().await, Err(SupervisorError::NotRunning)));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let sup = supervisor();
        let plan = LaunchPlan {
            program: PathBuf::from("/nonexistent/RustDedicated"),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: PathBuf::new(),
        };
        let err = sup.start(plan).await.expect_err("spawn must fail");
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(matches!(sup.status().await, ServerState::NotStarted {}));
    }
}
