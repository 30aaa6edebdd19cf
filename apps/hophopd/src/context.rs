use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use hophop_core::proto::DashboardEvent;
use hophop_provision::PluginStore;
use hophop_rcon::RconClient;
use hophop_supervisor::LogStore;
use hophop_utils::ProjectPaths;

use crate::config::ConfigStore;
use crate::control::ControlBackend;

pub type SharedContext = Arc<AppContext>;

/// Everything request handlers and background loops share.
pub struct AppContext {
    pub paths: ProjectPaths,
    pub config: ConfigStore,
    pub rcon: RconClient,
    pub control: ControlBackend,
    pub plugins: PluginStore,
    pub logs: LogStore,
    pub shutdown: CancellationToken,
    events: broadcast::Sender<DashboardEvent>,
    console: Mutex<String>,
}

impl AppContext {
    pub fn new(
        paths: ProjectPaths,
        config: ConfigStore,
        rcon: RconClient,
        control: ControlBackend,
        logs: LogStore,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            plugins: PluginStore::new(&paths),
            paths,
            config,
            rcon,
            control,
            logs,
            shutdown: CancellationToken::new(),
            events,
            console: Mutex::new(String::new()),
        }
    }

    /// Fans an event out to every connected dashboard socket.
    pub fn publish(&self, event: DashboardEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    /// Latest console text, sent to sockets as they connect.
    pub fn console(&self) -> String {
        self.console
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Records `content` and publishes it, unless it is empty or repeats the
    /// previous output.
    pub fn update_console(&self, content: String) -> bool {
        let mut last = self
            .console
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if content.is_empty() || *last == content {
            return false;
        }
        *last = content.clone();
        drop(last);
        self.publish(DashboardEvent::ScreenOutput(content));
        true
    }
}
