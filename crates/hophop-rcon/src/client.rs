use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hophop_core::config::ServerConfig;
use hophop_core::proto::CommandId;

use crate::backoff::{Backoff, HANDSHAKE_TIMEOUT, INITIAL_BACKOFF, MAX_BACKOFF};
use crate::pending::{PendingTable, ResponseHandler};
use crate::wire::{InboundFrame, OutboundFrame};

const FATAL_ERRORS: [&str; 4] = [
    "Connection refused",
    "Connection reset by peer",
    "Connection timed out",
    "Name or service not known",
];

pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RconError {
    #[error("remote console is not connected")]
    NotConnected,
    #[error("no response to `{command}` within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct RconSettings {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub handshake_timeout: Duration,
    /// Pending handlers older than this are dropped and answered with "".
    pub request_ttl: Duration,
    pub sweep_interval: Duration,
}

impl RconSettings {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            request_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.rcon_host.clone(),
            config.rcon_port,
            config.rcon_password.clone(),
        )
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}/{}", self.host, self.port, self.password)
    }
}

type StateObserver = Arc<dyn Fn(bool) + Send + Sync + 'static>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Long-lived WebRcon session. Cloning is cheap; all clones share one
/// connection, one identifier counter and one pending table.
#[derive(Clone)]
pub struct RconClient {
    inner: Arc<Inner>,
}

struct Inner {
    settings: RconSettings,
    connected: AtomicBool,
    should_reconnect: AtomicBool,
    next_id: AtomicI64,
    /// Bumped on every successful handshake so tasks of a dead session can
    /// tell they are stale.
    session: AtomicU64,
    pending: Mutex<PendingTable>,
    backoff: Mutex<Backoff>,
    next_attempt_at: Mutex<Option<Instant>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    observer: RwLock<Option<StateObserver>>,
    connect_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RconClient {
    pub fn new(settings: RconSettings) -> Self {
        let backoff = Backoff::new(settings.initial_backoff, settings.max_backoff);
        Self {
            inner: Arc::new(Inner {
                settings,
                connected: AtomicBool::new(false),
                should_reconnect: AtomicBool::new(true),
                next_id: AtomicI64::new(0),
                session: AtomicU64::new(0),
                pending: Mutex::new(PendingTable::default()),
                backoff: Mutex::new(backoff),
                next_attempt_at: Mutex::new(None),
                outbound: Mutex::new(None),
                observer: RwLock::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn settings(&self) -> &RconSettings {
        &self.inner.settings
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Registers the callback invoked with `true`/`false` on every
    /// connected/disconnected transition. Runs on the socket task, so it must
    /// not block.
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut slot = self
            .inner
            .observer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(observer));
    }

    /// Attempts to connect until a session is up or [`disconnect`] is called.
    /// Attempts are spaced by the reconnect backoff.
    ///
    /// [`disconnect`]: RconClient::disconnect
    pub async fn connect(&self) {
        Inner::connect_loop(&self.inner).await;
    }

    /// Starts [`connect`](RconClient::connect) in the background.
    pub fn spawn_connect(&self) {
        Inner::spawn_connect(&self.inner);
    }

    /// Sends `command` and calls `handler` exactly once with the response, or
    /// with an empty string when no response will come (not connected, send
    /// failure, disconnect, expiry). Returns the assigned identifier, or
    /// `None` when nothing was sent.
    pub fn send_command<F>(&self, command: &str, handler: F) -> Option<CommandId>
    where
        F: FnOnce(String) + Send + 'static,
    {
        self.inner.send(command, Some(Box::new(handler)))
    }

    /// Fire-and-forget variant of [`send_command`](RconClient::send_command).
    pub fn send_detached(&self, command: &str) -> Option<CommandId> {
        self.inner.send(command, None)
    }

    /// Sends `command` and waits for its response.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<String, RconError> {
        if !self.is_connected() {
            return Err(RconError::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        let id = self
            .send_command(command, move |response| {
                let _ = tx.send(response);
            })
            .ok_or(RconError::NotConnected)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) if response.is_empty() && !self.is_connected() => {
                Err(RconError::NotConnected)
            }
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RconError::NotConnected),
            Err(_) => {
                lock(&self.inner.pending).take(id);
                Err(RconError::Timeout {
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Closes the session for good: no reconnect follows, pending handlers
    /// receive "".
    pub async fn disconnect(&self) {
        self.inner.should_reconnect.store(false, Ordering::SeqCst);
        self.inner.shutdown.cancel();
        if let Some(tx) = lock(&self.inner.outbound).take() {
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })));
        }
        let session = self.inner.session.load(Ordering::SeqCst);
        self.inner.mark_disconnected(session, false);
        info!("RCON disconnected");
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }
}

impl Inner {
    fn spawn_connect(inner: &Arc<Inner>) {
        if !inner.should_reconnect.load(Ordering::SeqCst) {
            return;
        }
        let inner = inner.clone();
        tokio::spawn(async move {
            Inner::connect_loop(&inner).await;
        });
    }

    async fn connect_loop(inner: &Arc<Inner>) {
        let _guard = inner.connect_lock.lock().await;
        let settings = &inner.settings;

        while inner.should_reconnect.load(Ordering::SeqCst) {
            if inner.connected.load(Ordering::SeqCst) {
                return;
            }

            let now = Instant::now();
            let ready_at = *lock(&inner.next_attempt_at);
            if let Some(ready_at) = ready_at.filter(|at| *at > now) {
                tokio::select! {
                    _ = tokio::time::sleep(ready_at - now) => {}
                    _ = inner.shutdown.cancelled() => return,
                }
                continue;
            }

            let attempt_started = Instant::now();
            info!(host = %settings.host, port = settings.port, "connecting to RCON");
            let outcome = tokio::select! {
                result = tokio::time::timeout(
                    settings.handshake_timeout,
                    tokio_tungstenite::connect_async(settings.url()),
                ) => result,
                _ = inner.shutdown.cancelled() => return,
            };

            match outcome {
                Ok(Ok((stream, _))) => {
                    lock(&inner.backoff).reset();
                    *lock(&inner.next_attempt_at) = Some(attempt_started + settings.initial_backoff);
                    Inner::attach(inner, stream);
                    return;
                }
                Ok(Err(err)) => warn!("RCON connection failed: {err}"),
                Err(_) => warn!(
                    "RCON handshake did not complete within {}s",
                    settings.handshake_timeout.as_secs()
                ),
            }

            let delay = lock(&inner.backoff).fail();
            *lock(&inner.next_attempt_at) = Some(attempt_started + delay);
            info!("next RCON attempt in {}s", delay.as_secs());
        }
    }

    fn attach(inner: &Arc<Inner>, stream: WsStream) {
        let session = inner.session.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *lock(&inner.outbound) = Some(tx);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(err) = sink.send(message).await {
                    debug!("RCON write failed: {err}");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = inner.clone();
        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                match item {
                    Ok(Message::Text(text)) => reader.handle_frame(text.as_str()),
                    Ok(Message::Close(frame)) => {
                        let normal = frame.is_some_and(|frame| frame.code == CloseCode::Normal);
                        if normal {
                            info!("RCON closed by server");
                        } else {
                            warn!("RCON closed abnormally");
                        }
                        reader.mark_disconnected(session, !normal);
                        return;
                    }
                    Ok(_) => {}
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                    Err(err) => {
                        if is_fatal(&err) {
                            warn!("RCON connection lost: {err}");
                            reader.mark_disconnected(session, true);
                            return;
                        }
                        warn!("RCON error: {err}");
                    }
                }
            }
            reader.mark_disconnected(session, true);
        });

        let sweeper = inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.settings.sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = sweeper.shutdown.cancelled() => return,
                }
                if sweeper.session.load(Ordering::SeqCst) != session {
                    return;
                }
                let expired =
                    lock(&sweeper.pending).expire(Instant::now(), sweeper.settings.request_ttl);
                if !expired.is_empty() {
                    debug!("expired {} RCON handlers", expired.len());
                }
                for handler in expired {
                    handler(String::new());
                }
            }
        });

        if !inner.connected.swap(true, Ordering::SeqCst) {
            info!("RCON connected");
            inner.notify(true);
        }
    }

    fn send(&self, command: &str, handler: Option<ResponseHandler>) -> Option<CommandId> {
        let sender = if self.connected.load(Ordering::SeqCst) {
            lock(&self.outbound).clone()
        } else {
            None
        };
        let Some(sender) = sender else {
            debug!("RCON not connected, dropping `{command}`");
            if let Some(handler) = handler {
                handler(String::new());
            }
            return None;
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let has_handler = handler.is_some();
        if let Some(handler) = handler {
            lock(&self.pending).insert(id, handler, Instant::now());
        }

        let sent = serde_json::to_string(&OutboundFrame::new(id, command))
            .map_err(|err| err.to_string())
            .and_then(|frame| {
                sender
                    .send(Message::Text(frame.into()))
                    .map_err(|err| err.to_string())
            });
        if let Err(err) = sent {
            warn!("failed to send RCON command `{command}`: {err}");
            let orphan = if has_handler { lock(&self.pending).take(id) } else { None };
            if let Some(handler) = orphan {
                handler(String::new());
            }
            return None;
        }
        Some(id)
    }

    fn handle_frame(&self, text: &str) {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("ignoring unparseable RCON frame: {err}");
                return;
            }
        };
        let (Some(id), Some(message)) = (frame.identifier, frame.message) else {
            return;
        };
        let handler = lock(&self.pending).take(id);
        if let Some(handler) = handler {
            handler(message);
        }
    }

    /// Single exit path for a session. Only the first caller for a session
    /// notifies and reconnects.
    fn mark_disconnected(self: &Arc<Self>, session: u64, reconnect: bool) {
        if self.session.load(Ordering::SeqCst) != session {
            return;
        }
        lock(&self.outbound).take();
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        let orphaned = lock(&self.pending).drain();
        for handler in orphaned {
            handler(String::new());
        }

        if was_connected {
            self.notify(false);
            if reconnect && self.should_reconnect.load(Ordering::SeqCst) {
                Inner::spawn_connect(self);
            }
        }
    }

    fn notify(&self, connected: bool) {
        let observer = self
            .observer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer(connected);
        }
    }
}

/// Whether an error message names a condition that means the remote end is
/// gone.
pub fn is_fatal_error(message: &str) -> bool {
    FATAL_ERRORS.iter().any(|needle| message.contains(needle))
}

fn is_fatal(err: &WsError) -> bool {
    match err {
        WsError::Io(io) => {
            matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::TimedOut
            ) || is_fatal_error(&io.to_string())
        }
        other => is_fatal_error(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    fn quick_settings(port: u16) -> RconSettings {
        let mut settings = RconSettings::new("127.0.0.1", port, "secret");
        settings.initial_backoff = Duration::from_millis(50);
        settings.max_backoff = Duration::from_millis(200);
        settings.handshake_timeout = Duration::from_secs(2);
        settings
    }

    /// Minimal WebRcon peer: answers every command with `ok:<command>`,
    /// except `silent`, which gets no answer.
    async fn spawn_echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                        return;
                    };
                    while let Some(Ok(message)) = ws.next().await {
                        let Message::Text(text) = message else {
                            continue;
                        };
                        let request: serde_json::Value =
                            serde_json::from_str(text.as_str()).expect("frame json");
                        let command = request["Message"].as_str().unwrap_or_default().to_string();
                        if command == "silent" {
                            continue;
                        }
                        let reply = serde_json::json!({
                            "Identifier": request["Identifier"],
                            "Message": format!("ok:{command}"),
                            "Type": "Generic",
                        });
                        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        port
    }

    #[test]
    fn url_embeds_the_password_as_path() {
        let settings = RconSettings::new("localhost", 28017, "pw");
        assert_eq!(settings.url(), "ws://localhost:28017/pw");
    }

    #[test]
    fn fatal_errors_are_recognized() {
        assert!(is_fatal_error("IO error: Connection refused (os error 111)"));
        assert!(is_fatal_error("failed to lookup: Name or service not known"));
        assert!(!is_fatal_error("protocol violation"));
    }

    #[tokio::test]
    async fn send_while_disconnected_answers_empty_and_assigns_nothing() {
        let client = RconClient::new(RconSettings::new("localhost", 28017, "secret"));
        let (tx, rx) = oneshot::channel();

        let id = client.send_command("status", move |resp| {
            let _ = tx.send(resp);
        });

        assert_eq!(id, None);
        assert_eq!(rx.await.expect("handler ran"), "");
        assert_eq!(client.inner.next_id.load(Ordering::SeqCst), 0);
        assert!(matches!(
            client.execute("status", DEFAULT_EXECUTE_TIMEOUT).await,
            Err(RconError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn responses_are_dispatched_once() {
        let client = RconClient::new(RconSettings::new("localhost", 28017, "secret"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        lock(&client.inner.pending).insert(
            5,
            Box::new(move |resp: String| {
                assert_eq!(resp, "pong");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Instant::now(),
        );

        client.inner.handle_frame(r#"{"Identifier":5,"Message":"pong"}"#);
        client.inner.handle_frame(r#"{"Identifier":5,"Message":"again"}"#);
        client.inner.handle_frame("{not json");
        client.inner.handle_frame(r#"{"Identifier":-1,"Message":"broadcast"}"#);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn frames_without_a_message_leave_the_handler_waiting() {
        let client = RconClient::new(RconSettings::new("localhost", 28017, "secret"));
        let (tx, rx) = oneshot::channel();
        lock(&client.inner.pending).insert(
            7,
            Box::new(move |resp: String| {
                let _ = tx.send(resp);
            }),
            Instant::now(),
        );

        client.inner.handle_frame(r#"{"Identifier":7,"Type":"Generic"}"#);
        assert_eq!(client.pending_count(), 1);

        client.inner.handle_frame(r#"{"Identifier":7,"Message":"done"}"#);
        assert_eq!(rx.await.expect("handler ran"), "done");
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn execute_round_trips_through_a_live_socket() {
        let port = spawn_echo_server().await;
        let client = RconClient::new(quick_settings(port));
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let seen = transitions.clone();
        client.on_state_change(move |up| lock(&seen).push(up));

        tokio::time::timeout(Duration::from_secs(5), client.connect())
            .await
            .expect("connected in time");
        assert!(client.is_connected());

        let first = client
            .execute("serverinfo", DEFAULT_EXECUTE_TIMEOUT)
            .await
            .expect("serverinfo");
        let second = client
            .execute("status", DEFAULT_EXECUTE_TIMEOUT)
            .await
            .expect("status");
        assert_eq!(first, "ok:serverinfo");
        assert_eq!(second, "ok:status");
        assert_eq!(client.inner.next_id.load(Ordering::SeqCst), 2);

        let err = client
            .execute("silent", Duration::from_millis(100))
            .await
            .expect_err("no answer expected");
        assert!(matches!(err, RconError::Timeout { .. }));
        assert_eq!(client.pending_count(), 0);

        client.disconnect().await;
        assert!(!client.is_connected());
        assert_eq!(client.send_detached("status"), None);
        assert_eq!(*lock(&transitions), vec![true, false]);
    }

    #[tokio::test]
    async fn disconnect_flushes_pending_handlers() {
        let port = spawn_echo_server().await;
        let client = RconClient::new(quick_settings(port));
        tokio::time::timeout(Duration::from_secs(5), client.connect())
            .await
            .expect("connected in time");

        let (tx, rx) = oneshot::channel();
        let id = client.send_command("silent", move |resp| {
            let _ = tx.send(resp);
        });
        assert!(id.is_some());

        client.disconnect().await;
        assert_eq!(rx.await.expect("flushed"), "");
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn server_side_drop_reconnects_in_the_background() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let accepts = Arc::new(AtomicUsize::new(0));
        let accepted = accepts.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let nth = accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                        return;
                    };
                    if nth == 0 {
                        // Drop the first session without a close frame.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        drop(ws);
                        return;
                    }
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });

        let client = RconClient::new(quick_settings(port));
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let seen = transitions.clone();
        client.on_state_change(move |up| lock(&seen).push(up));

        tokio::time::timeout(Duration::from_secs(5), client.connect())
            .await
            .expect("connected in time");

        let deadline = Instant::now() + Duration::from_secs(5);
        while lock(&transitions).len() < 3 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(*lock(&transitions), vec![true, false, true]);
        assert!(client.is_connected());
        assert_eq!(accepts.load(Ordering::SeqCst), 2);
        assert_eq!(
            lock(&client.inner.backoff).current(),
            client.settings().initial_backoff
        );

        client.disconnect().await;
        assert_eq!(*lock(&transitions), vec![true, false, true, false]);
    }

    #[tokio::test]
    async fn unreachable_server_keeps_retrying_until_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let client = RconClient::new(quick_settings(port));
        client.spawn_connect();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!client.is_connected());

        client.disconnect().await;
        tokio::time::timeout(Duration::from_secs(1), client.connect())
            .await
            .expect("connect returns once disconnected");
        assert!(!client.is_connected());
    }
}
