use hophop_core::proto::{LogLine, LogStream};
use hophop_utils::now_millis;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing_subscriber::fmt::MakeWriter;

/// Bounded in-memory history of game output and of our own log lines, with a
/// live broadcast of game output.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<Mutex<LogState>>,
}

struct LogState {
    server: VecDeque<LogLine>,
    daemon: VecDeque<LogLine>,
    server_tx: broadcast::Sender<LogLine>,
    max_lines: usize,
    echo: bool,
}

impl LogStore {
    /// `echo` additionally copies every game line to our stdout, which is what
    /// a foreground `hophop up` wants.
    pub fn new(max_lines: usize, echo: bool) -> Self {
        let (server_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Mutex::new(LogState {
                server: VecDeque::with_capacity(max_lines.min(1024)),
                daemon: VecDeque::with_capacity(max_lines.min(1024)),
                server_tx,
                max_lines: max_lines.max(100),
                echo,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_server(&self, stream: LogStream, line: String) {
        let mut guard = self.state();
        if guard.echo {
            println!("{line}");
        }
        let entry = LogLine {
            at_ms: now_millis(),
            stream,
            line,
        };
        let max_lines = guard.max_lines;
        push_bounded(&mut guard.server, max_lines, entry.clone());
        let _ = guard.server_tx.send(entry);
    }

    pub fn push_daemon(&self, line: String) {
        let mut guard = self.state();
        let entry = LogLine {
            at_ms: now_millis(),
            stream: LogStream::Stdout,
            line,
        };
        let max_lines = guard.max_lines;
        push_bounded(&mut guard.daemon, max_lines, entry);
    }

    /// Forgets the previous run's output.
    pub fn clear_server(&self) {
        self.state().server.clear();
    }

    pub fn tail_server(&self, lines: usize) -> Vec<LogLine> {
        tail(&self.state().server, lines)
    }

    pub fn tail_server_text(&self, lines: usize) -> Vec<String> {
        self.tail_server(lines).into_iter().map(|entry| entry.line).collect()
    }

    pub fn tail_daemon(&self, lines: usize) -> Vec<LogLine> {
        tail(&self.state().daemon, lines)
    }

    pub fn server_subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.state().server_tx.subscribe()
    }

    pub fn daemon_writer(&self) -> LogWriterFactory {
        LogWriterFactory { store: self.clone() }
    }
}

fn push_bounded(buf: &mut VecDeque<LogLine>, max_lines: usize, entry: LogLine) {
    while buf.len() >= max_lines {
        buf.pop_front();
    }
    buf.push_back(entry);
}

fn tail(buf: &VecDeque<LogLine>, lines: usize) -> Vec<LogLine> {
    let count = lines.min(buf.len());
    buf.iter().skip(buf.len() - count).cloned().collect()
}

/// `tracing` writer that tees formatted events into the daemon history.
pub struct LogWriterFactory {
    store: LogStore,
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            store: self.store.clone(),
            buffer: Vec::new(),
        }
    }
}

pub struct LogWriter {
    store: LogStore,
    buffer: Vec<u8>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.trim().is_empty() {
                self.store.push_daemon(line.to_string());
            }
        }

        io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded_and_tail_keeps_order() {
        let store = LogStore::new(100, false);
        for i in 0..150 {
            store.push_server(LogStream::Stdout, format!("line {i}"));
        }

        let tail = store.tail_server_text(3);
        assert_eq!(tail, vec!["line 147", "line 148", "line 149"]);
        assert_eq!(store.tail_server(1000).len(), 100);

        store.clear_server();
        assert!(store.tail_server(10).is_empty());
    }

    #[test]
    fn writer_splits_partial_writes_into_lines() {
        let store = LogStore::new(100, false);
        let factory = store.daemon_writer();
        let mut writer = factory.make_writer();
        writer.write_all(b"first half ").expect("write");
        writer.write_all(b"done\nsecond\n\n").expect("write");

        let lines: Vec<String> = store.tail_daemon(10).into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["first half done", "second"]);
    }

    #[tokio::test]
    async fn subscribers_see_new_lines() {
        let store = LogStore::new(100, false);
        let mut rx = store.server_subscribe();
        store.push_server(LogStream::Stderr, "boom".into());

        let line = rx.recv().await.expect("broadcast");
        assert_eq!(line.line, "boom");
        assert_eq!(line.stream, LogStream::Stderr);
    }
}
