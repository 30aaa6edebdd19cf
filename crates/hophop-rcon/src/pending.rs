use std::collections::HashMap;
use std::time::{Duration, Instant};

use hophop_core::proto::CommandId;

/// Called once with the response text, or with an empty string when no
/// response will arrive.
pub type ResponseHandler = Box<dyn FnOnce(String) + Send + 'static>;

struct Pending {
    handler: ResponseHandler,
    submitted: Instant,
}

/// Handlers waiting for a response, keyed by command identifier. Handlers
/// are handed back to the caller rather than invoked under the lock.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<CommandId, Pending>,
}

impl PendingTable {
    pub fn insert(&mut self, id: CommandId, handler: ResponseHandler, now: Instant) {
        self.entries.insert(
            id,
            Pending {
                handler,
                submitted: now,
            },
        );
    }

    pub fn take(&mut self, id: CommandId) -> Option<ResponseHandler> {
        self.entries.remove(&id).map(|pending| pending.handler)
    }

    pub fn expire(&mut self, now: Instant, ttl: Duration) -> Vec<ResponseHandler> {
        let stale: Vec<CommandId> = self
            .entries
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.submitted) >= ttl)
            .map(|(id, _)| *id)
            .collect();
        stale.into_iter().filter_map(|id| self.take(id)).collect()
    }

    pub fn drain(&mut self) -> Vec<ResponseHandler> {
        self.entries.drain().map(|(_, pending)| pending.handler).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn() -> ResponseHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let make = move || {
            let sink = sink.clone();
            Box::new(move |resp: String| sink.lock().expect("lock").push(resp)) as ResponseHandler
        };
        (seen, make)
    }

    #[test]
    fn take_removes_the_entry() {
        let (seen, handler) = recorder();
        let mut table = PendingTable::default();
        table.insert(1, handler(), Instant::now());

        let found = table.take(1).expect("pending handler");
        found("pong".into());
        assert!(table.take(1).is_none());
        assert_eq!(table.len(), 0);
        assert_eq!(*seen.lock().expect("lock"), vec!["pong".to_string()]);
    }

    #[test]
    fn expire_only_returns_entries_past_ttl() {
        let (_, handler) = recorder();
        let mut table = PendingTable::default();
        let start = Instant::now();
        table.insert(1, handler(), start);
        table.insert(2, handler(), start + Duration::from_secs(20));

        let expired = table.expire(start + Duration::from_secs(30), Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(table.len(), 1);
        assert!(table.take(2).is_some());
    }

    #[test]
    fn drain_empties_the_table() {
        let (seen, handler) = recorder();
        let mut table = PendingTable::default();
        table.insert(1, handler(), Instant::now());
        table.insert(2, handler(), Instant::now());

        for handler in table.drain() {
            handler(String::new());
        }
        assert_eq!(table.len(), 0);
        assert_eq!(seen.lock().expect("lock").len(), 2);
    }
}
