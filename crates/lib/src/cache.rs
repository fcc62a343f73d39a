//! Event deduplication cache.
//!
//! Slack delivers events at-least-once (it retries on slow acks), so the
//! gateway keeps a TTL-bounded set of seen event ids. `check_and_mark` is one
//! critical section: two concurrent deliveries of the same id cannot both be
//! told "new". Process-local; a restart forgets prior ids.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// TTL set of recently seen event ids.
pub struct EventCache {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl EventCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when the event id is newly seen and marks it; false for a
    /// duplicate still inside the TTL window. Expired entries are swept lazily
    /// on each call, which bounds memory without a background task.
    pub fn check_and_mark(&self, event_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, inserted| now.duration_since(*inserted) <= self.ttl);
        match seen.get(event_id) {
            Some(_) => false,
            None => {
                seen.insert(event_id.to_string(), now);
                true
            }
        }
    }

    /// Number of unexpired entries (diagnostics).
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, inserted| now.duration_since(*inserted) <= self.ttl);
        seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
