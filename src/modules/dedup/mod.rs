//! Recent-request deduplication.
//!
//! Keys are `(METHOD, url)`. An entry younger than the TTL rejects the next
//! identical request outright; there is no coalescing with the in-flight call.
//! There is no background sweep: a lookup replaces a stale entry for its own
//! key, and at most once per TTL a lookup also drops every expired entry.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug)]
pub struct DedupCache {
    ttl: Duration,
    entries: DashMap<(String, String), Instant>,
    last_sweep: Mutex<Instant>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Records the request and returns `true`, or returns `false` when an
    /// identical request was recorded less than `ttl` ago.
    pub fn check_and_insert(&self, method: &str, url: &str) -> bool {
        self.check_and_insert_at(method, url, Instant::now())
    }

    pub fn check_and_insert_at(&self, method: &str, url: &str, now: Instant) -> bool {
        let key = (method.to_ascii_uppercase(), url.to_string());
        let admitted = match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) < self.ttl {
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };
        // Entry guard is released here; `retain` locks every shard.
        self.sweep_if_due(now);
        admitted
    }

    fn sweep_if_due(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now.saturating_duration_since(*last) < self.ttl {
                return;
            }
            *last = now;
        }
        let before = self.entries.len();
        self.entries
            .retain(|_, seen| now.saturating_duration_since(*seen) < self.ttl);
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            log::debug!("dedup cache dropped {dropped} expired entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
