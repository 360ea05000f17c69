//! Liveness Ledger
//!
//! Maps entity keys to the instant they were last observed. The ledger is a
//! plain data structure; callers decide what "now" is.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Last-seen timestamps for one kind of entity, with that kind's TTL.
#[derive(Debug, Clone)]
pub struct LivenessLedger<K> {
    entries: HashMap<K, Instant>,
    ttl: Duration,
}

impl<K> LivenessLedger<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `key` was observed at `now`.
    ///
    /// Returns `true` when the key was not present before. A timestamp older
    /// than the one already stored is ignored.
    pub fn touch(&mut self, key: K, now: Instant) -> bool {
        match self.entries.get_mut(&key) {
            Some(seen) => {
                if now > *seen {
                    *seen = now;
                }
                false
            }
            None => {
                self.entries.insert(key, now);
                true
            }
        }
    }

    pub fn last_seen(&self, key: &K) -> Option<Instant> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// All `(key, last_seen)` pairs, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = (&K, Instant)> + '_ {
        self.entries.iter().map(|(key, seen)| (key, *seen))
    }

    /// Delete the record for `key`. Returns whether it existed.
    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry last seen at `last_seen` has outlived the TTL at `now`.
    pub fn is_expired(&self, last_seen: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_seen) >= self.ttl
    }

    /// Keys whose silence at `now` is at least the TTL.
    pub fn expired_keys(&self, now: Instant) -> Vec<K> {
        self.entries()
            .filter(|(_, seen)| self.is_expired(*seen, now))
            .map(|(key, _)| key.clone())
            .collect()
    }
}
