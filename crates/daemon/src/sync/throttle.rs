// Short-lived suppression markers keyed by an arbitrary hashable key.
//
// Used for the per-(kind, tab) event throttle and for echo markers of
// reconciliation side-effects. Entries expire on their own; nothing here is
// persisted.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct SuppressionTable<K> {
    expires: HashMap<K, Instant>,
}

impl<K> Default for SuppressionTable<K> {
    fn default() -> Self {
        Self { expires: HashMap::new() }
    }
}

impl<K: Eq + Hash + Clone> SuppressionTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the marker for `ttl` if nobody holds it. Returns false when the
    /// key is already suppressed.
    pub fn try_acquire(&mut self, key: K, ttl: Duration) -> bool {
        self.try_acquire_at(key, ttl, Instant::now())
    }

    pub fn try_acquire_at(&mut self, key: K, ttl: Duration, now: Instant) -> bool {
        if self.contains_at(&key, now) {
            return false;
        }
        self.insert_at(key, ttl, now);
        true
    }

    /// Set (or extend) a marker unconditionally.
    pub fn insert(&mut self, key: K, ttl: Duration) {
        self.insert_at(key, ttl, Instant::now());
    }

    pub fn insert_at(&mut self, key: K, ttl: Duration, now: Instant) {
        self.purge_expired_at(now);
        self.expires.insert(key, now + ttl);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.contains_at(key, Instant::now())
    }

    pub fn contains_at(&self, key: &K, now: Instant) -> bool {
        self.expires.get(key).is_some_and(|expiry| *expiry > now)
    }

    /// Consume a live marker. Returns whether one was present.
    pub fn take(&mut self, key: &K) -> bool {
        self.take_at(key, Instant::now())
    }

    pub fn take_at(&mut self, key: &K, now: Instant) -> bool {
        match self.expires.remove(key) {
            Some(expiry) => expiry > now,
            None => false,
        }
    }

    /// When the marker for `key` lapses, if it is live.
    pub fn expiry_of(&self, key: &K) -> Option<Instant> {
        self.expires.get(key).copied()
    }

    pub fn purge_expired_at(&mut self, now: Instant) {
        self.expires.retain(|_, expiry| *expiry > now);
    }

    /// Live and not-yet-purged entries.
    pub fn len(&self) -> usize {
        self.expires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expires.is_empty()
    }
}
