//! Single-use nonce bookkeeping for replay prevention.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Remembers every nonce accepted within the TTL window. A nonce is consumed
/// at most once; expired records are purged before each consultation so the
/// map stays bounded by TTL x peak request rate.
pub struct NonceStore {
    ttl: Duration,
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl NonceStore {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically purge expired records, then accept the nonce only if it has
    /// not been seen within the TTL window.
    pub fn check_and_consume(&self, nonce: &str) -> bool {
        self.check_and_consume_at(nonce, Utc::now())
    }

    fn check_and_consume_at(&self, nonce: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self.seen.lock();
        seen.retain(|_, first_seen| now - *first_seen <= self.ttl);
        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_string(), now);
        true
    }

    /// Drop expired records. Called by the periodic purge worker.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.seen.lock().retain(|_, t| now - *t <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
