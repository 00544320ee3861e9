/// Time-windowed duplicate suppression.
///
/// Remembers packet keys for `window`, bounded by an LRU of `capacity`.
/// The check and the insert happen under one lock, so concurrent callers
/// racing on the same key see exactly one "first".
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Default dedup horizon (10 minutes).
pub const DEDUP_WINDOW: Duration = Duration::from_secs(600);

/// Default maximum number of remembered keys.
pub const DEDUP_CAPACITY: usize = 10_000;

pub struct DedupGuard<K: Hash + Eq> {
    seen: Mutex<LruCache<K, Instant>>,
    window: Duration,
}

impl<K: Hash + Eq> DedupGuard<K> {
    pub fn new(capacity: usize, window: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
            window,
        }
    }

    /// True when `key` was marked within the window.
    pub fn seen(&self, key: &K) -> bool {
        self.seen_at(key, Instant::now())
    }

    pub fn mark_seen(&self, key: K) {
        self.mark_seen_at(key, Instant::now());
    }

    /// Atomically: report whether `key` is new, and remember it.
    /// Returns `true` exactly once per key per window.
    pub fn check_and_mark(&self, key: K) -> bool {
        self.check_and_mark_at(key, Instant::now())
    }

    pub fn seen_at(&self, key: &K, now: Instant) -> bool {
        let seen = self.lock();
        matches!(seen.peek(key), Some(at) if now.saturating_duration_since(*at) < self.window)
    }

    pub fn mark_seen_at(&self, key: K, now: Instant) {
        self.lock().put(key, now);
    }

    pub fn check_and_mark_at(&self, key: K, now: Instant) -> bool {
        let mut seen = self.lock();
        if let Some(at) = seen.peek(&key) {
            if now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }
        seen.put(key, now);
        true
    }

    /// Forget expired keys. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&self, now: Instant) -> usize {
        let mut seen = self.lock();
        let mut dropped = 0;
        // `peek` never reorders, so LRU order is insertion order.
        while let Some((_, at)) = seen.peek_lru() {
            if now.saturating_duration_since(*at) < self.window {
                break;
            }
            seen.pop_lru();
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<K, Instant>> {
        // A poisoned cache is still a valid cache.
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K: Hash + Eq> Default for DedupGuard<K> {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY, DEDUP_WINDOW)
    }
}
