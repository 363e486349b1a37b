use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// What happened to the previous occupant when inserting
#[derive(Debug, PartialEq)]
pub enum Displaced<V> {
    None,
    /// Same key was already present; its value was replaced
    Replaced(V),
    /// Capacity reached; the oldest entry was pushed out
    Evicted(String, V),
}

/// Size-bounded map with a fixed time-to-live per entry.
///
/// Entries are kept in insertion order (lookups use `peek`/`pop`, never
/// promote), so capacity eviction always drops the oldest entry. Expired
/// entries are invisible to lookups and are removed by [`Self::purge_expired`].
pub struct BoundedTtlCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<V> BoundedTtlCache<V> {
    /// Capacity of zero is treated as one
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            capacity: cap.get(),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) >= self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored entries, including ones that expired but were not yet purged
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, key: impl Into<String>, value: V) -> Displaced<V> {
        let key = key.into();
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
        };
        match self.lock().push(key.clone(), entry) {
            None => Displaced::None,
            Some((old_key, old)) if old_key == key => Displaced::Replaced(old.value),
            Some((old_key, old)) => Displaced::Evicted(old_key, old.value),
        }
    }

    /// Remove and return a live entry; expired entries are dropped and reported as absent
    pub fn remove(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let entry = self.lock().pop(key)?;
        if self.expired(&entry, now) {
            None
        } else {
            Some(entry.value)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .peek(key)
            .map(|e| !self.expired(e, now))
            .unwrap_or(false)
    }

    /// Keys oldest first
    pub fn keys(&self) -> Vec<String> {
        self.lock().iter().rev().map(|(k, _)| k.clone()).collect()
    }

    /// Drop every expired entry and return them oldest first
    pub fn purge_expired(&self) -> Vec<(String, V)> {
        let now = Instant::now();
        let mut entries = self.lock();
        let mut purged = Vec::new();
        // Insertion order means expired entries sit at the LRU end
        while let Some((_, oldest)) = entries.peek_lru() {
            if !self.expired(oldest, now) {
                break;
            }
            if let Some((key, entry)) = entries.pop_lru() {
                purged.push((key, entry.value));
            }
        }
        purged
    }
}
