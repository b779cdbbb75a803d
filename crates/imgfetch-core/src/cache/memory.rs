//! In-memory tier: LRU bounded by entry count, entries expire after a TTL.

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::decode::{DecodedImage, Dims};

/// One cached resource: raw bytes, plus decoded forms built from them.
struct Entry {
    bytes: Bytes,
    image: Option<DecodedImage>,
    scaled: Option<(Dims, DecodedImage)>,
    inserted: Instant,
}

impl Entry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() >= ttl
    }
}

pub struct MemoryTier {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl MemoryTier {
    /// `capacity` of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        let mut entries = self.lock_entries();
        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(self.ttl),
            None => return false,
        };
        if expired {
            entries.pop(key);
            tracing::debug!(key, "memory entry expired");
        }
        !expired
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.with_live(key, |entry| entry.bytes.clone())
    }

    pub fn image(&self, key: &str) -> Option<DecodedImage> {
        self.with_live(key, |entry| entry.image.clone()).flatten()
    }

    pub fn scaled(&self, key: &str, dims: Dims) -> Option<DecodedImage> {
        self.with_live(key, |entry| match &entry.scaled {
            Some((d, image)) if *d == dims => Some(image.clone()),
            _ => None,
        })
        .flatten()
    }

    /// Insert or replace. Replacing resets the expiry clock and drops decoded forms.
    pub fn insert(&self, key: &str, bytes: Bytes) {
        let entry = Entry {
            bytes,
            image: None,
            scaled: None,
            inserted: Instant::now(),
        };
        let mut entries = self.lock_entries();
        if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
            if evicted != key {
                tracing::debug!(key = %evicted, "memory entry evicted for capacity");
            }
        }
    }

    /// Attach a decoded image to an existing live entry. No-op if the entry is gone.
    pub fn attach(&self, key: &str, dims: Option<Dims>, image: DecodedImage) {
        let mut entries = self.lock_entries();
        if let Some(entry) = entries.peek_mut(key) {
            match dims {
                Some(d) => entry.scaled = Some((d, image)),
                None => entry.image = Some(image),
            }
        }
    }

    /// Forget decoded images, keep raw bytes.
    pub fn drop_decoded(&self) {
        let mut entries = self.lock_entries();
        for (_, entry) in entries.iter_mut() {
            entry.image = None;
            entry.scaled = None;
        }
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A panic while holding the lock leaves every entry intact, so poisoning is ignored.
    fn lock_entries(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_live<T>(&self, key: &str, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        let mut entries = self.lock_entries();
        let expired = entries.peek(key)?.is_expired(self.ttl);
        if expired {
            entries.pop(key);
            tracing::debug!(key, "memory entry expired");
            return None;
        }
        entries.get(key).map(f)
    }
}
