//! Consumer association: which key a consumer is currently waiting for.

use std::sync::{Mutex, MutexGuard};

/// Something that displays (or otherwise consumes) one image at a time.
///
/// The scheduler records the key a consumer awaits and delivers a result only
/// while the consumer still awaits that key. Assigning a new key supersedes the
/// old one; the old job keeps running and may still fill the cache.
pub trait Consumer: Send + Sync {
    fn current_key(&self) -> Option<String>;

    /// Store `key` and return the previous one as a single atomic step.
    /// The scheduler decides whether a request is a repeat from the returned value.
    fn replace_key(&self, key: Option<&str>) -> Option<String>;

    fn set_current_key(&self, key: Option<&str>) {
        self.replace_key(key);
    }
}

/// Plain mutex-backed [`Consumer`].
#[derive(Debug, Default)]
pub struct Slot {
    key: Mutex<Option<String>>,
}

impl Slot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_key(&self) -> MutexGuard<'_, Option<String>> {
        self.key.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Consumer for Slot {
    fn current_key(&self) -> Option<String> {
        self.lock_key().clone()
    }

    fn replace_key(&self, key: Option<&str>) -> Option<String> {
        std::mem::replace(&mut *self.lock_key(), key.map(str::to_string))
    }
}
