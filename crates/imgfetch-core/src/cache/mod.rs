//! Two-tier image cache.
//!
//! The fetch job and scheduler only talk to [`ImageCache`]. [`TieredCache`] is
//! the stock implementation: a bounded in-memory LRU with per-entry expiry in
//! front of an optional directory of raw files that never expire.

mod disk;
mod memory;
mod tiered;

pub use disk::DiskTier;
pub use memory::MemoryTier;
pub use tiered::TieredCache;

use bytes::Bytes;

use crate::decode::{DecodedImage, Dims};

/// Key → bytes / decoded image store shared by the caller thread and workers.
///
/// An entry stored with `put` stays readable through `get` until it expires
/// or is evicted for capacity. Entries are never observed half-written.
pub trait ImageCache: Send + Sync {
    /// Fast check against the memory tier only.
    fn contains_key_in_memory(&self, key: &str) -> bool;

    /// Raw bytes from any tier.
    fn get(&self, key: &str) -> Option<Bytes>;

    /// Full-resolution decoded image, decoding raw bytes on demand.
    fn get_image(&self, key: &str) -> Option<DecodedImage>;

    /// Image scaled to fit `dims`, decoding and scaling raw bytes on demand.
    fn get_scaled(&self, key: &str, dims: Dims) -> Option<DecodedImage>;

    /// Store (or refresh) the raw bytes for `key`.
    fn put(&self, key: &str, bytes: Bytes);

    /// Remember an already decoded image next to the raw bytes of `key`.
    fn put_image(&self, _key: &str, _dims: Option<Dims>, _image: DecodedImage) {}

    /// Drop every entry in every tier.
    fn clear(&self);

    /// Release memory that can be rebuilt (decoded images). Called when a
    /// decode runs out of memory.
    fn reclaim(&self) {}
}
