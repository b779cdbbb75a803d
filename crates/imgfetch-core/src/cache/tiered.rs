use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use super::{DiskTier, ImageCache, MemoryTier};
use crate::config::CacheConfig;
use crate::decode::{DecodedImage, Decoder, Dims};

/// Memory tier in front of an optional disk tier.
///
/// Disk hits are promoted into memory. Decoded forms live only in memory and
/// are dropped first when a decode runs short of memory.
pub struct TieredCache {
    memory: MemoryTier,
    disk: Option<DiskTier>,
    decoder: Decoder,
}

impl TieredCache {
    /// Memory-only cache.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            memory: MemoryTier::new(capacity, ttl),
            disk: None,
            decoder: Decoder::default(),
        }
    }

    pub fn with_disk(mut self, disk: DiskTier) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn from_config(cfg: &CacheConfig, decoder: Decoder) -> Result<Self> {
        let mut cache = Self::new(cfg.memory_capacity, cfg.ttl()).with_decoder(decoder);
        if cfg.disk {
            let dir = cfg.resolved_disk_dir()?;
            cache = cache.with_disk(DiskTier::open(dir, Some(cfg.disk_write_timeout()))?);
        }
        Ok(cache)
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn disk(&self) -> Option<&DiskTier> {
        self.disk.as_ref()
    }

    fn decode(&self, key: &str, bytes: &[u8], dims: Option<Dims>) -> Option<DecodedImage> {
        let reclaim = || self.memory.drop_decoded();
        let decoded = match dims {
            Some(d) => self.decoder.decode_and_resize(bytes, d, &reclaim),
            None => self.decoder.decode(bytes, &reclaim),
        };
        match decoded {
            Ok(image) => {
                let image = Arc::new(image);
                self.memory.attach(key, dims, Arc::clone(&image));
                Some(image)
            }
            Err(e) => {
                tracing::debug!(key, error = %e, "cached bytes did not decode");
                None
            }
        }
    }
}

impl ImageCache for TieredCache {
    fn contains_key_in_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(bytes) = self.memory.get(key) {
            return Some(bytes);
        }
        let disk = self.disk.as_ref()?;
        match disk.read(key) {
            Ok(Some(raw)) => {
                tracing::debug!(key, len = raw.len(), "disk hit; promoting");
                let bytes = Bytes::from(raw);
                self.memory.insert(key, bytes.clone());
                Some(bytes)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "disk cache read failed");
                None
            }
        }
    }

    fn get_image(&self, key: &str) -> Option<DecodedImage> {
        if let Some(image) = self.memory.image(key) {
            return Some(image);
        }
        let bytes = self.get(key)?;
        self.decode(key, &bytes, None)
    }

    fn get_scaled(&self, key: &str, dims: Dims) -> Option<DecodedImage> {
        if let Some(image) = self.memory.scaled(key, dims) {
            return Some(image);
        }
        let bytes = self.get(key)?;
        self.decode(key, &bytes, Some(dims))
    }

    fn put(&self, key: &str, bytes: Bytes) {
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.write(key, &bytes) {
                tracing::warn!(key, error = %e, "disk cache write failed; keeping memory copy only");
            }
        }
        self.memory.insert(key, bytes);
    }

    fn put_image(&self, key: &str, dims: Option<Dims>, image: DecodedImage) {
        self.memory.attach(key, dims, image);
    }

    fn clear(&self) {
        self.memory.clear();
        if let Some(disk) = &self.disk {
            match disk.clear() {
                Ok(removed) => tracing::info!(removed, dir = %disk.dir().display(), "disk cache cleared"),
                Err(e) => tracing::warn!(error = %e, "failed to clear disk cache"),
            }
        }
    }

    fn reclaim(&self) {
        self.memory.drop_decoded();
    }
}
