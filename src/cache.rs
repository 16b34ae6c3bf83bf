//! Two-tier preview cache.
//!
//! Memory tier: [`MemoryCache`] under a mutex, bounded by count and bytes.
//! Persistent tier: [`DiskStore`], one record per key. Both tiers use the
//! same content-addressed key (see [`cache_key`]). Expiry is stored as an
//! absolute timestamp and checked on every read.

use crate::config::PreviewConfig;
use crate::lru::MemoryCache;
use crate::store::DiskStore;
use crate::utils::cache_key;
use crate::{PreviewData, PreviewError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: PreviewData,
    pub expiration: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(data: PreviewData, ttl: Duration) -> Self {
        let now = Utc::now();
        let expiration = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { data, expiration }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration > now
    }

    fn cost(&self, key: &str) -> usize {
        key.len() + self.data.approximate_size()
    }
}

pub struct PreviewCache {
    memory: Mutex<MemoryCache<CacheEntry>>,
    // Bumped under the memory lock by every write, removal and clear.
    generation: AtomicU64,
    store: DiskStore,
    default_ttl: Duration,
}

impl PreviewCache {
    pub async fn open(config: &PreviewConfig) -> Result<Self, PreviewError> {
        config.validate()?;
        let store = DiskStore::open(&config.cache_dir).await?;
        Ok(Self::with_store(
            store,
            config.memory_max_entries,
            config.memory_max_bytes,
            config.default_ttl(),
        ))
    }

    pub fn with_store(
        store: DiskStore,
        memory_max_entries: usize,
        memory_max_bytes: usize,
        default_ttl: Duration,
    ) -> Self {
        debug!(
            memory_max_entries,
            memory_max_bytes,
            ttl_secs = default_ttl.as_secs(),
            "Initializing preview cache"
        );
        Self {
            memory: Mutex::new(MemoryCache::new(memory_max_entries, memory_max_bytes)),
            generation: AtomicU64::new(0),
            store,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn store(&self) -> &DiskStore {
        &self.store
    }

    pub fn memory_len(&self) -> usize {
        self.memory.lock().len()
    }

    /// Memory-tier lookup only. Expired entries are evicted on the way.
    pub fn get_from_memory(&self, url: &str) -> Option<PreviewData> {
        self.memory_lookup(&cache_key(url))
    }

    fn memory_lookup(&self, key: &str) -> Option<PreviewData> {
        self.memory_lookup_at_generation(key).0
    }

    /// Memory lookup plus the generation it was taken at.
    fn memory_lookup_at_generation(&self, key: &str) -> (Option<PreviewData>, u64) {
        let mut memory = self.memory.lock();
        let generation = self.generation.load(Ordering::Acquire);
        let Some(entry) = memory.get(key) else {
            return (None, generation);
        };
        if entry.is_valid() {
            return (Some(entry.data.clone()), generation);
        }
        memory.remove(key);
        debug!(key, "Evicted expired memory entry");
        (None, generation)
    }

    /// Inserts a record read from disk unless the cache was written, removed
    /// from or cleared since `seen_generation`.
    fn promote(&self, key: String, entry: CacheEntry, seen_generation: u64) -> bool {
        let mut memory = self.memory.lock();
        if self.generation.load(Ordering::Acquire) != seen_generation {
            debug!(key = %key, "Cache changed during disk read, not promoting");
            return false;
        }
        let cost = entry.cost(&key);
        memory.insert(key, entry, cost);
        true
    }

    /// Memory tier, then persistent tier with promotion. Storage failures
    /// count as a miss.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, url: &str) -> Option<PreviewData> {
        let key = cache_key(url);
        let (hit, generation) = self.memory_lookup_at_generation(&key);
        if let Some(data) = hit {
            debug!("Memory cache hit");
            return Some(data);
        }

        let entry = match self.store.read(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, key = %key, "Unreadable cache record, discarding");
                if let Err(e) = self.store.delete(&key).await {
                    e.log();
                }
                return None;
            }
        };

        if !entry.is_valid() {
            debug!(key = %key, "Persisted entry expired");
            if let Err(e) = self.store.delete(&key).await {
                e.log();
            }
            return None;
        }

        debug!("Persistent cache hit, promoting");
        let data = entry.data.clone();
        self.promote(key, entry, generation);
        Some(data)
    }

    pub async fn set(&self, url: &str, data: PreviewData) -> Result<(), PreviewError> {
        self.set_with_ttl(url, data, self.default_ttl).await
    }

    /// Writes both tiers. The memory tier is updated even when the
    /// persistent write fails; that failure is returned to the caller.
    #[instrument(level = "debug", skip(self, data))]
    pub async fn set_with_ttl(
        &self,
        url: &str,
        data: PreviewData,
        ttl: Duration,
    ) -> Result<(), PreviewError> {
        let key = cache_key(url);
        let entry = CacheEntry::new(data, ttl);
        let cost = entry.cost(&key);

        let evicted = {
            let mut memory = self.memory.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            memory.insert(key.clone(), entry.clone(), cost)
        };
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Memory tier evicted entries");
        }

        self.store.write(&key, &entry).await
    }

    /// Deletes `url` from both tiers whether or not it was present.
    pub async fn remove(&self, url: &str) -> Result<(), PreviewError> {
        let key = cache_key(url);
        {
            let mut memory = self.memory.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            memory.remove(&key);
        }
        self.store.delete(&key).await?;
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<(), PreviewError> {
        {
            let mut memory = self.memory.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            memory.clear();
        }
        self.store.clear().await
    }

    /// Persistent-tier sweep. Callers decide when to run it.
    pub async fn remove_expired(&self) -> Result<usize, PreviewError> {
        self.store.remove_expired(Utc::now()).await
    }
}
