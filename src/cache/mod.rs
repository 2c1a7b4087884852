//! Content-addressed result cache.
//!
//! ```text
//!            get                                set
//!             │                                  │
//!             ▼                                  ▼
//!   ┌──────────────────┐  promote  ┌──────────────────┐
//!   │   MemoryTier     │◀──────────│    DiskTier      │
//!   │ bounded, LRU     │           │ TTL, persistent  │
//!   └──────────────────┘           └──────────────────┘
//!      sync insert                   spawned write
//! ```
//!
//! The memory tier is an accelerator only and may be dropped at any time.
//! Entries older than the TTL (7 days by default) read as absent and are
//! purged when touched.

pub mod disk;
pub mod key;
pub mod memory;

pub use disk::{DiskLookup, DiskTier};
pub use key::{ROUTED_PROVIDER, UNCLASSIFIED_TASK, cache_key, is_valid_key};
pub use memory::MemoryTier;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::billing::CostClass;
use crate::clock::Clock;
use crate::edit::{EditOptions, EditTask, EditedImage, SourceImage};
use crate::error::CacheError;

/// Default time-to-live for cached results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default number of entries held in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 64;

/// One cached result. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub artifact: EditedImage,
    pub provider_id: String,
    pub cost_class: CostClass,
    pub processing_duration: Duration,
    pub created_at: DateTime<Utc>,
}

/// What a caller hands to [`ResultCache::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResult {
    pub artifact: EditedImage,
    pub provider_id: String,
    pub cost_class: CostClass,
    pub processing_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub memory_capacity: usize,
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Default cache directory (~/.ironlens/cache).
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ironlens")
            .join("cache")
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            ttl: DEFAULT_TTL,
        }
    }
}

/// Two-tier result cache.
pub struct ResultCache {
    memory: MemoryTier,
    disk: Arc<DiskTier>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    /// Disk writes still in flight.
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl ResultCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::from_std(config.ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            memory: MemoryTier::new(config.memory_capacity),
            disk: Arc::new(DiskTier::new(config.dir)),
            ttl,
            clock,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// See [`cache_key`].
    pub fn key(
        &self,
        image: &SourceImage,
        prompt: &str,
        provider_id: &str,
        task: Option<EditTask>,
        options: &EditOptions,
    ) -> String {
        cache_key(image, prompt, provider_id, task, options)
    }

    /// Look up a result: memory first, then disk. Disk hits are promoted.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();

        if let Some(entry) = self.memory.get(key) {
            if now - entry.created_at < self.ttl {
                tracing::debug!(key = %short(key), "Cache hit (memory)");
                return Some(entry);
            }
            self.memory.remove(key);
        }

        match self.disk.get(key, now, self.ttl).await {
            DiskLookup::Hit(entry) => {
                tracing::debug!(key = %short(key), "Cache hit (disk)");
                self.memory.insert(entry.clone());
                Some(entry)
            }
            DiskLookup::Expired => {
                tracing::debug!(key = %short(key), "Cache entry expired");
                None
            }
            DiskLookup::Corrupt(reason) => {
                tracing::warn!(key = %short(key), reason = %reason, "Discarded corrupt cache entry");
                None
            }
            DiskLookup::Miss => None,
        }
    }

    /// Store a result. The memory tier is updated before returning; the
    /// disk write runs in the background.
    pub fn set(&self, key: &str, result: CachedResult) {
        let entry = CacheEntry {
            key: key.to_string(),
            artifact: result.artifact,
            provider_id: result.provider_id,
            cost_class: result.cost_class,
            processing_duration: result.processing_duration,
            created_at: self.clock.now(),
        };
        self.memory.insert(entry.clone());

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::debug!(key = %short(key), "No runtime; cached in memory only");
                return;
            }
        };
        let disk = Arc::clone(&self.disk);
        let task = handle.spawn(async move {
            if let Err(e) = disk.put(&entry).await {
                tracing::warn!(key = %short(&entry.key), error = %e, "Failed to write cache entry");
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|t| !t.is_finished());
        pending.push(task);
    }

    /// Wait for every background disk write issued so far.
    pub async fn flush(&self) {
        let tasks = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Cache write task failed");
            }
        }
    }

    /// Empty both tiers.
    pub async fn clear_all(&self) -> Result<(), CacheError> {
        self.flush().await;
        let dropped = self.memory.clear();
        self.disk.clear().await?;
        tracing::info!(memory_entries = dropped, dir = %self.disk.dir().display(), "Cleared result cache");
        Ok(())
    }

    /// Drop the whole memory tier. Nothing is lost; the disk tier still
    /// holds every unexpired entry.
    pub fn on_memory_pressure(&self) {
        let dropped = self.memory.clear();
        tracing::info!(entries = dropped, "Memory pressure: evicted memory tier");
    }

    /// Sweep expired and corrupt entries from disk.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.flush().await;
        let purged = self.disk.purge_expired(self.clock.now(), self.ttl).await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired cache entries");
        }
        Ok(purged)
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("memory_entries", &self.memory.len())
            .field("disk", &self.disk)
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use image::DynamicImage;
    use pretty_assertions::assert_eq;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 10, 9, 0, 0).unwrap(),
        ))
    }

    fn cache(dir: &std::path::Path, clock: Arc<ManualClock>) -> ResultCache {
        ResultCache::new(
            CacheConfig {
                dir: dir.to_path_buf(),
                memory_capacity: 8,
                ttl: DEFAULT_TTL,
            },
            clock,
        )
    }

    fn result() -> CachedResult {
        CachedResult {
            artifact: EditedImage::new(vec![9u8; 32], "image/jpeg"),
            provider_id: "cloud-fast".into(),
            cost_class: CostClass::Budget,
            processing_duration: Duration::from_millis(250),
        }
    }

    fn key(cache: &ResultCache) -> String {
        let image = SourceImage::new(DynamicImage::new_rgb8(16, 16));
        cache.key(&image, "brighten", ROUTED_PROVIDER, None, &EditOptions::default())
    }

    #[tokio::test]
    async fn set_then_get_hits_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), clock());
        let key = key(&cache);

        cache.set(&key, result());
        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.artifact, result().artifact);
        assert_eq!(hit.provider_id, "cloud-fast");
    }

    #[tokio::test]
    async fn disk_hit_survives_restart_and_is_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let first = cache(dir.path(), Arc::clone(&clock));
        let key = key(&first);
        first.set(&key, result());
        first.flush().await;

        let second = cache(dir.path(), clock);
        assert_eq!(second.memory_len(), 0);
        let hit = second.get(&key).await.unwrap();
        assert_eq!(hit.cost_class, CostClass::Budget);
        assert_eq!(second.memory_len(), 1);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let cache = cache(dir.path(), Arc::clone(&clock));
        let key = key(&cache);
        cache.set(&key, result());
        cache.flush().await;

        clock.advance(chrono::Duration::days(6));
        assert!(cache.get(&key).await.is_some());

        clock.advance(chrono::Duration::days(1));
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.memory_len(), 0);
    }

    #[tokio::test]
    async fn memory_pressure_falls_back_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), clock());
        let key = key(&cache);
        cache.set(&key, result());
        cache.flush().await;

        cache.on_memory_pressure();
        assert_eq!(cache.memory_len(), 0);
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn corrupt_disk_entry_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), clock());
        let key = key(&cache);
        cache.set(&key, result());
        cache.flush().await;
        cache.on_memory_pressure();

        std::fs::write(dir.path().join(format!("{key}.bin")), b"truncated").unwrap();
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn clear_all_empties_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), clock());
        let key = key(&cache);
        cache.set(&key, result());

        cache.clear_all().await.unwrap();
        assert_eq!(cache.memory_len(), 0);
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn purge_removes_expired_disk_entries() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let cache = cache(dir.path(), Arc::clone(&clock));
        let key = key(&cache);
        cache.set(&key, result());

        clock.advance(chrono::Duration::days(8));
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
    }
}
