//! Persistent tier.
//!
//! Layout under the cache directory:
//!
//! ```text
//! <key>.json   metadata (provider, cost class, timing, created_at, digest)
//! <key>.bin    artifact bytes
//! ```
//!
//! The artifact is written before its metadata and both land via rename, so
//! a metadata file always points at a complete artifact. Anything unreadable
//! or failing the digest check is a miss and gets deleted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CacheEntry;
use super::key::is_valid_key;
use crate::billing::CostClass;
use crate::edit::EditedImage;
use crate::error::CacheError;

#[derive(Debug, Serialize, Deserialize)]
struct DiskMeta {
    key: String,
    provider_id: String,
    cost_class: CostClass,
    processing_ms: u64,
    created_at: DateTime<Utc>,
    content_type: String,
    artifact_sha256: String,
}

/// Outcome of a disk lookup.
#[derive(Debug)]
pub enum DiskLookup {
    Hit(CacheEntry),
    Miss,
    Expired,
    Corrupt(String),
}

pub struct DiskTier {
    dir: PathBuf,
    /// Readers share, writers and clears are exclusive.
    lock: tokio::sync::RwLock<()>,
}

impl DiskTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: tokio::sync::RwLock::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Look up `key`, treating entries created before `now - ttl` as expired.
    /// Expired and corrupt entries are removed.
    pub async fn get(&self, key: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> DiskLookup {
        if !is_valid_key(key) {
            return DiskLookup::Miss;
        }

        let lookup = {
            let _read = self.lock.read().await;
            self.read_entry(key, now, ttl).await
        };

        match lookup {
            DiskLookup::Expired | DiskLookup::Corrupt(_) => self.evict_stale(key, now, ttl, lookup).await,
            lookup => lookup,
        }
    }

    /// Remove `key` under the write lock if it is still stale. A `put` can
    /// land between the read and write locks; its entry is returned instead.
    async fn evict_stale(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
        seen: DiskLookup,
    ) -> DiskLookup {
        let _write = self.lock.write().await;
        match self.read_entry(key, now, ttl).await {
            DiskLookup::Hit(entry) => DiskLookup::Hit(entry),
            DiskLookup::Miss => seen,
            stale => {
                self.remove_files(key).await;
                stale
            }
        }
    }

    pub async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        if !is_valid_key(&entry.key) {
            return Err(CacheError::Io {
                path: entry.key.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "malformed cache key"),
            });
        }

        let meta = DiskMeta {
            key: entry.key.clone(),
            provider_id: entry.provider_id.clone(),
            cost_class: entry.cost_class,
            processing_ms: entry.processing_duration.as_millis() as u64,
            created_at: entry.created_at,
            content_type: entry.artifact.content_type.clone(),
            artifact_sha256: digest(&entry.artifact.data),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta)?;

        let _write = self.lock.write().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        atomic_write(&self.artifact_path(&entry.key), &entry.artifact.data).await?;
        atomic_write(&self.meta_path(&entry.key), &meta_bytes).await?;
        Ok(())
    }

    /// Delete every entry.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let _write = self.lock.write().await;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&self.dir, e)),
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))
    }

    /// Remove every expired or unreadable entry. Returns how many went.
    pub async fn purge_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<usize, CacheError> {
        let keys = {
            let _read = self.lock.read().await;
            let mut keys = Vec::new();
            let mut dir = match tokio::fs::read_dir(&self.dir).await {
                Ok(dir) => dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(io_error(&self.dir, e)),
            };
            while let Some(item) = dir.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
                let path = item.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        keys.push(stem.to_string());
                    }
                }
            }
            keys
        };

        let mut purged = 0;
        for key in keys {
            if matches!(
                self.get(&key, now, ttl).await,
                DiskLookup::Expired | DiskLookup::Corrupt(_)
            ) {
                purged += 1;
            }
        }
        Ok(purged)
    }

    // --- Private helpers ---

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn artifact_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }

    async fn read_entry(&self, key: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> DiskLookup {
        let meta_bytes = match tokio::fs::read(self.meta_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return DiskLookup::Miss,
            Err(e) => return DiskLookup::Corrupt(format!("metadata unreadable: {e}")),
        };
        let meta: DiskMeta = match serde_json::from_slice(&meta_bytes) {
            Ok(meta) => meta,
            Err(e) => return DiskLookup::Corrupt(format!("metadata unparsable: {e}")),
        };
        if meta.key != key {
            return DiskLookup::Corrupt("metadata key mismatch".to_string());
        }
        if now - meta.created_at >= ttl {
            return DiskLookup::Expired;
        }

        let data = match tokio::fs::read(self.artifact_path(key)).await {
            Ok(data) => data,
            Err(e) => return DiskLookup::Corrupt(format!("artifact unreadable: {e}")),
        };
        if digest(&data) != meta.artifact_sha256 {
            return DiskLookup::Corrupt("artifact digest mismatch".to_string());
        }

        DiskLookup::Hit(CacheEntry {
            key: meta.key,
            artifact: EditedImage::new(data, meta.content_type),
            provider_id: meta.provider_id,
            cost_class: meta.cost_class,
            processing_duration: Duration::from_millis(meta.processing_ms),
            created_at: meta.created_at,
        })
    }

    async fn remove_files(&self, key: &str) {
        for path in [self.meta_path(key), self.artifact_path(key)] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), error = %e, "Failed to remove cache file");
                }
            }
        }
    }
}

impl std::fmt::Debug for DiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTier").field("dir", &self.dir).finish()
    }
}

fn digest(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{:02x}", b)).collect()
}

/// Write to a temp file beside `path`, then rename over it.
async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, data).await.map_err(|e| io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}
