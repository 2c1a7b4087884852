//! Ledger persistence.
//!
//! The ledger keeps its counters in memory and hands a [`LedgerSnapshot`] to
//! a [`LedgerStore`] after every mutation. Snapshots carry a revision so a
//! store can drop writes that lost a race with a newer one.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Persisted ledger state, keyed by installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub budget_used: u32,
    pub premium_used: u32,
    /// Calendar month the counters belong to, `"YYYY-MM"`.
    pub period: String,
    /// Purchased premium credits. Never reset by rollover.
    pub addon_premium_balance: u32,
    /// Monotonic mutation counter.
    #[serde(default)]
    pub revision: u64,
}

impl LedgerSnapshot {
    pub fn empty(period: impl Into<String>) -> Self {
        Self {
            budget_used: 0,
            premium_used: 0,
            period: period.into(),
            addon_premium_balance: 0,
            revision: 0,
        }
    }
}

/// Backing store for ledger snapshots.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load the last saved snapshot, if any.
    async fn load(&self) -> Result<Option<LedgerSnapshot>, LedgerError>;

    /// Persist a snapshot. Implementations must ignore snapshots older than
    /// one already written.
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), LedgerError>;
}

/// Stores the snapshot as a JSON file, written atomically.
#[derive(Debug)]
pub struct JsonLedgerStore {
    path: PathBuf,
    /// Revision of the last snapshot that reached disk. Held across the write
    /// so writers are serialized.
    written: tokio::sync::Mutex<Option<u64>>,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: tokio::sync::Mutex::new(None),
        }
    }

    /// Default ledger file (~/.ironlens/ledger.json).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ironlens")
            .join("ledger.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for JsonLedgerStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>, LedgerError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&self.path, e)),
        };
        let snapshot: LedgerSnapshot = serde_json::from_str(&data)?;
        *self.written.lock().await = Some(snapshot.revision);
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), LedgerError> {
        let mut written = self.written.lock().await;
        if matches!(*written, Some(rev) if rev >= snapshot.revision) {
            tracing::trace!(
                revision = snapshot.revision,
                "Skipping stale ledger snapshot"
            );
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        *written = Some(snapshot.revision);
        Ok(())
    }
}

/// In-process store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    saved: Mutex<Option<LedgerSnapshot>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            saved: Mutex::new(Some(snapshot)),
        }
    }

    /// The most recently saved snapshot.
    pub fn saved(&self) -> Option<LedgerSnapshot> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>, LedgerError> {
        Ok(self.saved())
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), LedgerError> {
        let mut saved = self.saved.lock().unwrap_or_else(|e| e.into_inner());
        if saved.as_ref().is_some_and(|s| s.revision >= snapshot.revision) {
            return Ok(());
        }
        *saved = Some(snapshot.clone());
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(revision: u64, budget_used: u32) -> LedgerSnapshot {
        LedgerSnapshot {
            budget_used,
            revision,
            ..LedgerSnapshot::empty("2026-03")
        }
    }

    #[tokio::test]
    async fn json_store_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLedgerStore::new(dir.path().join("ledger.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.json");

        JsonLedgerStore::new(&path).save(&snapshot(3, 7)).await.unwrap();

        let loaded = JsonLedgerStore::new(&path).load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot(3, 7));
    }

    #[tokio::test]
    async fn json_store_skips_stale_revision() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLedgerStore::new(dir.path().join("ledger.json"));

        store.save(&snapshot(5, 9)).await.unwrap();
        store.save(&snapshot(4, 1)).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.budget_used, 9);
    }

    #[tokio::test]
    async fn json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonLedgerStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, LedgerError::Serialization(_)));
    }

    #[tokio::test]
    async fn memory_store_skips_stale_revision() {
        let store = MemoryLedgerStore::new();
        store.save(&snapshot(2, 2)).await.unwrap();
        store.save(&snapshot(1, 1)).await.unwrap();
        assert_eq!(store.saved().unwrap().budget_used, 2);
    }
}
