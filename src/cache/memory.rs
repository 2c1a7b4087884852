//! Bounded in-memory tier.
//!
//! Least-recently-used eviction over a fixed item count. Races between
//! writers are fine: last writer wins, and the disk tier stays authoritative.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::CacheEntry;

struct Slot {
    entry: CacheEntry,
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    tick: u64,
}

pub struct MemoryTier {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let slot = inner.slots.get_mut(key)?;
        slot.last_used = tick;
        Some(slot.entry.clone())
    }

    pub fn insert(&self, entry: CacheEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.slots.contains_key(&entry.key) && inner.slots.len() >= self.capacity {
            let oldest = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                inner.slots.remove(&oldest);
                tracing::trace!(key = %oldest, "Evicted from memory tier");
            }
        }

        inner.slots.insert(
            entry.key.clone(),
            Slot {
                entry,
                last_used: tick,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.lock().slots.remove(key);
    }

    /// Drop everything. Returns how many entries were held.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.slots.len();
        inner.slots.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::CostClass;
    use crate::edit::EditedImage;
    use chrono::Utc;
    use std::time::Duration;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            artifact: EditedImage::new(key.as_bytes().to_vec(), "image/png"),
            provider_id: "on-device".into(),
            cost_class: CostClass::Free,
            processing_duration: Duration::from_millis(5),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn evicts_least_recently_used() {
        let tier = MemoryTier::new(2);
        tier.insert(entry("a"));
        tier.insert(entry("b"));
        assert!(tier.get("a").is_some()); // b is now the oldest
        tier.insert(entry("c"));

        assert_eq!(tier.len(), 2);
        assert!(tier.get("a").is_some());
        assert!(tier.get("b").is_none());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn overwrite_does_not_evict() {
        let tier = MemoryTier::new(2);
        tier.insert(entry("a"));
        tier.insert(entry("b"));
        tier.insert(entry("a"));
        assert_eq!(tier.len(), 2);
        assert!(tier.get("b").is_some());
    }

    #[test]
    fn zero_capacity_holds_nothing() {
        let tier = MemoryTier::new(0);
        tier.insert(entry("a"));
        assert!(tier.is_empty());
    }

    #[test]
    fn clear_reports_count() {
        let tier = MemoryTier::new(4);
        tier.insert(entry("a"));
        tier.insert(entry("b"));
        assert_eq!(tier.clear(), 2);
        assert!(tier.get("a").is_none());
    }
}
