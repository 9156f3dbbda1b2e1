//! In-memory cache store used by tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::lock::{rw_read, rw_write};
use super::paths::CachePath;
use super::store::{CacheEntry, CacheError, CacheStore, TagPredicate};

const SOURCE: &str = "cache::memory";

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<BTreeMap<CachePath, CacheEntry>>,
    writes: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<CachePath> {
        rw_read(&self.entries, SOURCE, "paths")
            .keys()
            .cloned()
            .collect()
    }

    pub fn get(&self, path: &str) -> Option<CacheEntry> {
        let path = CachePath::new(path).ok()?;
        rw_read(&self.entries, SOURCE, "get").get(&path).cloned()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn write(&self, entry: CacheEntry) -> Result<(), CacheError> {
        rw_write(&self.entries, SOURCE, "write").insert(entry.path.clone(), entry);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, paths: &[CachePath]) -> Result<BTreeSet<CachePath>, CacheError> {
        let entries = rw_read(&self.entries, SOURCE, "exists");
        Ok(paths
            .iter()
            .filter(|path| entries.contains_key(*path))
            .cloned()
            .collect())
    }

    async fn read(&self, path: &CachePath) -> Result<Option<CacheEntry>, CacheError> {
        Ok(rw_read(&self.entries, SOURCE, "read").get(path).cloned())
    }

    async fn delete_by_tag(
        &self,
        predicate: &TagPredicate<'_>,
    ) -> Result<Vec<CachePath>, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_by_tag");
        let doomed: Vec<CachePath> = entries
            .values()
            .filter(|entry| predicate(&entry.path, &entry.metadata))
            .map(|entry| entry.path.clone())
            .collect();
        for path in &doomed {
            entries.remove(path);
        }
        Ok(doomed)
    }
}
