//! Negative (not-found) cache
//!
//! Records paths the remote recently confirmed absent, so the proxy pipeline
//! can answer them without a round-trip until the entry's TTL runs out.
//!
//! Entries are kept ordered by path, which makes subtree expiry a range scan.
//! Writes carry the [`Generation`] observed before the remote request went
//! out; a write observed before the latest expiry or the latest successful
//! fetch is dropped.

use crate::generation::{Generation, GenerationCounter};
use crate::stats::{CacheStats, StatsCounters};
use chrono::Utc;
use depot_core::{NegativeCacheConfig, RepositoryId, RepositoryPath, Timestamp};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// ENTRY
// ============================================================================

/// A path the remote confirmed absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegativeCacheEntry {
    path: RepositoryPath,
    inserted_at: Timestamp,
    ttl: Duration,
}

impl NegativeCacheEntry {
    pub fn new(path: RepositoryPath, inserted_at: Timestamp, ttl: Duration) -> Self {
        Self {
            path,
            inserted_at,
            ttl,
        }
    }

    pub fn path(&self) -> &RepositoryPath {
        &self.path
    }

    pub fn inserted_at(&self) -> Timestamp {
        self.inserted_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// An entry stays valid for `ttl` after insertion. Clock skew backwards
    /// keeps it valid.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        (now - self.inserted_at)
            .to_std()
            .map(|elapsed| elapsed >= self.ttl)
            .unwrap_or(false)
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Per-repository negative cache.
pub struct NegativeCache {
    repository: RepositoryId,
    config: RwLock<NegativeCacheConfig>,
    entries: RwLock<BTreeMap<RepositoryPath, NegativeCacheEntry>>,
    generation: GenerationCounter,
    stats: StatsCounters,
}

impl NegativeCache {
    pub fn new(repository: RepositoryId, config: NegativeCacheConfig) -> Self {
        Self {
            repository,
            config: RwLock::new(config),
            entries: RwLock::new(BTreeMap::new()),
            generation: GenerationCounter::new(),
            stats: StatsCounters::default(),
        }
    }

    pub fn repository(&self) -> &RepositoryId {
        &self.repository
    }

    pub fn config(&self) -> NegativeCacheConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.config.read().unwrap_or_else(PoisonError::into_inner).active
    }

    /// Replace the configuration. Deactivating the cache purges it.
    pub fn set_config(&self, config: NegativeCacheConfig) {
        let deactivated = !config.active;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        if deactivated {
            self.purge();
        }
    }

    /// Generation to hand back to [`record_miss`](Self::record_miss) once the
    /// remote answered.
    pub fn observe(&self) -> Generation {
        self.generation.observe()
    }

    /// Record a confirmed remote miss.
    ///
    /// # Returns
    /// `true` if the entry was written; `false` if the cache is inactive or
    /// an expiry ran since `observed`.
    pub fn record_miss(&self, path: &RepositoryPath, observed: Generation) -> bool {
        self.record_miss_at(path, observed, Utc::now())
    }

    pub fn record_miss_at(
        &self,
        path: &RepositoryPath,
        observed: Generation,
        now: Timestamp,
    ) -> bool {
        let config = self.config();
        if !config.active {
            return false;
        }

        let mut entries = self.write();
        // Checked under the write lock, expire() advances under it too.
        if !self.generation.is_current(observed) {
            debug!(
                repository = %self.repository,
                path = %path,
                "Dropping stale negative cache write"
            );
            return false;
        }
        entries.insert(
            path.clone(),
            NegativeCacheEntry::new(path.clone(), now, config.ttl()),
        );
        debug!(repository = %self.repository, path = %path, "Negative cached");
        true
    }

    /// True when `path` is a known, unexpired miss.
    pub fn is_miss(&self, path: &RepositoryPath) -> bool {
        self.is_miss_at(path, Utc::now())
    }

    pub fn is_miss_at(&self, path: &RepositoryPath, now: Timestamp) -> bool {
        if !self.is_active() {
            self.stats.miss();
            return false;
        }

        let expired = match self.read().get(path) {
            None => {
                self.stats.miss();
                return false;
            }
            Some(entry) => entry.is_expired_at(now),
        };

        if !expired {
            self.stats.hit();
            return true;
        }

        let mut entries = self.write();
        if entries
            .get(path)
            .map(|entry| entry.is_expired_at(now))
            .unwrap_or(false)
        {
            entries.remove(path);
            self.stats.evicted(1);
        }
        self.stats.miss();
        false
    }

    /// Drop the entries a successful fetch of `path` disproves: the path
    /// itself and every cached parent. Misses still in flight from before
    /// the success are dropped when they land.
    ///
    /// # Returns
    /// Number of entries removed.
    pub fn clear_on_success(&self, path: &RepositoryPath) -> usize {
        let mut entries = self.write();
        self.generation.advance();
        let mut removed = usize::from(entries.remove(path).is_some());
        for parent in path.parents() {
            removed += usize::from(entries.remove(&parent).is_some());
        }
        if removed > 0 {
            debug!(
                repository = %self.repository,
                path = %path,
                removed = removed,
                "Cleared negative cache after successful fetch"
            );
        }
        removed
    }

    /// Expire every entry under `path`, plus every cached parent of it.
    /// The root path purges the whole cache.
    ///
    /// # Returns
    /// `true` if any entry was removed.
    pub fn expire(&self, path: &RepositoryPath) -> bool {
        let mut entries = self.write();
        self.generation.advance();

        let removed = if path.is_root() {
            let removed = entries.len();
            entries.clear();
            removed
        } else {
            let subtree: Vec<RepositoryPath> = entries
                .range(path.clone()..)
                .take_while(|(key, _)| key.starts_with(path))
                .map(|(key, _)| key.clone())
                .collect();
            let mut removed = subtree.len();
            for key in subtree {
                entries.remove(&key);
            }
            for parent in path.parents() {
                removed += usize::from(entries.remove(&parent).is_some());
            }
            removed
        };

        if removed > 0 {
            info!(
                repository = %self.repository,
                path = %path,
                removed = removed,
                "Expired negative cache entries"
            );
        } else {
            debug!(repository = %self.repository, path = %path, "Nothing to expire in negative cache");
        }
        removed > 0
    }

    /// Remove every entry.
    ///
    /// # Returns
    /// Number of entries removed.
    pub fn purge(&self) -> usize {
        let mut entries = self.write();
        self.generation.advance();
        let removed = entries.len();
        entries.clear();
        if removed > 0 {
            info!(repository = %self.repository, removed = removed, "Purged negative cache");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len() as u64)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<RepositoryPath, NegativeCacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<RepositoryPath, NegativeCacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for NegativeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegativeCache")
            .field("repository", &self.repository)
            .field("config", &self.config())
            .field("entries", &self.len())
            .field("generation", &self.generation.observe())
            .finish()
    }
}
