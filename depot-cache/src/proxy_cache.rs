//! Local cache of proxied content
//!
//! Items fetched from a remote are kept with the time the remote last
//! confirmed them. An item has to be revalidated against the remote when it
//! is:
//!
//! - flagged expired by a subtree expiry,
//! - older than the invalidation token (a root expiry rotates the token), or
//! - older than the repository's item max age.
//!
//! Content bytes live in memory here; durable blob storage sits behind the
//! same [`ProxyCacheStore`] trait.

use crate::generation::{Generation, GenerationCounter};
use crate::stats::{CacheStats, StatsCounters};
use async_trait::async_trait;
use chrono::Utc;
use depot_core::{RemoteContent, RepositoryId, RepositoryPath, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Root-expiry epoch of a proxy cache. Items stored under an older token are
/// stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvalidationToken(u64);

impl InvalidationToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A locally cached copy of remote content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedItem {
    pub path: RepositoryPath,
    pub content: RemoteContent,
    pub cached_at: Timestamp,
    /// Last time the remote confirmed this copy.
    pub remote_checked_at: Timestamp,
    pub expired: bool,
    pub token: InvalidationToken,
}

impl CachedItem {
    /// True when the item must be checked against the remote before use.
    ///
    /// # Arguments
    /// * `current` - The store's current invalidation token
    /// * `max_age` - Item max age; `None` means items never age out
    /// * `now` - Evaluation time
    pub fn needs_revalidation(
        &self,
        current: InvalidationToken,
        max_age: Option<Duration>,
        now: Timestamp,
    ) -> bool {
        if self.expired || self.token != current {
            return true;
        }
        match max_age {
            None => false,
            Some(max_age) => (now - self.remote_checked_at)
                .to_std()
                .map(|age| age >= max_age)
                .unwrap_or(false),
        }
    }
}

/// Storage for proxied content.
#[async_trait]
pub trait ProxyCacheStore: Send + Sync {
    async fn get(&self, path: &RepositoryPath) -> Option<CachedItem>;

    /// Store freshly fetched content.
    ///
    /// A write observed before the latest expiry is stored already expired, so
    /// the next request revalidates it.
    async fn store(
        &self,
        path: &RepositoryPath,
        content: RemoteContent,
        observed: Generation,
    ) -> CachedItem;

    /// The remote confirmed the cached copy (HTTP 304).
    ///
    /// # Returns
    /// `false` if no item is cached at `path`.
    async fn mark_checked(&self, path: &RepositoryPath, observed: Generation) -> bool;

    /// Expire cached items. The root path rotates the invalidation token;
    /// any other path flags the items of its subtree.
    ///
    /// # Returns
    /// `true` if anything was altered.
    async fn expire(&self, path: &RepositoryPath) -> bool;

    async fn remove(&self, path: &RepositoryPath) -> bool;

    fn observe(&self) -> Generation;

    fn current_token(&self) -> InvalidationToken;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Process-local [`ProxyCacheStore`].
pub struct InMemoryProxyCache {
    repository: RepositoryId,
    items: RwLock<BTreeMap<RepositoryPath, CachedItem>>,
    token: AtomicU64,
    generation: GenerationCounter,
    stats: StatsCounters,
}

impl InMemoryProxyCache {
    pub fn new(repository: RepositoryId) -> Self {
        Self {
            repository,
            items: RwLock::new(BTreeMap::new()),
            token: AtomicU64::new(0),
            generation: GenerationCounter::new(),
            stats: StatsCounters::default(),
        }
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

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<RepositoryPath, CachedItem>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<RepositoryPath, CachedItem>> {
        self.items.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProxyCacheStore for InMemoryProxyCache {
    async fn get(&self, path: &RepositoryPath) -> Option<CachedItem> {
        let item = self.read().get(path).cloned();
        match item {
            Some(_) => self.stats.hit(),
            None => self.stats.miss(),
        }
        item
    }

    async fn store(
        &self,
        path: &RepositoryPath,
        content: RemoteContent,
        observed: Generation,
    ) -> CachedItem {
        let mut items = self.write();
        let now = Utc::now();
        let expired = !self.generation.is_current(observed);
        if expired {
            debug!(
                repository = %self.repository,
                path = %path,
                "Cache expired during fetch, storing item as expired"
            );
        }
        let item = CachedItem {
            path: path.clone(),
            content,
            cached_at: now,
            remote_checked_at: now,
            expired,
            token: self.current_token(),
        };
        items.insert(path.clone(), item.clone());
        item
    }

    async fn mark_checked(&self, path: &RepositoryPath, observed: Generation) -> bool {
        let mut items = self.write();
        let current = self.generation.is_current(observed);
        let token = self.current_token();
        match items.get_mut(path) {
            Some(item) => {
                item.remote_checked_at = Utc::now();
                if current {
                    item.expired = false;
                    item.token = token;
                }
                true
            }
            None => false,
        }
    }

    async fn expire(&self, path: &RepositoryPath) -> bool {
        let mut items = self.write();
        self.generation.advance();

        if path.is_root() {
            let token = self.token.fetch_add(1, Ordering::AcqRel) + 1;
            info!(
                repository = %self.repository,
                token = token,
                "Rotated proxy cache invalidation token"
            );
            return true;
        }

        let mut flipped = 0usize;
        for (_, item) in items
            .range_mut(path.clone()..)
            .take_while(|(key, _)| key.starts_with(path))
        {
            if !item.expired {
                item.expired = true;
                flipped += 1;
            }
        }

        if flipped > 0 {
            info!(
                repository = %self.repository,
                path = %path,
                expired = flipped,
                "Expired proxy cache items"
            );
        }
        flipped > 0
    }

    async fn remove(&self, path: &RepositoryPath) -> bool {
        self.write().remove(path).is_some()
    }

    fn observe(&self) -> Generation {
        self.generation.observe()
    }

    fn current_token(&self) -> InvalidationToken {
        InvalidationToken(self.token.load(Ordering::Acquire))
    }
}

impl std::fmt::Debug for InMemoryProxyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProxyCache")
            .field("repository", &self.repository)
            .field("items", &self.len())
            .field("token", &self.current_token())
            .finish()
    }
}
