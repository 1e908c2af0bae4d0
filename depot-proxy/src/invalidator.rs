//! Administrative cache expiry
//!
//! [`CacheInvalidator`] expires the negative cache or the proxied content of
//! a path subtree, in any registered repository, and publishes one event per
//! call carrying a snapshot of the caller's context and whether anything
//! changed. Expiring proxied content of a repository that does not proxy is
//! not an error; it reports "not altered".

use depot_cache::{NegativeCache, ProxyCacheStore};
use depot_core::{
    CacheExpiryOutcome, DepotResult, RepositoryError, RepositoryEvent, RepositoryId,
    RepositoryPath, RequestContext,
};
use depot_events::EventPublisher;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A repository whose caches can be expired.
pub trait ExpirableRepository: Send + Sync {
    fn id(&self) -> &RepositoryId;

    fn negative_cache(&self) -> &NegativeCache;

    /// Local store of proxied content; `None` for repositories that do not
    /// proxy.
    fn proxy_cache(&self) -> Option<&dyn ProxyCacheStore> {
        None
    }
}

/// Expires caches of registered repositories.
pub struct CacheInvalidator {
    repositories: RwLock<BTreeMap<RepositoryId, Arc<dyn ExpirableRepository>>>,
    publisher: Arc<dyn EventPublisher>,
}

impl CacheInvalidator {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            repositories: RwLock::new(BTreeMap::new()),
            publisher,
        }
    }

    /// Register a repository, replacing any previous one with the same id.
    pub fn register(&self, repository: Arc<dyn ExpirableRepository>) {
        self.repositories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repository.id().clone(), repository);
    }

    pub fn unregister(&self, id: &RepositoryId) -> bool {
        self.repositories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    fn lookup(&self, id: &RepositoryId) -> DepotResult<Arc<dyn ExpirableRepository>> {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| {
                RepositoryError::UnknownRepository {
                    repository: id.to_string(),
                }
                .into()
            })
    }

    /// Expire proxied content of the registered repository `id`.
    pub async fn expire_proxy_caches_by_id(
        &self,
        id: &RepositoryId,
        path: &RepositoryPath,
        context: &RequestContext,
    ) -> DepotResult<CacheExpiryOutcome> {
        let repository = self.lookup(id)?;
        Ok(self
            .expire_proxy_caches(repository.as_ref(), path, context)
            .await)
    }

    /// Expire negative cache entries of the registered repository `id`.
    pub fn expire_not_found_caches_by_id(
        &self,
        id: &RepositoryId,
        path: &RepositoryPath,
        context: &RequestContext,
    ) -> DepotResult<CacheExpiryOutcome> {
        let repository = self.lookup(id)?;
        Ok(self.expire_not_found_caches(repository.as_ref(), path, context))
    }

    /// Expire proxied content under `path`.
    ///
    /// # Returns
    /// The outcome; `altered` is false for repositories without a proxy
    /// cache.
    pub async fn expire_proxy_caches(
        &self,
        repository: &dyn ExpirableRepository,
        path: &RepositoryPath,
        context: &RequestContext,
    ) -> CacheExpiryOutcome {
        let outcome = match repository.proxy_cache() {
            Some(cache) => {
                let altered = cache.expire(path).await;
                CacheExpiryOutcome::new(repository.id().clone(), path.clone(), altered)
            }
            None => {
                debug!(
                    repository = %repository.id(),
                    "Not a proxy, nothing to expire"
                );
                CacheExpiryOutcome::not_altered(repository.id().clone(), path.clone())
            }
        };

        self.publisher
            .publish(RepositoryEvent::expire_proxy_caches(&outcome, context));
        outcome
    }

    /// Expire negative cache entries under `path`.
    pub fn expire_not_found_caches(
        &self,
        repository: &dyn ExpirableRepository,
        path: &RepositoryPath,
        context: &RequestContext,
    ) -> CacheExpiryOutcome {
        let altered = repository.negative_cache().expire(path);
        let outcome = CacheExpiryOutcome::new(repository.id().clone(), path.clone(), altered);

        self.publisher
            .publish(RepositoryEvent::expire_not_found_caches(&outcome, context));
        outcome
    }
}

impl std::fmt::Debug for CacheInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<RepositoryId> = self
            .repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("CacheInvalidator")
            .field("repositories", &ids)
            .finish()
    }
}
