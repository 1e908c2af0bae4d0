//! Hosted repositories
//!
//! A hosted repository has no remote. It still keeps a negative cache of
//! paths looked up and found missing locally, which administrative expiry
//! can clear; proxy cache expiry never alters it.

use crate::invalidator::ExpirableRepository;
use depot_cache::NegativeCache;
use depot_core::{ConfigError, DepotResult, RepositoryConfig, RepositoryId, RepositoryPath};

#[derive(Debug)]
pub struct HostedRepository {
    config: RepositoryConfig,
    negative_cache: NegativeCache,
}

impl HostedRepository {
    pub fn new(config: RepositoryConfig) -> DepotResult<Self> {
        config.validate()?;
        if config.is_proxy() {
            return Err(ConfigError::InvalidValue {
                field: "kind".to_string(),
                value: "proxy".to_string(),
                reason: "a hosted repository cannot proxy a remote".to_string(),
            }
            .into());
        }

        let negative_cache = NegativeCache::new(config.id.clone(), config.negative_cache.clone());
        Ok(Self {
            config,
            negative_cache,
        })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Remember that `path` is not stored here.
    pub fn record_missing(&self, path: &RepositoryPath) -> bool {
        self.negative_cache.record_miss(path, self.negative_cache.observe())
    }

    pub fn is_known_missing(&self, path: &RepositoryPath) -> bool {
        self.negative_cache.is_miss(path)
    }
}

impl ExpirableRepository for HostedRepository {
    fn id(&self) -> &RepositoryId {
        &self.config.id
    }

    fn negative_cache(&self) -> &NegativeCache {
        &self.negative_cache
    }
}
