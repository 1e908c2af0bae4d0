//! Proxy repository
//!
//! [`ProxyRepository::get`] is the read pipeline of a repository that mirrors
//! a remote:
//!
//! 1. a path in the negative cache is answered `NotFound` without a remote
//!    round trip, unless the request is marked as expired
//! 2. a fresh local copy is served as is
//! 3. local-only requests and blocked repositories fall back to whatever
//!    local copy exists
//! 4. otherwise the remote is asked, conditionally when a stale local copy
//!    has validators
//!
//! Remote failures other than pool exhaustion and access denial count
//! against the remote and may auto-block the repository. A stale local copy
//! is preferred over surfacing a remote failure, except for pool exhaustion,
//! which always reaches the caller so it can back off.

use crate::invalidator::ExpirableRepository;
use crate::request::{ItemSource, ResourceRequest, RetrievedItem};
use chrono::Utc;
use depot_cache::{
    CachedItem, Generation, NegativeCache, ProxyCacheStore, ProxyModeState, RemoteStatus,
    RemoteStatusTracker,
};
use depot_core::{
    ArtifactCoordinate, ConfigError, CoordinateCalculator, DepotResult, FetchOutcome,
    LayoutRegistry, NotFoundReason, ProxyMode, ProxyModeTransition, RemoteError, RemoteStorage,
    RepositoryConfig, RepositoryError, RepositoryId, RepositoryPath, TransportFailure,
};
use depot_events::EventPublisher;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct ProxyRepository {
    config: RepositoryConfig,
    calculator: Arc<dyn CoordinateCalculator>,
    remote: Arc<dyn RemoteStorage>,
    negative_cache: NegativeCache,
    proxy_mode: ProxyModeState,
    remote_status: RemoteStatusTracker,
    cache: Arc<dyn ProxyCacheStore>,
}

impl ProxyRepository {
    /// Build a proxy repository.
    ///
    /// The layout calculator is resolved here, once.
    ///
    /// # Errors
    /// * `Config` - Invalid configuration or unregistered layout
    /// * `Repository(NotAProxy)` - The configuration is not a proxy
    pub fn new(
        config: RepositoryConfig,
        layouts: &LayoutRegistry,
        remote: Arc<dyn RemoteStorage>,
        cache: Arc<dyn ProxyCacheStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> DepotResult<Self> {
        config.validate()?;
        if !config.is_proxy() {
            return Err(RepositoryError::NotAProxy {
                repository: config.id.to_string(),
            }
            .into());
        }

        let calculator = layouts
            .get(config.layout)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "layout".to_string(),
                value: config.layout.to_string(),
                reason: "layout is not registered".to_string(),
            })?;

        let negative_cache = NegativeCache::new(config.id.clone(), config.negative_cache.clone());
        let proxy_mode = ProxyModeState::new(
            config.id.clone(),
            ProxyMode::Allow,
            config.auto_block.enabled,
            publisher,
        );
        let remote_status = RemoteStatusTracker::new(config.remote_status_retain_step());

        Ok(Self {
            config,
            calculator,
            remote,
            negative_cache,
            proxy_mode,
            remote_status,
            cache,
        })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn proxy_mode(&self) -> ProxyMode {
        self.proxy_mode.mode()
    }

    pub fn negative_cache(&self) -> &NegativeCache {
        &self.negative_cache
    }

    pub fn cache(&self) -> &Arc<dyn ProxyCacheStore> {
        &self.cache
    }

    /// Parse `path` under this repository's layout.
    pub fn coordinate_of(&self, path: &RepositoryPath) -> Option<ArtifactCoordinate> {
        self.calculator.path_to_coordinate(path.as_str())
    }

    // ========================================================================
    // READ PIPELINE
    // ========================================================================

    /// Read an item, from the local cache or the remote.
    ///
    /// # Errors
    /// * `Remote(NotFound)` - Missing remotely, or negatively cached
    /// * `Remote(TransportOverloaded)` - No connection lease; retry later
    /// * `Remote(TransportError)` - Remote failed and no local copy exists
    /// * `Repository(RemoteAccessBlocked)` - Blocked and no local copy exists
    /// * `Repository(LocalOnly)` - Local-only request and no local copy
    pub async fn get(&self, request: &ResourceRequest) -> DepotResult<RetrievedItem> {
        let path = request.path();
        let context = request.context();
        let coordinate = self.coordinate_of(path);

        if !context.is_as_expired() && self.negative_cache.is_miss(path) {
            debug!(repository = %self.config.id, path = %path, "Negative cache hit");
            return Err(
                RemoteError::not_found(self.remote_url(path), NotFoundReason::NegativelyCached)
                    .into(),
            );
        }

        let local = if context.is_remote_only() {
            None
        } else {
            self.cache.get(path).await
        };

        if let Some(item) = &local {
            let stale = context.is_as_expired()
                || item.needs_revalidation(
                    self.cache.current_token(),
                    self.config.item_max_age(),
                    Utc::now(),
                );
            if !stale {
                return Ok(retrieved(item.clone(), coordinate, ItemSource::LocalCache));
            }
        }

        if context.is_local_only() {
            return match local {
                Some(item) => Ok(retrieved(item, coordinate, ItemSource::StaleLocal)),
                None => Err(RepositoryError::LocalOnly {
                    repository: self.config.id.to_string(),
                    path: path.to_string(),
                }
                .into()),
            };
        }

        let mode = self.proxy_mode.mode();
        if !mode.should_proxy() {
            debug!(
                repository = %self.config.id,
                path = %path,
                mode = %mode,
                "Remote access blocked"
            );
            return match local {
                Some(item) => Ok(retrieved(item, coordinate, ItemSource::StaleLocal)),
                None => Err(RepositoryError::RemoteAccessBlocked {
                    repository: self.config.id.to_string(),
                    mode,
                }
                .into()),
            };
        }

        self.fetch_remote(path, local, coordinate).await
    }

    async fn fetch_remote(
        &self,
        path: &RepositoryPath,
        local: Option<CachedItem>,
        coordinate: Option<ArtifactCoordinate>,
    ) -> DepotResult<RetrievedItem> {
        // Observed before the remote call; expiries that run meanwhile win.
        let not_found_generation = self.negative_cache.observe();
        let cache_generation = self.cache.observe();
        let validators = local
            .as_ref()
            .map(|item| item.content.validators())
            .unwrap_or_default();

        let outcome = self
            .remote
            .retrieve_conditional(&self.config, path, &validators)
            .await;

        match outcome {
            Ok(FetchOutcome::Content(content)) => {
                self.negative_cache.clear_on_success(path);
                self.remote_status.record_available(Instant::now());
                let item = self.cache.store(path, content, cache_generation).await;
                Ok(retrieved(item, coordinate, ItemSource::Remote))
            }
            Ok(FetchOutcome::NotModified) => match local {
                Some(item) => {
                    self.cache.mark_checked(path, cache_generation).await;
                    self.remote_status.record_available(Instant::now());
                    Ok(retrieved(item, coordinate, ItemSource::Revalidated))
                }
                None => Err(RemoteError::transport(
                    self.remote_url(path),
                    TransportFailure::Protocol,
                    "not modified answer without a local copy",
                )
                .into()),
            },
            Err(error) => self.remote_failed(path, error, local, coordinate, not_found_generation),
        }
    }

    fn remote_failed(
        &self,
        path: &RepositoryPath,
        error: RemoteError,
        local: Option<CachedItem>,
        coordinate: Option<ArtifactCoordinate>,
        observed: Generation,
    ) -> DepotResult<RetrievedItem> {
        match &error {
            RemoteError::TransportOverloaded { route, .. } => {
                warn!(
                    repository = %self.config.id,
                    path = %path,
                    route = %route,
                    "Remote transport overloaded"
                );
                return Err(error.into());
            }
            RemoteError::NotFound { .. } => {
                if let Some(item) = local {
                    debug!(
                        repository = %self.config.id,
                        path = %path,
                        "Missing remotely, serving local copy"
                    );
                    return Ok(retrieved(item, coordinate, ItemSource::StaleLocal));
                }
                if error.is_negative_cacheable() && self.proxy_mode.mode().should_proxy() {
                    self.negative_cache.record_miss(path, observed);
                }
                return Err(error.into());
            }
            RemoteError::TransportError { .. } => {}
        }

        if error.should_auto_block() {
            self.auto_block(&error.to_string());
        }

        match local {
            Some(item) => {
                warn!(
                    repository = %self.config.id,
                    path = %path,
                    error = %error,
                    "Remote failed, serving stale local copy"
                );
                Ok(retrieved(item, coordinate, ItemSource::StaleLocal))
            }
            None => Err(error.into()),
        }
    }

    fn remote_url(&self, path: &RepositoryPath) -> String {
        self.config
            .remote_url_for(path)
            .unwrap_or_else(|| path.to_string())
    }

    // ========================================================================
    // PROXY MODE
    // ========================================================================

    /// Change the proxy mode.
    ///
    /// Leaving `BlockedManual` for `Allow` purges the negative cache, since
    /// misses recorded before the block may be stale.
    pub fn set_proxy_mode(
        &self,
        mode: ProxyMode,
        cause: Option<String>,
    ) -> Option<ProxyModeTransition> {
        let transition = self.proxy_mode.set_mode(mode, cause)?;
        self.mode_changed(&transition);
        Some(transition)
    }

    fn mode_changed(&self, transition: &ProxyModeTransition) {
        self.remote_status.on_mode_changed(transition.new_mode());

        if transition.old_mode() == ProxyMode::BlockedManual
            && transition.new_mode() == ProxyMode::Allow
        {
            let purged = self.negative_cache.purge();
            info!(
                repository = %self.config.id,
                purged = purged,
                "Purged negative cache after manual unblock"
            );
        }
    }

    pub fn is_auto_block_enabled(&self) -> bool {
        self.proxy_mode.is_auto_block_enabled()
    }

    /// Enable or disable auto-blocking. Disabling it while auto-blocked
    /// unblocks the repository.
    pub fn set_auto_block_enabled(&self, enabled: bool) -> Option<ProxyModeTransition> {
        let transition = self.proxy_mode.set_auto_block_enabled(enabled)?;
        self.mode_changed(&transition);
        Some(transition)
    }

    /// Record a remote failure and block once the failure threshold is met.
    ///
    /// # Returns
    /// The transition to `BlockedAuto`, if this call caused one.
    pub fn auto_block(&self, cause: &str) -> Option<ProxyModeTransition> {
        let failures = self.remote_status.record_unavailable(cause, Instant::now());
        if failures < self.config.auto_block.failure_threshold {
            debug!(
                repository = %self.config.id,
                failures = failures,
                threshold = self.config.auto_block.failure_threshold,
                "Remote failure below auto-block threshold"
            );
            return None;
        }
        self.set_proxy_mode(ProxyMode::BlockedAuto, Some(cause.to_string()))
    }

    /// Lift an auto-block. Manual blocks are left alone.
    pub fn auto_unblock(&self) -> Option<ProxyModeTransition> {
        let transition = self
            .proxy_mode
            .transition_from(ProxyMode::BlockedAuto, ProxyMode::Allow, None)?;
        self.mode_changed(&transition);
        Some(transition)
    }

    // ========================================================================
    // REMOTE STATUS
    // ========================================================================

    /// Current remote status, probing the remote when the last result is
    /// older than its retain time or `force` is set.
    pub async fn remote_status(&self, force: bool) -> RemoteStatus {
        if force || self.remote_status.needs_check(Instant::now()) {
            return self.probe_remote().await;
        }
        self.remote_status.status()
    }

    /// Probe the remote root and auto-block or auto-unblock on the answer.
    ///
    /// A manually blocked repository is not probed.
    pub async fn probe_remote(&self) -> RemoteStatus {
        if self.proxy_mode.mode() == ProxyMode::BlockedManual {
            return RemoteStatus::Unavailable {
                reason: format!("proxy mode {} forbids remote access", ProxyMode::BlockedManual),
            };
        }

        let root = RepositoryPath::root();
        let answer = self
            .remote
            .check_remote_availability(&self.config, &root, None, false)
            .await;

        match answer {
            Ok(true) => {
                self.remote_status.record_available(Instant::now());
                self.auto_unblock();
            }
            Ok(false) => {
                self.auto_block("remote detected as unavailable");
            }
            Err(error) if error.should_auto_block() => {
                self.auto_block(&error.to_string());
            }
            Err(error) => {
                debug!(
                    repository = %self.config.id,
                    error = %error,
                    "Probe failed without blocking"
                );
                self.remote_status.record_unavailable(error.to_string(), Instant::now());
            }
        }
        self.remote_status.status()
    }

    /// Consecutive remote failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.remote_status.consecutive_failures()
    }
}

fn retrieved(
    item: CachedItem,
    coordinate: Option<ArtifactCoordinate>,
    source: ItemSource,
) -> RetrievedItem {
    RetrievedItem {
        path: item.path,
        coordinate,
        content: item.content,
        source,
    }
}

impl ExpirableRepository for ProxyRepository {
    fn id(&self) -> &RepositoryId {
        &self.config.id
    }

    fn negative_cache(&self) -> &NegativeCache {
        &self.negative_cache
    }

    fn proxy_cache(&self) -> Option<&dyn ProxyCacheStore> {
        Some(self.cache.as_ref())
    }
}

impl std::fmt::Debug for ProxyRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRepository")
            .field("id", &self.config.id)
            .field("layout", &self.calculator.layout_id())
            .field("proxy_mode", &self.proxy_mode.mode())
            .field("negative_cache", &self.negative_cache)
            .finish()
    }
}
