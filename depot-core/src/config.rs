//! Configuration types
//!
//! Per-repository settings ([`RepositoryConfig`]) and the process-wide HTTP
//! settings shared by every proxy ([`HttpPoolConfig`], [`HostOverrides`]).
//! Defaults are documented on each field; `from_env` overlays `DEPOT_*`
//! environment variables on top of them.

use crate::{ConfigError, DepotResult, LayoutId, RepositoryId, RepositoryPath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Default negative cache TTL: one day.
pub const DEFAULT_NOT_FOUND_CACHE_TTL_MINUTES: u32 = 1440;

/// Default item max age: one day.
pub const DEFAULT_ITEM_MAX_AGE_MINUTES: i64 = 1440;

/// Item max age meaning "never expires".
pub const ITEM_MAX_AGE_NEVER: i64 = -1;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_host_list(key: &str) -> Option<BTreeSet<String>> {
    std::env::var(key).ok().map(|s| {
        s.split(',')
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect()
    })
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// REMOTE CONNECTION
// ============================================================================

/// Connection settings for one repository's remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConnectionConfig {
    /// Connect timeout; socket reads use the same value. Default 20 s.
    pub connection_timeout: Duration,
    /// Retries of idempotent requests after connect or IO failures. Default 3.
    pub retrieval_retry_count: u32,
    /// `User-Agent` sent to the remote.
    pub user_agent: String,
    /// Appended to every remote URL when set.
    pub query_string: Option<String>,
}

impl Default for RemoteConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(20),
            retrieval_retry_count: 3,
            user_agent: format!("depot/{}", env!("CARGO_PKG_VERSION")),
            query_string: None,
        }
    }
}

impl RemoteConnectionConfig {
    /// Defaults overlaid with `DEPOT_REMOTE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connection_timeout: env_parse::<u64>("DEPOT_REMOTE_CONNECTION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connection_timeout),
            retrieval_retry_count: env_parse("DEPOT_REMOTE_RETRY_COUNT")
                .unwrap_or(defaults.retrieval_retry_count),
            user_agent: std::env::var("DEPOT_REMOTE_USER_AGENT").unwrap_or(defaults.user_agent),
            query_string: std::env::var("DEPOT_REMOTE_QUERY_STRING")
                .ok()
                .filter(|q| !q.trim().is_empty()),
        }
    }

    pub fn socket_read_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_retrieval_retry_count(mut self, count: u32) -> Self {
        self.retrieval_retry_count = count;
        self
    }

    pub fn with_query_string(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn validate(&self) -> DepotResult<()> {
        if self.connection_timeout.is_zero() {
            return Err(invalid(
                "connection_timeout",
                format!("{:?}", self.connection_timeout),
                "connection_timeout must be positive",
            )
            .into());
        }
        if let Some(query) = &self.query_string {
            if query.starts_with('?') || query.starts_with('&') {
                return Err(invalid(
                    "query_string",
                    query,
                    "query_string must not carry its own separator",
                )
                .into());
            }
        }
        Ok(())
    }
}

// ============================================================================
// HTTP POOL
// ============================================================================

/// Shared connection lease pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpPoolConfig {
    /// Leases across all routes. Default 200.
    pub max_total_leases: usize,
    /// Leases per scheme/host/port route. Default 20.
    pub max_leases_per_route: usize,
    /// Wait for a lease before reporting overload. Default 30 s.
    pub pool_timeout: Duration,
    /// Idle connection eviction. Default 30 s.
    pub idle_timeout: Duration,
    /// TCP keep-alive. Default 30 s.
    pub keep_alive: Duration,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            max_total_leases: 200,
            max_leases_per_route: 20,
            pool_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(30),
        }
    }
}

impl HttpPoolConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_total_leases: env_parse("DEPOT_HTTP_POOL_MAX_TOTAL")
                .unwrap_or(defaults.max_total_leases),
            max_leases_per_route: env_parse("DEPOT_HTTP_POOL_MAX_PER_ROUTE")
                .unwrap_or(defaults.max_leases_per_route),
            pool_timeout: env_parse::<u64>("DEPOT_HTTP_POOL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.pool_timeout),
            idle_timeout: env_parse::<u64>("DEPOT_HTTP_POOL_IDLE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_timeout),
            keep_alive: env_parse::<u64>("DEPOT_HTTP_POOL_KEEP_ALIVE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.keep_alive),
        }
    }

    /// Pool with `leases` on both the total and per-route limits.
    pub fn with_leases(mut self, leases: usize) -> Self {
        self.max_total_leases = leases;
        self.max_leases_per_route = leases;
        self
    }

    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    pub fn validate(&self) -> DepotResult<()> {
        if self.max_total_leases == 0 {
            return Err(invalid(
                "max_total_leases",
                self.max_total_leases,
                "max_total_leases must be greater than 0",
            )
            .into());
        }
        if self.max_leases_per_route == 0 {
            return Err(invalid(
                "max_leases_per_route",
                self.max_leases_per_route,
                "max_leases_per_route must be greater than 0",
            )
            .into());
        }
        if self.max_leases_per_route > self.max_total_leases {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("max_leases_per_route={}", self.max_leases_per_route),
                option_b: format!("max_total_leases={}", self.max_total_leases),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// HOST OVERRIDES
// ============================================================================

/// Per-host relaxations of the redirect and cookie policy.
///
/// Host names are compared case-insensitively. Hosts not listed get the
/// default posture: no circular redirects and no cookies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOverrides {
    /// Hosts allowed to redirect back to an already visited URL.
    pub circular_redirect_hosts: BTreeSet<String>,
    /// Hosts for which cookies persist across requests.
    pub cookie_hosts: BTreeSet<String>,
    /// Redirect hop limit. Default 50.
    pub max_redirects: usize,
    /// Redirect hop limit for circular-tolerant hosts. Default 10.
    pub circular_max_redirects: usize,
}

impl Default for HostOverrides {
    fn default() -> Self {
        Self {
            circular_redirect_hosts: BTreeSet::new(),
            cookie_hosts: BTreeSet::new(),
            max_redirects: 50,
            circular_max_redirects: 10,
        }
    }
}

impl HostOverrides {
    /// Defaults overlaid with comma separated `DEPOT_HTTP_CIRCULAR_REDIRECT_HOSTS`
    /// and `DEPOT_HTTP_COOKIE_HOSTS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            circular_redirect_hosts: env_host_list("DEPOT_HTTP_CIRCULAR_REDIRECT_HOSTS")
                .unwrap_or(defaults.circular_redirect_hosts),
            cookie_hosts: env_host_list("DEPOT_HTTP_COOKIE_HOSTS")
                .unwrap_or(defaults.cookie_hosts),
            max_redirects: env_parse("DEPOT_HTTP_MAX_REDIRECTS").unwrap_or(defaults.max_redirects),
            circular_max_redirects: env_parse("DEPOT_HTTP_CIRCULAR_MAX_REDIRECTS")
                .unwrap_or(defaults.circular_max_redirects),
        }
    }

    pub fn with_circular_redirect_host(mut self, host: impl AsRef<str>) -> Self {
        self.circular_redirect_hosts
            .insert(host.as_ref().to_ascii_lowercase());
        self
    }

    pub fn with_cookie_host(mut self, host: impl AsRef<str>) -> Self {
        self.cookie_hosts.insert(host.as_ref().to_ascii_lowercase());
        self
    }

    pub fn allows_circular_redirects(&self, host: &str) -> bool {
        self.circular_redirect_hosts
            .contains(&host.to_ascii_lowercase())
    }

    pub fn allows_cookies(&self, host: &str) -> bool {
        self.cookie_hosts.contains(&host.to_ascii_lowercase())
    }

    /// Redirect hop limit for a host.
    pub fn max_redirects_for(&self, host: &str) -> usize {
        if self.allows_circular_redirects(host) {
            self.circular_max_redirects
        } else {
            self.max_redirects
        }
    }
}

// ============================================================================
// AUTO BLOCK
// ============================================================================

/// Policy for blocking a proxy whose remote keeps failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBlockConfig {
    /// Default true.
    pub enabled: bool,
    /// Consecutive failed probes before blocking. Default 1.
    pub failure_threshold: u32,
}

impl Default for AutoBlockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 1,
        }
    }
}

// ============================================================================
// NEGATIVE CACHE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeCacheConfig {
    /// Default true.
    pub active: bool,
    /// Entry lifetime in minutes. Default 1440.
    pub ttl_minutes: u32,
}

impl Default for NegativeCacheConfig {
    fn default() -> Self {
        Self {
            active: true,
            ttl_minutes: DEFAULT_NOT_FOUND_CACHE_TTL_MINUTES,
        }
    }
}

impl NegativeCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl_minutes) * 60)
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

/// Repository type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    /// Content is deployed locally; no remote.
    Hosted,
    /// Content is fetched from a remote and cached.
    Proxy,
}

/// Configuration of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub id: RepositoryId,
    pub kind: RepositoryKind,
    pub layout: LayoutId,
    /// Remote base URL, required for proxies.
    pub remote_url: Option<String>,
    pub negative_cache: NegativeCacheConfig,
    /// Minutes before cached proxied content is revalidated; -1 never expires.
    pub item_max_age_minutes: i64,
    pub auto_block: AutoBlockConfig,
    pub remote: RemoteConnectionConfig,
}

impl RepositoryConfig {
    pub fn hosted(id: impl Into<RepositoryId>) -> Self {
        Self {
            id: id.into(),
            kind: RepositoryKind::Hosted,
            layout: LayoutId::default(),
            remote_url: None,
            negative_cache: NegativeCacheConfig::default(),
            item_max_age_minutes: DEFAULT_ITEM_MAX_AGE_MINUTES,
            auto_block: AutoBlockConfig::default(),
            remote: RemoteConnectionConfig::default(),
        }
    }

    pub fn proxy(id: impl Into<RepositoryId>, remote_url: impl Into<String>) -> Self {
        Self {
            kind: RepositoryKind::Proxy,
            remote_url: Some(remote_url.into()),
            ..Self::hosted(id)
        }
    }

    pub fn with_layout(mut self, layout: LayoutId) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_negative_cache(mut self, active: bool, ttl_minutes: u32) -> Self {
        self.negative_cache = NegativeCacheConfig {
            active,
            ttl_minutes,
        };
        self
    }

    pub fn with_item_max_age_minutes(mut self, minutes: i64) -> Self {
        self.item_max_age_minutes = minutes;
        self
    }

    pub fn with_auto_block(mut self, auto_block: AutoBlockConfig) -> Self {
        self.auto_block = auto_block;
        self
    }

    pub fn with_remote(mut self, remote: RemoteConnectionConfig) -> Self {
        self.remote = remote;
        self
    }

    pub fn is_proxy(&self) -> bool {
        self.kind == RepositoryKind::Proxy
    }

    /// Max age of cached proxied content, `None` when it never expires.
    pub fn item_max_age(&self) -> Option<Duration> {
        u64::try_from(self.item_max_age_minutes)
            .ok()
            .map(|minutes| Duration::from_secs(minutes * 60))
    }

    /// Initial step of the remote status retain time while auto-blocked.
    pub fn remote_status_retain_step(&self) -> Duration {
        self.remote.connection_timeout * 2
    }

    /// Full remote URL of a repository path, with the configured query string.
    ///
    /// Returns `None` for repositories without a remote.
    pub fn remote_url_for(&self, path: &RepositoryPath) -> Option<String> {
        let base = self.remote_url.as_deref()?;
        let mut url = format!("{}{}", base.trim_end_matches('/'), path.as_str());
        if let Some(query) = &self.remote.query_string {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(query);
        }
        Some(url)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - proxies carry an http(s) remote URL, hosted repositories none
    /// - item_max_age_minutes >= -1
    /// - remote connection settings
    pub fn validate(&self) -> DepotResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "id".to_string(),
            }
            .into());
        }

        match (self.kind, self.remote_url.as_deref()) {
            (RepositoryKind::Proxy, None) => {
                return Err(ConfigError::MissingRequired {
                    field: "remote_url".to_string(),
                }
                .into());
            }
            (RepositoryKind::Proxy, Some(url)) => {
                let lower = url.to_ascii_lowercase();
                let rest = lower
                    .strip_prefix("http://")
                    .or_else(|| lower.strip_prefix("https://"));
                if rest.map(|r| r.is_empty()).unwrap_or(true) {
                    return Err(
                        invalid("remote_url", url, "remote_url must be an http(s) URL").into(),
                    );
                }
            }
            (RepositoryKind::Hosted, Some(url)) => {
                return Err(ConfigError::IncompatibleOptions {
                    option_a: "kind=hosted".to_string(),
                    option_b: format!("remote_url={}", url),
                }
                .into());
            }
            (RepositoryKind::Hosted, None) => {}
        }

        if self.item_max_age_minutes < ITEM_MAX_AGE_NEVER {
            return Err(invalid(
                "item_max_age_minutes",
                self.item_max_age_minutes,
                "item_max_age_minutes must be -1 (never) or non-negative",
            )
            .into());
        }

        self.remote.validate()
    }
}
