//! HTTP clients per connection profile
//!
//! Requests share a small set of `reqwest` clients keyed by their timeout and
//! cookie posture. Hosts on the cookie allow-list get a client of their own
//! with a cookie store, so cookies never cross hosts; every other host shares
//! cookie-less clients.

use crate::headers::default_headers;
use dashmap::DashMap;
use depot_core::{HostOverrides, HttpPoolConfig, RemoteError, RemoteResult, TransportFailure};
use reqwest::{redirect, Client, Url};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    timeout: Duration,
    cookie_host: Option<String>,
}

/// Builds and caches clients according to the pool settings and host
/// overrides.
#[derive(Debug)]
pub struct ClientFactory {
    pool: HttpPoolConfig,
    overrides: HostOverrides,
    clients: DashMap<ClientKey, Client>,
}

impl ClientFactory {
    pub fn new(pool: HttpPoolConfig, overrides: HostOverrides) -> Self {
        Self {
            pool,
            overrides,
            clients: DashMap::new(),
        }
    }

    pub fn overrides(&self) -> &HostOverrides {
        &self.overrides
    }

    /// Client for requests to `url` with the given connect/read timeout.
    pub fn client_for(&self, url: &Url, timeout: Duration) -> RemoteResult<Client> {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let key = ClientKey {
            timeout,
            cookie_host: self.overrides.allows_cookies(&host).then_some(host),
        };

        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let client = self.build(&key).map_err(|e| {
            RemoteError::transport(url.as_str(), TransportFailure::Protocol, e.to_string())
        })?;
        debug!(
            timeout_ms = timeout.as_millis() as u64,
            cookies = key.cookie_host.is_some(),
            "Created HTTP client"
        );
        Ok(self.clients.entry(key).or_insert(client).clone())
    }

    /// Redirect hop limit and circular tolerance for requests to the host
    /// of `url`.
    pub fn redirect_limits(&self, url: &Url) -> (usize, bool) {
        let host = url.host_str().unwrap_or_default();
        (
            self.overrides.max_redirects_for(host),
            self.overrides.allows_circular_redirects(host),
        )
    }

    fn build(&self, key: &ClientKey) -> reqwest::Result<Client> {
        Client::builder()
            // Redirects are followed by the fetch loop under the redirect policy.
            .redirect(redirect::Policy::none())
            .default_headers(default_headers())
            .connect_timeout(key.timeout)
            .read_timeout(key.timeout)
            .pool_idle_timeout(self.pool.idle_timeout)
            .pool_max_idle_per_host(self.pool.max_leases_per_route)
            .tcp_keepalive(self.pool.keep_alive)
            .cookie_store(key.cookie_host.is_some())
            .build()
    }
}
