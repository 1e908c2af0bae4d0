//! Connection lease pool
//!
//! Bounds concurrent remote requests globally and per route
//! (scheme/host/port). A request that cannot get a lease within the pool
//! timeout fails with [`RemoteError::TransportOverloaded`] rather than
//! queueing forever.

use dashmap::DashMap;
use depot_core::{HttpPoolConfig, RemoteError, RemoteResult};
use reqwest::Url;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// A held connection lease. Released on drop.
#[derive(Debug)]
pub struct Lease {
    route: String,
    _route_permit: OwnedSemaphorePermit,
    _total_permit: OwnedSemaphorePermit,
}

impl Lease {
    pub fn route(&self) -> &str {
        &self.route
    }
}

/// Route key of a URL: `scheme://host:port`.
pub fn route_of(url: &Url) -> String {
    format!(
        "{}://{}:{}",
        url.scheme(),
        url.host_str().unwrap_or_default().to_ascii_lowercase(),
        url.port_or_known_default().unwrap_or_default()
    )
}

/// Global and per-route lease limits.
#[derive(Debug)]
pub struct LeasePool {
    config: HttpPoolConfig,
    total: Arc<Semaphore>,
    routes: DashMap<String, Arc<Semaphore>>,
}

impl LeasePool {
    pub fn new(config: HttpPoolConfig) -> Self {
        Self {
            total: Arc::new(Semaphore::new(config.max_total_leases)),
            routes: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &HttpPoolConfig {
        &self.config
    }

    /// Wait up to the pool timeout for a lease on `route`.
    pub async fn acquire(&self, route: &str) -> RemoteResult<Lease> {
        let route_semaphore = self.route_semaphore(route);
        let total = self.total.clone();
        let started = Instant::now();

        let acquired = tokio::time::timeout(self.config.pool_timeout, async move {
            let route_permit = route_semaphore.acquire_owned().await?;
            let total_permit = total.acquire_owned().await?;
            Ok::<_, tokio::sync::AcquireError>((route_permit, total_permit))
        })
        .await;

        match acquired {
            Ok(Ok((route_permit, total_permit))) => {
                debug!(
                    route = route,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Acquired connection lease"
                );
                Ok(Lease {
                    route: route.to_string(),
                    _route_permit: route_permit,
                    _total_permit: total_permit,
                })
            }
            // A closed semaphore never happens while the pool is alive; report
            // it the same way as a timeout.
            Ok(Err(_)) | Err(_) => {
                warn!(
                    route = route,
                    timeout_ms = self.config.pool_timeout.as_millis() as u64,
                    "Connection pool exhausted"
                );
                Err(RemoteError::TransportOverloaded {
                    route: route.to_string(),
                    waited: started.elapsed(),
                })
            }
        }
    }

    /// Free leases across all routes.
    pub fn available_total(&self) -> usize {
        self.total.available_permits()
    }

    /// Free leases on one route.
    pub fn available_for(&self, route: &str) -> usize {
        self.routes
            .get(route)
            .map(|semaphore| semaphore.available_permits())
            .unwrap_or(self.config.max_leases_per_route)
    }

    fn route_semaphore(&self, route: &str) -> Arc<Semaphore> {
        self.routes
            .entry(route.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_leases_per_route)))
            .clone()
    }
}
