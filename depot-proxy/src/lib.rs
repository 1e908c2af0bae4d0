//! Depot Proxy - proxy repository pipeline
//!
//! [`ProxyRepository`] serves reads for a repository that mirrors a remote,
//! combining the negative cache, the proxy mode, the local proxy cache and a
//! [`depot_core::RemoteStorage`]. [`CacheInvalidator`] expires those caches
//! administratively and reports what changed as events.

pub mod hosted;
pub mod invalidator;
pub mod repository;
pub mod request;

pub use hosted::HostedRepository;
pub use invalidator::{CacheInvalidator, ExpirableRepository};
pub use repository::ProxyRepository;
pub use request::{ItemSource, ResourceRequest, RetrievedItem};
