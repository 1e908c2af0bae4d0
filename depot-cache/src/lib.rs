//! Depot Cache - per-repository proxy state
//!
//! Everything a proxy repository shares between concurrent requests:
//!
//! - [`NegativeCache`]: paths the remote recently confirmed absent
//! - [`ProxyModeState`]: whether the remote may be contacted
//! - [`RemoteStatusTracker`]: last availability probe and its retain time
//! - [`ProxyCacheStore`]: locally cached remote content
//!
//! Caches that can be invalidated carry a [`GenerationCounter`]. Writers
//! observe a [`Generation`] before slow remote work and pass it back when
//! writing, so an invalidation that happened in between wins.

pub mod generation;
pub mod negative;
pub mod proxy_cache;
pub mod proxy_mode;
pub mod remote_status;
pub mod stats;

pub use generation::{Generation, GenerationCounter};
pub use negative::{NegativeCache, NegativeCacheEntry};
pub use proxy_cache::{CachedItem, InMemoryProxyCache, InvalidationToken, ProxyCacheStore};
pub use proxy_mode::ProxyModeState;
pub use remote_status::{
    RemoteStatus, RemoteStatusTracker, DEFAULT_REMOTE_STATUS_RETAIN, MAX_AUTO_BLOCK_RETAIN,
};
pub use stats::CacheStats;
