//! Depot Core - artifact addressing and shared types
//!
//! Coordinates and the layouts that map repository paths to them, the proxy
//! mode of a repository, configuration, errors, events and the
//! [`RemoteStorage`] seam used by the proxy pipeline. All other depot crates
//! depend on this one.

pub mod config;
pub mod coordinate;
pub mod error;
pub mod event;
pub mod identity;
pub mod layout;
pub mod proxy_mode;
pub mod remote;

pub use config::{
    AutoBlockConfig, HostOverrides, HttpPoolConfig, NegativeCacheConfig, RemoteConnectionConfig,
    RepositoryConfig, RepositoryKind, DEFAULT_ITEM_MAX_AGE_MINUTES,
    DEFAULT_NOT_FOUND_CACHE_TTL_MINUTES, ITEM_MAX_AGE_NEVER,
};
pub use coordinate::{ArtifactCoordinate, ChecksumKind, SignatureKind};
pub use error::{
    ConfigError, DepotError, DepotResult, NotFoundReason, RemoteError, RemoteResult,
    RepositoryError, TransportFailure,
};
pub use event::{
    CacheExpiryOutcome, ContextSnapshot, RepositoryEvent, RequestContext, CTX_AS_EXPIRED,
    CTX_LOCAL_ONLY, CTX_REMOTE_ONLY,
};
pub use identity::{RepositoryId, RepositoryPath, Timestamp, PATH_ROOT};
pub use layout::{CoordinateCalculator, LayoutId, LayoutRegistry, Maven1Layout, Maven2Layout};
pub use proxy_mode::{ProxyMode, ProxyModeTransition};
pub use remote::{ContentValidators, FetchOutcome, RemoteContent, RemoteStorage, RequestPurpose};
