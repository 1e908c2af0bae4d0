//! Depot Remote - HTTP access to proxied remotes
//!
//! [`RemoteFetchClient`] implements [`depot_core::RemoteStorage`] on top of
//! `reqwest`:
//!
//! - every request holds a lease from a bounded [`LeasePool`]; running out of
//!   leases surfaces as `TransportOverloaded`
//! - redirects are followed by hand under [`should_follow_redirect`]
//! - per-host overrides enable cookies or circular redirects
//! - availability probes are judged by [`evaluate_availability`]

pub mod availability;
pub mod client;
pub mod headers;
pub mod overrides;
pub mod pool;
pub mod redirect;

pub use availability::{evaluate_availability, is_amazon_s3, since_is_set, Availability};
pub use client::RemoteFetchClient;
pub use overrides::ClientFactory;
pub use pool::{route_of, Lease, LeasePool};
pub use redirect::{is_redirect_status, should_follow_redirect};
