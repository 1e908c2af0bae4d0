//! Error types for depot operations

use crate::ProxyMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a remote lookup resolved to "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotFoundReason {
    /// Remote answered 404
    Missing,
    /// The requested URL denotes a collection, not a file
    Collection,
    /// A redirect was refused by the redirect policy
    InvalidRedirect,
    /// Remote answered with a redirect that was not followed
    Redirected,
    /// The path is recorded in the negative cache
    NegativelyCached,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            NotFoundReason::Missing => "missing",
            NotFoundReason::Collection => "remote is collection",
            NotFoundReason::InvalidRedirect => "redirect refused",
            NotFoundReason::Redirected => "redirected",
            NotFoundReason::NegativelyCached => "negatively cached",
        };
        write!(f, "{}", value)
    }
}

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportFailure {
    Connect,
    Timeout,
    Protocol,
    CircularRedirect,
    TooManyRedirects,
    /// HTTP 403
    AccessDenied,
    /// HTTP 401 or 407
    AuthenticationRequired,
    /// Remote served an error page in place of the artifact
    InvalidContent,
    UnexpectedStatus(u16),
    Io,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Connect => write!(f, "connect"),
            TransportFailure::Timeout => write!(f, "timeout"),
            TransportFailure::Protocol => write!(f, "protocol"),
            TransportFailure::CircularRedirect => write!(f, "circular redirect"),
            TransportFailure::TooManyRedirects => write!(f, "too many redirects"),
            TransportFailure::AccessDenied => write!(f, "access denied"),
            TransportFailure::AuthenticationRequired => write!(f, "authentication required"),
            TransportFailure::InvalidContent => write!(f, "invalid content"),
            TransportFailure::UnexpectedStatus(status) => write!(f, "unexpected status {}", status),
            TransportFailure::Io => write!(f, "io"),
        }
    }
}

/// Remote fetch errors.
///
/// This is the closed outcome set of a remote retrieval. Only
/// [`RemoteError::NotFound`] may populate a negative cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Not found at {url}: {reason}")]
    NotFound { url: String, reason: NotFoundReason },

    #[error("Transport overloaded on route {route}: no connection lease within {waited:?}")]
    TransportOverloaded { route: String, waited: Duration },

    #[error("Transport error ({kind}) for {url}: {message}")]
    TransportError {
        url: String,
        kind: TransportFailure,
        message: String,
    },
}

impl RemoteError {
    pub fn not_found(url: impl Into<String>, reason: NotFoundReason) -> Self {
        RemoteError::NotFound {
            url: url.into(),
            reason,
        }
    }

    pub fn transport(
        url: impl Into<String>,
        kind: TransportFailure,
        message: impl Into<String>,
    ) -> Self {
        RemoteError::TransportError {
            url: url.into(),
            kind,
            message: message.into(),
        }
    }

    /// True when the remote confirmed the item absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }

    /// True when the caller should back off and try again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::NotFound { .. } => false,
            RemoteError::TransportOverloaded { .. } => true,
            RemoteError::TransportError { kind, .. } => matches!(
                kind,
                TransportFailure::Connect
                    | TransportFailure::Timeout
                    | TransportFailure::Io
                    | TransportFailure::UnexpectedStatus(500..=599)
            ),
        }
    }

    /// Only a confirmed remote miss may be negatively cached. A miss that was
    /// itself served from the negative cache is not re-recorded.
    pub fn is_negative_cacheable(&self) -> bool {
        matches!(
            self,
            RemoteError::NotFound { reason, .. } if *reason != NotFoundReason::NegativelyCached
        )
    }

    /// Whether this failure counts against the remote's health.
    ///
    /// Pool exhaustion is a local condition and access-denied answers prove
    /// the remote is reachable, so neither counts.
    pub fn should_auto_block(&self) -> bool {
        match self {
            RemoteError::NotFound { .. } | RemoteError::TransportOverloaded { .. } => false,
            RemoteError::TransportError { kind, .. } => *kind != TransportFailure::AccessDenied,
        }
    }
}

/// Repository level errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Remote access for repository {repository} is not allowed in proxy mode {mode}")]
    RemoteAccessBlocked { repository: String, mode: ProxyMode },

    #[error("Repository {repository} is not a proxy repository")]
    NotAProxy { repository: String },

    #[error("Unknown repository: {repository}")]
    UnknownRepository { repository: String },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Request for {path} in {repository} is local-only, remote access not allowed")]
    LocalOnly { repository: String, path: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all depot errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DepotError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl DepotError {
    /// Borrow the remote error, if this is one.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            DepotError::Remote(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.as_remote().map(RemoteError::is_not_found).unwrap_or(false)
    }
}

/// Result type alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type alias for depot operations.
pub type DepotResult<T> = Result<T, DepotError>;

// =============================================================================
// TESTS
// =============================================================================
