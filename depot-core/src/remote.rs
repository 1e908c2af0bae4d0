//! Remote storage abstraction
//!
//! The proxy pipeline talks to a repository's remote only through
//! [`RemoteStorage`]. The HTTP implementation lives in `depot-remote`; tests
//! use a scripted mock.

use crate::{RemoteError, RemoteResult, RepositoryConfig, RepositoryPath, Timestamp, TransportFailure};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Why a request goes out, which decides how redirects are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestPurpose {
    /// The response body is delivered to the caller.
    ContentRetrieval,
    /// Existence or availability check only.
    Probe,
}

/// Validators of a locally cached copy, sent for conditional retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentValidators {
    pub last_modified: Option<Timestamp>,
    pub etag: Option<String>,
}

impl ContentValidators {
    pub fn is_empty(&self) -> bool {
        self.last_modified.is_none() && self.etag.is_none()
    }
}

/// Content fetched from a remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteContent {
    /// URL the content was finally served from, after redirects.
    pub url: String,
    pub body: Bytes,
    pub last_modified: Option<Timestamp>,
    /// Entity tag with surrounding quotes removed.
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl RemoteContent {
    pub fn new(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            last_modified: None,
            etag: None,
            content_type: None,
        }
    }

    pub fn with_last_modified(mut self, last_modified: Timestamp) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Validators to revalidate this content later.
    pub fn validators(&self) -> ContentValidators {
        ContentValidators {
            last_modified: self.last_modified,
            etag: self.etag.clone(),
        }
    }
}

/// Result of a conditional retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Content(RemoteContent),
    /// The remote confirmed the cached copy is current.
    NotModified,
}

/// Access to the remote of a proxy repository.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Fetch `path` from the repository's remote unconditionally.
    ///
    /// # Returns
    /// * `Ok(RemoteContent)` - The remote content
    /// * `Err(RemoteError::NotFound)` - The remote confirmed the path absent
    /// * `Err(RemoteError::TransportOverloaded)` - No connection lease in time
    /// * `Err(RemoteError::TransportError)` - Any other failure
    async fn retrieve(
        &self,
        repository: &RepositoryConfig,
        path: &RepositoryPath,
    ) -> RemoteResult<RemoteContent> {
        match self
            .retrieve_conditional(repository, path, &ContentValidators::default())
            .await?
        {
            FetchOutcome::Content(content) => Ok(content),
            FetchOutcome::NotModified => Err(RemoteError::transport(
                repository.remote_url_for(path).unwrap_or_default(),
                TransportFailure::Protocol,
                "not modified answer to an unconditional request",
            )),
        }
    }

    /// Fetch `path`, letting the remote answer "not modified" when the
    /// validators still match.
    async fn retrieve_conditional(
        &self,
        repository: &RepositoryConfig,
        path: &RepositoryPath,
        validators: &ContentValidators,
    ) -> RemoteResult<FetchOutcome>;

    /// Check whether the remote is reachable, and when `since` is set, whether
    /// `path` changed after it.
    ///
    /// `since` of `None` or the Unix epoch means "unset": any successful
    /// answer counts as available regardless of its last-modified time.
    async fn check_remote_availability(
        &self,
        repository: &RepositoryConfig,
        path: &RepositoryPath,
        since: Option<Timestamp>,
        strict: bool,
    ) -> RemoteResult<bool>;
}
