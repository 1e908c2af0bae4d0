//! Request and result types of the proxy pipeline

use depot_core::{
    ArtifactCoordinate, RemoteContent, RepositoryPath, RequestContext, CTX_AS_EXPIRED,
    CTX_LOCAL_ONLY, CTX_REMOTE_ONLY,
};

/// A read request against a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    path: RepositoryPath,
    context: RequestContext,
}

impl ResourceRequest {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: RepositoryPath::new(path),
            context: RequestContext::new(),
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Treat any cached state for the path as expired: the negative cache is
    /// bypassed and local content revalidated.
    pub fn as_expired(mut self) -> Self {
        self.context.insert(CTX_AS_EXPIRED, true);
        self
    }

    /// Serve from local content only, never contacting the remote.
    pub fn local_only(mut self) -> Self {
        self.context.insert(CTX_LOCAL_ONLY, true);
        self
    }

    /// Ignore local content.
    pub fn remote_only(mut self) -> Self {
        self.context.insert(CTX_REMOTE_ONLY, true);
        self
    }

    pub fn path(&self) -> &RepositoryPath {
        &self.path
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut self.context
    }
}

/// Where a retrieved item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemSource {
    /// Fresh local copy, the remote was not contacted.
    LocalCache,
    /// Fetched from the remote.
    Remote,
    /// Local copy confirmed current by the remote.
    Revalidated,
    /// Local copy served because the remote could not be used.
    StaleLocal,
}

/// Content returned by a repository read.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedItem {
    pub path: RepositoryPath,
    /// Coordinate of the path under the repository's layout, if it names an
    /// artifact file.
    pub coordinate: Option<ArtifactCoordinate>,
    pub content: RemoteContent,
    pub source: ItemSource,
}
