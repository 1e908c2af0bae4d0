//! HTTP remote storage with lease pooling and a redirect policy

use crate::availability::{evaluate_availability, is_amazon_s3, Availability, REPOSITORY_METADATA_PATH};
use crate::headers;
use crate::overrides::ClientFactory;
use crate::pool::{route_of, Lease, LeasePool};
use crate::redirect::{is_redirect_status, should_follow_redirect};
use async_trait::async_trait;
use dashmap::DashMap;
use depot_core::{
    ContentValidators, FetchOutcome, HostOverrides, HttpPoolConfig, NotFoundReason, RemoteContent,
    RemoteError, RemoteResult, RemoteStorage, RepositoryConfig, RepositoryId, RepositoryPath,
    RequestPurpose, Timestamp, TransportFailure,
};
use reqwest::header::{HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LOCATION, USER_AGENT};
use reqwest::{Method, Response, StatusCode, Url};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, warn};

/// A finished HTTP exchange. The lease is held until the body is consumed.
struct Exchange {
    url: Url,
    response: Response,
    _lease: Lease,
}

/// Status and validators of an availability probe answer.
#[derive(Debug, Clone, Copy)]
struct ProbeAnswer {
    status: StatusCode,
    last_modified: Option<Timestamp>,
}

/// [`RemoteStorage`] over HTTP(S).
///
/// One instance serves every proxy repository of a process: clients and the
/// lease pool are shared, keyed by route.
pub struct RemoteFetchClient {
    clients: ClientFactory,
    pool: LeasePool,
    s3_remotes: DashMap<RepositoryId, bool>,
}

impl RemoteFetchClient {
    pub fn new(pool: HttpPoolConfig, overrides: HostOverrides) -> Self {
        Self {
            clients: ClientFactory::new(pool.clone(), overrides),
            pool: LeasePool::new(pool),
            s3_remotes: DashMap::new(),
        }
    }

    /// Client configured from `DEPOT_HTTP_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(HttpPoolConfig::from_env(), HostOverrides::from_env())
    }

    pub fn pool(&self) -> &LeasePool {
        &self.pool
    }

    /// Whether the last answer of the repository's remote came from Amazon S3.
    pub fn is_s3_remote(&self, repository: &RepositoryId) -> bool {
        self.s3_remotes
            .get(repository)
            .map(|flag| *flag)
            .unwrap_or(false)
    }

    fn remote_url(&self, repository: &RepositoryConfig, path: &RepositoryPath) -> RemoteResult<Url> {
        let raw = repository.remote_url_for(path).ok_or_else(|| {
            RemoteError::transport(
                repository.id.as_str(),
                TransportFailure::Protocol,
                "repository has no remote URL",
            )
        })?;
        Url::parse(&raw).map_err(|e| {
            warn!(
                repository = %repository.id,
                path = %path,
                error = %e,
                "Remote request with malformed path attempted"
            );
            RemoteError::not_found(raw.clone(), NotFoundReason::Missing)
        })
    }

    /// Send one request, retrying connect and IO failures.
    async fn send(
        &self,
        repository: &RepositoryConfig,
        method: &Method,
        url: &Url,
        validators: &ContentValidators,
    ) -> RemoteResult<(Response, Lease)> {
        let client = self
            .clients
            .client_for(url, repository.remote.connection_timeout)?;
        let lease = self.pool.acquire(&route_of(url)).await?;
        let attempts = repository.remote.retrieval_retry_count.saturating_add(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            debug!(
                repository = %repository.id,
                method = %method,
                url = %url,
                attempt = attempt,
                "Remote request"
            );

            let mut request = client
                .request(method.clone(), url.clone())
                .header(USER_AGENT, repository.remote.user_agent.as_str());
            if let Some(last_modified) = validators.last_modified {
                request = request.header(IF_MODIFIED_SINCE, headers::format_http_date(last_modified));
            }
            if let Some(etag) = &validators.etag {
                request = request.header(IF_NONE_MATCH, format!("\"{}\"", etag));
            }

            match request.send().await {
                Ok(response) => {
                    debug!(
                        repository = %repository.id,
                        method = %method,
                        url = %url,
                        status = response.status().as_u16(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Remote response"
                    );
                    self.note_server(&repository.id, response.headers());
                    return Ok((response, lease));
                }
                Err(e) => {
                    let kind = classify(&e);
                    let retryable = matches!(kind, TransportFailure::Connect | TransportFailure::Io);
                    if retryable && attempt < attempts {
                        debug!(
                            repository = %repository.id,
                            url = %url,
                            error = %e,
                            "Remote request failed, retrying"
                        );
                        continue;
                    }
                    return Err(RemoteError::transport(url.as_str(), kind, e.to_string()));
                }
            }
        }
    }

    /// Send a request and follow redirects under the redirect policy.
    async fn execute(
        &self,
        repository: &RepositoryConfig,
        method: Method,
        url: Url,
        purpose: RequestPurpose,
        validators: &ContentValidators,
    ) -> RemoteResult<Exchange> {
        let (mut max_redirects, mut circular_allowed) = self.clients.redirect_limits(&url);
        let mut visited = HashSet::from([url.to_string()]);
        let mut current = url;
        let mut hops = 0usize;

        loop {
            let (response, lease) = self.send(repository, &method, &current, validators).await?;
            if !is_redirect_status(response.status()) {
                return Ok(Exchange {
                    url: current,
                    response,
                    _lease: lease,
                });
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let Some(location) = location else {
                return Ok(Exchange {
                    url: current,
                    response,
                    _lease: lease,
                });
            };
            let target = current.join(&location).map_err(|e| {
                RemoteError::transport(
                    current.as_str(),
                    TransportFailure::Protocol,
                    format!("invalid redirect location '{}': {}", location, e),
                )
            })?;

            if !should_follow_redirect(&current, &target, purpose) {
                debug!(
                    repository = %repository.id,
                    from = %current,
                    to = %target,
                    "Redirect to collection not followed"
                );
                return Err(RemoteError::not_found(
                    current.as_str(),
                    NotFoundReason::InvalidRedirect,
                ));
            }

            // Overrides are per host; a cross-host hop takes the target's.
            if target.host_str() != current.host_str() {
                (max_redirects, circular_allowed) = self.clients.redirect_limits(&target);
            }

            hops += 1;
            if hops > max_redirects {
                return Err(RemoteError::transport(
                    current.as_str(),
                    TransportFailure::TooManyRedirects,
                    format!("more than {} redirects", max_redirects),
                ));
            }
            if !visited.insert(target.to_string()) && !circular_allowed {
                return Err(RemoteError::transport(
                    target.as_str(),
                    TransportFailure::CircularRedirect,
                    "redirect loop",
                ));
            }
            current = target;
        }
    }

    async fn probe(
        &self,
        repository: &RepositoryConfig,
        method: Method,
        url: Url,
    ) -> RemoteResult<ProbeAnswer> {
        let exchange = self
            .execute(
                repository,
                method,
                url,
                RequestPurpose::Probe,
                &ContentValidators::default(),
            )
            .await?;
        let status = exchange.response.status();
        check_access(&exchange.url, status, exchange.response.headers())?;
        Ok(ProbeAnswer {
            status,
            last_modified: headers::last_modified(exchange.response.headers()),
        })
    }

    /// A remote root answering 404 may be a repository manager with browsing
    /// disabled; its repository metadata still answers.
    async fn is_browsing_disabled(&self, repository: &RepositoryConfig) -> bool {
        let path = RepositoryPath::new(REPOSITORY_METADATA_PATH);
        let Ok(url) = self.remote_url(repository, &path) else {
            return false;
        };
        match self.probe(repository, Method::GET, url).await {
            Ok(answer) if answer.status == StatusCode::OK => {
                debug!(
                    repository = %repository.id,
                    "Remote root missing but repository metadata present, assuming browsing disabled"
                );
                true
            }
            _ => false,
        }
    }

    fn note_server(&self, repository: &RepositoryId, headers: &HeaderMap) {
        let s3 = is_amazon_s3(headers::server(headers));
        self.s3_remotes.insert(repository.clone(), s3);
    }
}

#[async_trait]
impl RemoteStorage for RemoteFetchClient {
    async fn retrieve_conditional(
        &self,
        repository: &RepositoryConfig,
        path: &RepositoryPath,
        validators: &ContentValidators,
    ) -> RemoteResult<FetchOutcome> {
        let url = self.remote_url(repository, path)?;
        if url.path().ends_with('/') {
            return Err(RemoteError::not_found(url.as_str(), NotFoundReason::Collection));
        }

        let exchange = self
            .execute(
                repository,
                Method::GET,
                url,
                RequestPurpose::ContentRetrieval,
                validators,
            )
            .await?;
        let status = exchange.response.status();
        let final_url = exchange.url.to_string();
        check_access(&exchange.url, status, exchange.response.headers())?;

        match status {
            StatusCode::OK => {
                let response_headers = exchange.response.headers();
                let last_modified = headers::last_modified(response_headers);
                let etag = headers::etag(response_headers);
                let content_type = headers::content_type(response_headers);
                let body = exchange.response.bytes().await.map_err(|e| {
                    RemoteError::transport(final_url.as_str(), TransportFailure::Io, e.to_string())
                })?;
                Ok(FetchOutcome::Content(RemoteContent {
                    url: final_url,
                    body,
                    last_modified,
                    etag,
                    content_type,
                }))
            }
            StatusCode::NOT_MODIFIED if !validators.is_empty() => Ok(FetchOutcome::NotModified),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(RemoteError::not_found(final_url, NotFoundReason::Missing))
            }
            status if status.is_redirection() => {
                Err(RemoteError::not_found(final_url, NotFoundReason::Redirected))
            }
            status => Err(RemoteError::transport(
                final_url,
                TransportFailure::UnexpectedStatus(status.as_u16()),
                format!("expected 200, received {}", status),
            )),
        }
    }

    async fn check_remote_availability(
        &self,
        repository: &RepositoryConfig,
        path: &RepositoryPath,
        since: Option<Timestamp>,
        strict: bool,
    ) -> RemoteResult<bool> {
        let url = match self.remote_url(repository, path) {
            Ok(url) => url,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        // Some remotes reject HEAD, so a failed or non-200 HEAD is retried as GET.
        let head = match self.probe(repository, Method::HEAD, url.clone()).await {
            Ok(answer) if answer.status == StatusCode::OK => Some(answer),
            Ok(answer) => {
                debug!(
                    repository = %repository.id,
                    status = answer.status.as_u16(),
                    "HEAD probe failed, trying GET"
                );
                None
            }
            Err(e) => {
                debug!(repository = %repository.id, error = %e, "HEAD probe failed, trying GET");
                None
            }
        };
        let answer = match head {
            Some(answer) => answer,
            None => self.probe(repository, Method::GET, url.clone()).await?,
        };

        let s3 = self.is_s3_remote(&repository.id);
        match evaluate_availability(answer.status, answer.last_modified, since, strict, s3) {
            Availability::Available => Ok(true),
            Availability::Unavailable => {
                if path.is_root() && answer.status == StatusCode::NOT_FOUND {
                    return Ok(self.is_browsing_disabled(repository).await);
                }
                Ok(false)
            }
            Availability::Unexpected(status) => Err(RemoteError::transport(
                url.as_str(),
                TransportFailure::UnexpectedStatus(status.as_u16()),
                format!("unexpected availability answer {}", status),
            )),
        }
    }
}

impl std::fmt::Debug for RemoteFetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFetchClient")
            .field("pool", self.pool.config())
            .field("overrides", self.clients.overrides())
            .finish()
    }
}

/// Answers that fail regardless of what was requested.
fn check_access(url: &Url, status: StatusCode, headers: &HeaderMap) -> RemoteResult<()> {
    match status {
        StatusCode::FORBIDDEN => Err(RemoteError::transport(
            url.as_str(),
            TransportFailure::AccessDenied,
            "remote denied access",
        )),
        StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
            Err(RemoteError::transport(
                url.as_str(),
                TransportFailure::AuthenticationRequired,
                "remote requires authentication",
            ))
        }
        StatusCode::OK if headers::is_missing_artifact(headers) => Err(RemoteError::transport(
            url.as_str(),
            TransportFailure::InvalidContent,
            "invalid artifact found, most likely a proxy served an error page",
        )),
        _ => Ok(()),
    }
}

fn classify(error: &reqwest::Error) -> TransportFailure {
    if error.is_timeout() {
        TransportFailure::Timeout
    } else if error.is_connect() {
        TransportFailure::Connect
    } else if error.is_builder() || error.is_redirect() {
        TransportFailure::Protocol
    } else {
        TransportFailure::Io
    }
}
