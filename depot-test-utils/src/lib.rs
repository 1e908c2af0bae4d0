//! Depot Test Utilities
//!
//! Shared test infrastructure for the depot workspace:
//! - A scriptable [`MockRemoteStorage`] standing in for an HTTP remote
//! - A [`RecordingPublisher`] capturing published events
//! - Proptest generators for coordinates, paths and proxy modes
//! - Fixtures for common repository setups
//! - Custom assertions for depot-specific error variants

pub use depot_core::{
    ArtifactCoordinate, ContentValidators, DepotError, DepotResult, FetchOutcome, NotFoundReason,
    ProxyMode, RemoteContent, RemoteError, RemoteResult, RemoteStorage, RepositoryConfig,
    RepositoryError, RepositoryEvent, RepositoryId, RepositoryPath, Timestamp, TransportFailure,
};

use async_trait::async_trait;
use depot_events::EventPublisher;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK REMOTE STORAGE
// ============================================================================

#[derive(Debug, Clone)]
enum Scripted {
    Content(RemoteContent),
    Failure(RemoteError),
}

/// Scriptable remote.
///
/// Unscripted paths answer `NotFound`. Scripted content answers
/// `NotModified` when the request carries its entity tag. An optional gate
/// holds every retrieval until a permit is released, for tests that need a
/// fetch in flight.
#[derive(Debug, Default)]
pub struct MockRemoteStorage {
    responses: Mutex<HashMap<RepositoryPath, Scripted>>,
    availability: Mutex<Option<RemoteResult<bool>>>,
    retrievals: Mutex<HashMap<RepositoryPath, usize>>,
    retrieval_count: AtomicUsize,
    probe_count: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MockRemoteStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold retrievals until `gate` hands out a permit. Each retrieval
    /// consumes one permit.
    pub fn with_gate(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn set_content(&self, path: &str, content: RemoteContent) {
        lock(&self.responses).insert(RepositoryPath::new(path), Scripted::Content(content));
    }

    pub fn set_failure(&self, path: &str, error: RemoteError) {
        lock(&self.responses).insert(RepositoryPath::new(path), Scripted::Failure(error));
    }

    /// Forget the script for `path`, so it answers `NotFound` again.
    pub fn clear(&self, path: &str) {
        lock(&self.responses).remove(&RepositoryPath::new(path));
    }

    /// Answer of availability probes; `Ok(true)` when never set.
    pub fn set_availability(&self, answer: RemoteResult<bool>) {
        *lock(&self.availability) = Some(answer);
    }

    /// Total retrievals started, including ones still held by the gate.
    pub fn retrieval_count(&self) -> usize {
        self.retrieval_count.load(Ordering::SeqCst)
    }

    pub fn retrievals_of(&self, path: &str) -> usize {
        lock(&self.retrievals)
            .get(&RepositoryPath::new(path))
            .copied()
            .unwrap_or(0)
    }

    pub fn probe_count(&self) -> usize {
        self.probe_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStorage for MockRemoteStorage {
    async fn retrieve_conditional(
        &self,
        repository: &RepositoryConfig,
        path: &RepositoryPath,
        validators: &ContentValidators,
    ) -> RemoteResult<FetchOutcome> {
        *lock(&self.retrievals).entry(path.clone()).or_insert(0) += 1;
        self.retrieval_count.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let scripted = lock(&self.responses).get(path).cloned();
        match scripted {
            Some(Scripted::Content(content)) => {
                let current = validators.etag.is_some() && validators.etag == content.etag;
                if current {
                    Ok(FetchOutcome::NotModified)
                } else {
                    Ok(FetchOutcome::Content(content))
                }
            }
            Some(Scripted::Failure(error)) => Err(error),
            None => Err(RemoteError::not_found(
                repository.remote_url_for(path).unwrap_or_default(),
                NotFoundReason::Missing,
            )),
        }
    }

    async fn check_remote_availability(
        &self,
        _repository: &RepositoryConfig,
        _path: &RepositoryPath,
        _since: Option<Timestamp>,
        _strict: bool,
    ) -> RemoteResult<bool> {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.availability).clone().unwrap_or(Ok(true))
    }
}

// ============================================================================
// RECORDING PUBLISHER
// ============================================================================

/// Publisher that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<RepositoryEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RepositoryEvent> {
        lock(&self.events).clone()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }

    /// `(old, new)` of every published proxy mode change, in order.
    pub fn mode_changes(&self) -> Vec<(ProxyMode, ProxyMode)> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                RepositoryEvent::ProxyModeChanged {
                    old_mode, new_mode, ..
                } => Some((*old_mode, *new_mode)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: RepositoryEvent) {
        lock(&self.events).push(event);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for depot types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_group_id() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z][a-z0-9]{0,7}", 1..4).prop_map(|parts| parts.join("."))
    }

    pub fn arb_artifact_id() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{1,9}"
    }

    pub fn arb_release_version() -> impl Strategy<Value = String> {
        (1u32..20, 0u32..20, prop::option::of(0u32..10)).prop_map(|(major, minor, patch)| {
            match patch {
                Some(patch) => format!("{}.{}.{}", major, minor, patch),
                None => format!("{}.{}", major, minor),
            }
        })
    }

    /// `<base>-yyyyMMdd.HHmmss-N`
    pub fn arb_timestamped_version() -> impl Strategy<Value = String> {
        (
            arb_release_version(),
            2000u32..2030,
            1u32..13,
            1u32..29,
            0u32..24,
            0u32..60,
            0u32..60,
            1u32..500,
        )
            .prop_map(|(base, y, mo, d, h, mi, s, build)| {
                format!(
                    "{}-{:04}{:02}{:02}.{:02}{:02}{:02}-{}",
                    base, y, mo, d, h, mi, s, build
                )
            })
    }

    /// Release coordinate of a jar without classifier.
    pub fn arb_release_coordinate() -> impl Strategy<Value = ArtifactCoordinate> {
        (arb_group_id(), arb_artifact_id(), arb_release_version())
            .prop_map(|(group, artifact, version)| ArtifactCoordinate::new(group, artifact, version))
    }

    pub fn arb_snapshot_coordinate() -> impl Strategy<Value = ArtifactCoordinate> {
        (arb_group_id(), arb_artifact_id(), arb_timestamped_version())
            .prop_map(|(group, artifact, version)| ArtifactCoordinate::new(group, artifact, version))
    }

    pub fn arb_repository_path() -> impl Strategy<Value = RepositoryPath> {
        prop::collection::vec("[a-z0-9.]{1,8}", 1..6)
            .prop_map(|segments| RepositoryPath::new(format!("/{}", segments.join("/"))))
    }

    pub fn arb_proxy_mode() -> impl Strategy<Value = ProxyMode> {
        prop_oneof![
            Just(ProxyMode::Allow),
            Just(ProxyMode::BlockedAuto),
            Just(ProxyMode::BlockedManual),
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Common repository setups.

    use super::*;
    use chrono::{TimeZone, Utc};

    pub const REMOTE_BASE: &str = "https://repo.example.org/maven2";

    pub const JAR_PATH: &str = "/com/example/foo/1.0/foo-1.0.jar";

    /// Proxy of [`REMOTE_BASE`] with default settings.
    pub fn proxy_config(id: &str) -> RepositoryConfig {
        RepositoryConfig::proxy(id, REMOTE_BASE)
    }

    pub fn hosted_config(id: &str) -> RepositoryConfig {
        RepositoryConfig::hosted(id)
    }

    /// Fixed last-modified time of fixture content.
    pub fn fixture_time() -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Remote content served for `path` with entity tag `etag`.
    pub fn jar_content(path: &str, body: &'static str, etag: &str) -> RemoteContent {
        RemoteContent::new(format!("{}{}", REMOTE_BASE, path), body)
            .with_etag(etag)
            .with_last_modified(fixture_time())
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on depot error variants.

    use super::*;

    /// Assert a remote `NotFound` with the given reason.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &DepotResult<T>, reason: NotFoundReason) {
        match result {
            Err(DepotError::Remote(RemoteError::NotFound { reason: r, .. })) if *r == reason => {}
            other => panic!("Expected NotFound ({}), got: {:?}", reason, other),
        }
    }

    #[track_caller]
    pub fn assert_transport_overloaded<T: std::fmt::Debug>(result: &DepotResult<T>) {
        match result {
            Err(DepotError::Remote(RemoteError::TransportOverloaded { .. })) => {}
            other => panic!("Expected TransportOverloaded, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_transport_error<T: std::fmt::Debug>(
        result: &DepotResult<T>,
        kind: TransportFailure,
    ) {
        match result {
            Err(DepotError::Remote(RemoteError::TransportError { kind: k, .. })) if *k == kind => {}
            other => panic!("Expected TransportError ({}), got: {:?}", kind, other),
        }
    }

    /// Assert remote access was refused in `mode`.
    #[track_caller]
    pub fn assert_blocked<T: std::fmt::Debug>(result: &DepotResult<T>, mode: ProxyMode) {
        match result {
            Err(DepotError::Repository(RepositoryError::RemoteAccessBlocked { mode: m, .. }))
                if *m == mode => {}
            other => panic!("Expected RemoteAccessBlocked ({}), got: {:?}", mode, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_scripted_content() {
        let mock = MockRemoteStorage::new();
        let repo = proxy_config("central");
        let path = RepositoryPath::new(JAR_PATH);
        mock.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));

        let outcome = mock
            .retrieve_conditional(&repo, &path, &ContentValidators::default())
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Content(_)));

        let validators = ContentValidators {
            last_modified: None,
            etag: Some("v1".to_string()),
        };
        let outcome = mock.retrieve_conditional(&repo, &path, &validators).await.unwrap();
        assert_eq!(outcome, FetchOutcome::NotModified);
        assert_eq!(mock.retrievals_of(JAR_PATH), 2);
    }

    #[tokio::test]
    async fn test_mock_defaults_to_not_found() {
        let mock = MockRemoteStorage::new();
        let repo = proxy_config("central");
        let err = mock
            .retrieve(&repo, &RepositoryPath::new("/nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(mock
            .check_remote_availability(&repo, &RepositoryPath::root(), None, false)
            .await
            .unwrap());
        assert_eq!(mock.probe_count(), 1);
    }

    #[test]
    fn test_recording_publisher() {
        let publisher = RecordingPublisher::new();
        let transition = depot_core::ProxyModeTransition::between(
            ProxyMode::Allow,
            ProxyMode::BlockedManual,
            None,
        )
        .unwrap();
        publisher.publish(RepositoryEvent::proxy_mode_changed(
            RepositoryId::new("central"),
            &transition,
        ));
        assert_eq!(publisher.count_of("PROXY_MODE_CHANGED"), 1);
        assert_eq!(
            publisher.mode_changes(),
            vec![(ProxyMode::Allow, ProxyMode::BlockedManual)]
        );
    }
}
