//! Proxy pipeline tests against a scripted remote

use async_trait::async_trait;
use depot_cache::{InMemoryProxyCache, RemoteStatus};
use depot_core::{
    AutoBlockConfig, ContentValidators, CoordinateCalculator, DepotError, FetchOutcome,
    LayoutRegistry, Maven2Layout, NotFoundReason, ProxyMode, RemoteContent, RemoteError,
    RemoteResult, RemoteStorage, RepositoryConfig, RepositoryError, RepositoryEvent,
    RepositoryId, RepositoryPath, RequestContext, Timestamp, TransportFailure,
};
use depot_proxy::{
    CacheInvalidator, ExpirableRepository, HostedRepository, ItemSource, ProxyRepository,
    ResourceRequest,
};
use depot_test_utils::assertions::{
    assert_blocked, assert_not_found, assert_transport_error, assert_transport_overloaded,
};
use depot_test_utils::fixtures::{hosted_config, jar_content, proxy_config, JAR_PATH};
use depot_test_utils::{init_tracing, MockRemoteStorage, RecordingPublisher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tokio::sync::Semaphore;

const OTHER_PATH: &str = "/com/example/bar/2.0/bar-2.0.jar";

struct Fixture {
    repo: Arc<ProxyRepository>,
    remote: Arc<MockRemoteStorage>,
    events: Arc<RecordingPublisher>,
    invalidator: CacheInvalidator,
}

fn fixture_with(config: RepositoryConfig, remote: MockRemoteStorage) -> Fixture {
    init_tracing();
    let remote = Arc::new(remote);
    let events = Arc::new(RecordingPublisher::new());
    let cache = Arc::new(InMemoryProxyCache::new(config.id.clone()));
    let repo = Arc::new(
        ProxyRepository::new(
            config,
            &LayoutRegistry::default(),
            remote.clone(),
            cache,
            events.clone(),
        )
        .unwrap(),
    );
    let invalidator = CacheInvalidator::new(events.clone());
    invalidator.register(repo.clone());
    Fixture {
        repo,
        remote,
        events,
        invalidator,
    }
}

fn fixture() -> Fixture {
    fixture_with(proxy_config("central"), MockRemoteStorage::new())
}

fn path(raw: &str) -> RepositoryPath {
    RepositoryPath::new(raw)
}

fn id() -> RepositoryId {
    RepositoryId::new("central")
}

async fn wait_for_retrievals(remote: &MockRemoteStorage, count: usize) {
    for _ in 0..400 {
        if remote.retrieval_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("retrieval {} never started", count);
}

// ============================================================================
// Read pipeline
// ============================================================================

#[tokio::test]
async fn test_fetch_then_serve_locally() {
    let f = fixture();
    f.remote.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));

    let first = f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    assert_eq!(first.source, ItemSource::Remote);
    assert_eq!(first.content.body.as_ref(), b"jar");
    let coordinate = first.coordinate.unwrap();
    assert_eq!(coordinate.group_id(), "com.example");
    assert_eq!(coordinate.artifact_id(), "foo");

    let second = f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    assert_eq!(second.source, ItemSource::LocalCache);
    assert_eq!(f.remote.retrievals_of(JAR_PATH), 1);
}

#[tokio::test]
async fn test_non_artifact_path_has_no_coordinate() {
    let f = fixture();
    let metadata = "/com/example/foo/maven-metadata.xml";
    f.remote.set_content(metadata, jar_content(metadata, "<metadata/>", "m1"));

    let item = f.repo.get(&ResourceRequest::new(metadata)).await.unwrap();
    assert!(item.coordinate.is_none());
}

#[tokio::test]
async fn test_miss_is_negatively_cached() {
    let f = fixture();

    let first = f.repo.get(&ResourceRequest::new(JAR_PATH)).await;
    assert_not_found(&first, NotFoundReason::Missing);

    let second = f.repo.get(&ResourceRequest::new(JAR_PATH)).await;
    assert_not_found(&second, NotFoundReason::NegativelyCached);
    assert_eq!(f.remote.retrievals_of(JAR_PATH), 1);
}

#[tokio::test]
async fn test_as_expired_bypasses_negative_cache() {
    let f = fixture();
    let _ = f.repo.get(&ResourceRequest::new(JAR_PATH)).await;
    f.remote.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));

    let item = f
        .repo
        .get(&ResourceRequest::new(JAR_PATH).as_expired())
        .await
        .unwrap();
    assert_eq!(item.source, ItemSource::Remote);
    // success clears the stale miss
    assert!(!f.repo.negative_cache().is_miss(&path(JAR_PATH)));
}

#[tokio::test]
async fn test_expire_not_found_caches_forces_fresh_attempt() {
    let f = fixture();
    let _ = f.repo.get(&ResourceRequest::new(JAR_PATH)).await;
    f.remote.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));

    let mut context = RequestContext::new().with("user", "admin");
    let outcome = f
        .invalidator
        .expire_not_found_caches_by_id(&id(), &path("/com/example"), &context)
        .unwrap();
    assert!(outcome.altered);
    context.insert("user", "someone-else");

    let item = f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    assert_eq!(item.source, ItemSource::Remote);
    assert_eq!(f.remote.retrievals_of(JAR_PATH), 2);

    let expected = RequestContext::new().with("user", "admin").snapshot();
    let events = f.events.events();
    assert!(events.iter().any(|event| matches!(
        event,
        RepositoryEvent::ExpireNotFoundCaches { path, context, altered: true, .. }
            if path.as_str() == "/com/example" && *context == expected
    )));
}

#[tokio::test]
async fn test_expire_not_found_caches_reports_not_altered() {
    let f = fixture();
    let outcome = f
        .invalidator
        .expire_not_found_caches_by_id(&id(), &path("/com/example"), &RequestContext::new())
        .unwrap();
    assert!(!outcome.altered);
    assert_eq!(f.events.count_of("EXPIRE_NOT_FOUND_CACHES"), 1);
}

#[tokio::test]
async fn test_local_only_never_contacts_remote() {
    let f = fixture();
    let result = f.repo.get(&ResourceRequest::new(JAR_PATH).local_only()).await;
    assert!(matches!(
        result,
        Err(DepotError::Repository(RepositoryError::LocalOnly { .. }))
    ));
    assert_eq!(f.remote.retrieval_count(), 0);
}

#[tokio::test]
async fn test_zero_max_age_revalidates_every_read() {
    let f = fixture_with(
        proxy_config("central").with_item_max_age_minutes(0),
        MockRemoteStorage::new(),
    );
    f.remote.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));

    f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    let second = f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    assert_eq!(second.source, ItemSource::Revalidated);
    assert_eq!(f.remote.retrievals_of(JAR_PATH), 2);
}

// ============================================================================
// Proxy cache expiry
// ============================================================================

#[tokio::test]
async fn test_expire_proxy_caches_revalidates_subtree() {
    let f = fixture();
    f.remote.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));
    f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();

    let context = RequestContext::new();
    let outcome = f
        .invalidator
        .expire_proxy_caches_by_id(&id(), &path("/com/example"), &context)
        .await
        .unwrap();
    assert!(outcome.altered);

    // already expired, nothing left to flip
    let again = f
        .invalidator
        .expire_proxy_caches_by_id(&id(), &path("/com/example"), &context)
        .await
        .unwrap();
    assert!(!again.altered);

    let item = f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    assert_eq!(item.source, ItemSource::Revalidated);

    let fresh = f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    assert_eq!(fresh.source, ItemSource::LocalCache);
    assert_eq!(f.events.count_of("EXPIRE_PROXY_CACHES"), 2);
}

#[tokio::test]
async fn test_root_expiry_rotates_token() {
    let f = fixture();
    f.remote.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));
    f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();

    let outcome = f
        .invalidator
        .expire_proxy_caches(f.repo.as_ref(), &RepositoryPath::root(), &RequestContext::new())
        .await;
    assert!(outcome.altered);

    let item = f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    assert_eq!(item.source, ItemSource::Revalidated);
}

#[tokio::test]
async fn test_hosted_proxy_expiry_is_not_altered() {
    let f = fixture();
    let hosted = Arc::new(HostedRepository::new(hosted_config("releases")).unwrap());
    f.invalidator.register(hosted.clone());

    let outcome = f
        .invalidator
        .expire_proxy_caches_by_id(hosted.id(), &RepositoryPath::root(), &RequestContext::new())
        .await
        .unwrap();
    assert!(!outcome.altered);
    assert!(f.events.events().iter().any(|event| matches!(
        event,
        RepositoryEvent::ExpireProxyCaches { repository, altered: false, .. }
            if repository.as_str() == "releases"
    )));
}

#[tokio::test]
async fn test_unknown_repository_rejected() {
    let f = fixture();
    let result = f.invalidator.expire_not_found_caches_by_id(
        &RepositoryId::new("nope"),
        &RepositoryPath::root(),
        &RequestContext::new(),
    );
    assert!(matches!(
        result,
        Err(DepotError::Repository(RepositoryError::UnknownRepository { .. }))
    ));
    assert!(f.events.events().is_empty());
}

// ============================================================================
// Invalidation racing a fetch
// ============================================================================

#[tokio::test]
async fn test_stale_negative_write_dropped() {
    let gate = Arc::new(Semaphore::new(0));
    let f = fixture_with(proxy_config("central"), MockRemoteStorage::with_gate(gate.clone()));

    let repo = f.repo.clone();
    let in_flight = tokio::spawn(async move { repo.get(&ResourceRequest::new(JAR_PATH)).await });
    wait_for_retrievals(&f.remote, 1).await;

    f.invalidator
        .expire_not_found_caches_by_id(&id(), &path("/com/example"), &RequestContext::new())
        .unwrap();
    gate.add_permits(1);

    let result = in_flight.await.unwrap();
    assert_not_found(&result, NotFoundReason::Missing);
    assert!(!f.repo.negative_cache().is_miss(&path(JAR_PATH)));

    // the next request goes to the remote again
    gate.add_permits(1);
    let _ = f.repo.get(&ResourceRequest::new(JAR_PATH)).await;
    assert_eq!(f.remote.retrievals_of(JAR_PATH), 2);
}

#[tokio::test]
async fn test_fetch_spanning_expiry_stored_expired() {
    let gate = Arc::new(Semaphore::new(0));
    let f = fixture_with(proxy_config("central"), MockRemoteStorage::with_gate(gate.clone()));
    f.remote.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));

    let repo = f.repo.clone();
    let in_flight = tokio::spawn(async move { repo.get(&ResourceRequest::new(JAR_PATH)).await });
    wait_for_retrievals(&f.remote, 1).await;

    f.invalidator
        .expire_proxy_caches_by_id(&id(), &path("/com/example"), &RequestContext::new())
        .await
        .unwrap();
    gate.add_permits(1);

    let first = in_flight.await.unwrap().unwrap();
    assert_eq!(first.source, ItemSource::Remote);

    gate.add_permits(1);
    let second = f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    assert_eq!(second.source, ItemSource::Revalidated);
}

/// Remote on which the artifact gets published while the first lookup is
/// still in flight: the first retrieval waits for `release` and answers not
/// found, every later one returns `content`.
struct PublishedMidLookup {
    calls: AtomicUsize,
    release: Semaphore,
    content: RemoteContent,
}

#[async_trait]
impl RemoteStorage for PublishedMidLookup {
    async fn retrieve_conditional(
        &self,
        repository: &RepositoryConfig,
        path: &RepositoryPath,
        _validators: &ContentValidators,
    ) -> RemoteResult<FetchOutcome> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
            return Err(RemoteError::not_found(
                repository.remote_url_for(path).unwrap_or_default(),
                NotFoundReason::Missing,
            ));
        }
        Ok(FetchOutcome::Content(self.content.clone()))
    }

    async fn check_remote_availability(
        &self,
        _repository: &RepositoryConfig,
        _path: &RepositoryPath,
        _since: Option<Timestamp>,
        _strict: bool,
    ) -> RemoteResult<bool> {
        Ok(true)
    }
}

#[tokio::test]
async fn test_miss_landing_after_success_is_dropped() {
    init_tracing();
    let config = proxy_config("central");
    let remote = Arc::new(PublishedMidLookup {
        calls: AtomicUsize::new(0),
        release: Semaphore::new(0),
        content: jar_content(JAR_PATH, "jar", "v1"),
    });
    let repo = Arc::new(
        ProxyRepository::new(
            config.clone(),
            &LayoutRegistry::default(),
            remote.clone(),
            Arc::new(InMemoryProxyCache::new(config.id.clone())),
            Arc::new(RecordingPublisher::new()),
        )
        .unwrap(),
    );

    let lookup = {
        let repo = repo.clone();
        tokio::spawn(async move { repo.get(&ResourceRequest::new(JAR_PATH)).await })
    };
    for _ in 0..400 {
        if remote.calls.load(Ordering::SeqCst) >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

    let published = repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();
    assert_eq!(published.source, ItemSource::Remote);

    remote.release.add_permits(1);
    let stale = lookup.await.unwrap();
    assert_not_found(&stale, NotFoundReason::Missing);

    assert!(!repo.negative_cache().is_miss(&path(JAR_PATH)));
    let again = repo
        .get(&ResourceRequest::new(JAR_PATH).as_expired())
        .await
        .unwrap();
    assert_eq!(again.content.body.as_ref(), b"jar");
}

// ============================================================================
// Remote failures and proxy mode
// ============================================================================

#[tokio::test]
async fn test_overload_surfaces_even_with_local_copy() {
    let f = fixture();
    f.remote.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));
    f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();

    let overloaded = RemoteError::TransportOverloaded {
        route: "https://repo.example.org:443".to_string(),
        waited: Duration::from_millis(200),
    };
    f.remote.set_failure(JAR_PATH, overloaded.clone());
    f.remote.set_failure(OTHER_PATH, overloaded);

    let result = f.repo.get(&ResourceRequest::new(JAR_PATH).as_expired()).await;
    assert_transport_overloaded(&result);

    let result = f.repo.get(&ResourceRequest::new(OTHER_PATH)).await;
    assert_transport_overloaded(&result);
    assert!(!f.repo.negative_cache().is_miss(&path(OTHER_PATH)));
    assert_eq!(f.repo.proxy_mode(), ProxyMode::Allow);
}

#[tokio::test]
async fn test_transport_error_auto_blocks_and_serves_local() {
    let f = fixture();
    f.remote.set_content(JAR_PATH, jar_content(JAR_PATH, "jar", "v1"));
    f.repo.get(&ResourceRequest::new(JAR_PATH)).await.unwrap();

    f.remote.set_failure(
        JAR_PATH,
        RemoteError::transport("https://repo.example.org", TransportFailure::Connect, "refused"),
    );
    let item = f
        .repo
        .get(&ResourceRequest::new(JAR_PATH).as_expired())
        .await
        .unwrap();
    assert_eq!(item.source, ItemSource::StaleLocal);
    assert_eq!(f.repo.proxy_mode(), ProxyMode::BlockedAuto);
    assert_eq!(
        f.events.mode_changes(),
        vec![(ProxyMode::Allow, ProxyMode::BlockedAuto)]
    );

    let before = f.remote.retrieval_count();
    let blocked = f.repo.get(&ResourceRequest::new(OTHER_PATH)).await;
    assert_blocked(&blocked, ProxyMode::BlockedAuto);
    assert_eq!(f.remote.retrieval_count(), before);
}

#[tokio::test]
async fn test_access_denied_never_auto_blocks() {
    let f = fixture();
    f.remote.set_failure(
        JAR_PATH,
        RemoteError::transport("https://repo.example.org", TransportFailure::AccessDenied, "403"),
    );

    let result = f.repo.get(&ResourceRequest::new(JAR_PATH)).await;
    assert_transport_error(&result, TransportFailure::AccessDenied);
    assert_eq!(f.repo.proxy_mode(), ProxyMode::Allow);
    assert!(!f.repo.negative_cache().is_miss(&path(JAR_PATH)));
}

#[tokio::test]
async fn test_probe_success_auto_unblocks() {
    let f = fixture();
    f.repo.auto_block("connect refused");
    assert_eq!(f.repo.proxy_mode(), ProxyMode::BlockedAuto);

    let status = f.repo.probe_remote().await;
    assert_eq!(status, RemoteStatus::Available);
    assert_eq!(f.repo.proxy_mode(), ProxyMode::Allow);
    assert_eq!(
        f.events.mode_changes(),
        vec![
            (ProxyMode::Allow, ProxyMode::BlockedAuto),
            (ProxyMode::BlockedAuto, ProxyMode::Allow),
        ]
    );
}

#[tokio::test]
async fn test_probe_failure_auto_blocks() {
    let f = fixture();
    f.remote.set_availability(Ok(false));

    let status = f.repo.probe_remote().await;
    assert!(!status.is_available());
    assert_eq!(f.repo.proxy_mode(), ProxyMode::BlockedAuto);
}

#[tokio::test]
async fn test_manual_block_is_not_probed() {
    let f = fixture();
    f.repo.set_proxy_mode(ProxyMode::BlockedManual, None);

    let status = f.repo.probe_remote().await;
    assert!(!status.is_available());
    assert_eq!(f.remote.probe_count(), 0);
    assert_eq!(f.repo.proxy_mode(), ProxyMode::BlockedManual);
}

#[tokio::test]
async fn test_remote_status_is_retained() {
    let f = fixture();
    assert_eq!(f.repo.remote_status(false).await, RemoteStatus::Available);
    assert_eq!(f.repo.remote_status(false).await, RemoteStatus::Available);
    assert_eq!(f.remote.probe_count(), 1);

    f.repo.remote_status(true).await;
    assert_eq!(f.remote.probe_count(), 2);
}

#[tokio::test]
async fn test_manual_unblock_purges_negative_cache() {
    let f = fixture();
    let _ = f.repo.get(&ResourceRequest::new(JAR_PATH)).await;
    assert_eq!(f.repo.negative_cache().len(), 1);

    f.repo.set_proxy_mode(ProxyMode::BlockedManual, None);
    f.repo.set_proxy_mode(ProxyMode::Allow, None);
    assert!(f.repo.negative_cache().is_empty());
}

#[tokio::test]
async fn test_auto_unblock_keeps_negative_cache() {
    let f = fixture();
    let _ = f.repo.get(&ResourceRequest::new(JAR_PATH)).await;

    f.repo.auto_block("timeout");
    f.repo.auto_unblock();
    assert_eq!(f.repo.proxy_mode(), ProxyMode::Allow);
    assert_eq!(f.repo.negative_cache().len(), 1);
}

#[test]
fn test_auto_unblock_never_lifts_concurrent_manual_block() {
    for _ in 0..500 {
        let f = fixture();
        f.repo.auto_block("connect refused");
        assert_eq!(f.repo.proxy_mode(), ProxyMode::BlockedAuto);

        let barrier = Arc::new(Barrier::new(2));
        let unblocker = {
            let repo = f.repo.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                repo.auto_unblock()
            })
        };
        barrier.wait();
        let manual = f
            .repo
            .set_proxy_mode(ProxyMode::BlockedManual, Some("maintenance".to_string()));

        if let Some(transition) = unblocker.join().unwrap() {
            assert_eq!(transition.old_mode(), ProxyMode::BlockedAuto);
        }
        assert!(manual.is_some());
        assert_eq!(f.repo.proxy_mode(), ProxyMode::BlockedManual);
        assert!(!f
            .events
            .mode_changes()
            .contains(&(ProxyMode::BlockedManual, ProxyMode::Allow)));
    }
}

#[tokio::test]
async fn test_no_event_for_noop_transition() {
    let f = fixture();
    assert!(f.repo.set_proxy_mode(ProxyMode::Allow, None).is_none());
    assert!(f.events.events().is_empty());

    f.repo.set_proxy_mode(ProxyMode::BlockedManual, Some("maintenance".to_string()));
    assert!(f.repo.set_proxy_mode(ProxyMode::BlockedManual, None).is_none());
    assert_eq!(f.events.count_of("PROXY_MODE_CHANGED"), 1);
}

#[tokio::test]
async fn test_disabling_auto_block_unblocks() {
    let f = fixture_with(
        proxy_config("central").with_auto_block(AutoBlockConfig {
            enabled: true,
            failure_threshold: 1,
        }),
        MockRemoteStorage::new(),
    );
    f.repo.auto_block("timeout");
    assert_eq!(f.repo.proxy_mode(), ProxyMode::BlockedAuto);

    let transition = f.repo.set_auto_block_enabled(false).unwrap();
    assert_eq!(transition.new_mode(), ProxyMode::Allow);
    assert!(f.repo.auto_block("timeout").is_none());
    assert_eq!(f.repo.proxy_mode(), ProxyMode::Allow);
}

// ============================================================================
// Property tests
// ============================================================================

mod prop_tests {
    use super::*;
    use depot_test_utils::generators::{arb_release_coordinate, arb_snapshot_coordinate};
    use proptest::prelude::*;

    fn repository() -> ProxyRepository {
        let config = proxy_config("central");
        let cache = Arc::new(InMemoryProxyCache::new(config.id.clone()));
        ProxyRepository::new(
            config,
            &LayoutRegistry::default(),
            Arc::new(MockRemoteStorage::new()),
            cache,
            Arc::new(RecordingPublisher::new()),
        )
        .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_release_paths_classified(coordinate in arb_release_coordinate()) {
            let repo = repository();
            let rendered = Maven2Layout::new().coordinate_to_path(&coordinate);
            prop_assert_eq!(repo.coordinate_of(&RepositoryPath::new(&rendered)), Some(coordinate));
        }

        #[test]
        fn prop_snapshot_paths_keep_base_version(coordinate in arb_snapshot_coordinate()) {
            let repo = repository();
            let rendered = Maven2Layout::new().coordinate_to_path(&coordinate);
            let parsed = repo.coordinate_of(&RepositoryPath::new(&rendered)).unwrap();
            prop_assert_eq!(parsed.base_version(), coordinate.base_version());
            prop_assert!(parsed.is_snapshot());
        }
    }
}
