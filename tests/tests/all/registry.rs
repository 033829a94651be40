use crate::lookup::TestDnsResolver;
use http::StatusCode;
use std::collections::HashSet;
use std::time::Duration;
use tests::test_server::{refusing_backend, TestServer};
use wizbal::{Error, Registry, Service};

fn service(name: &str) -> Service {
    Service::try_from(name).unwrap()
}

fn registry(resolver: &TestDnsResolver) -> Registry {
    Registry::builder()
        .lookup_service(resolver.clone())
        .probe_timeout(Duration::from_millis(500))
        .build()
        .expect("failed to build registry")
}

#[tokio::test]
async fn server_error_backend_is_never_selected() {
    // Scenario:
    //  `a.srv.example.com` resolves to three backends, the second answers 503.
    // What we want to test:
    //  Only the two healthy backends are ever returned.
    let h1 = TestServer::start("h1", StatusCode::OK).await;
    let h2 = TestServer::start("h2", StatusCode::SERVICE_UNAVAILABLE).await;
    let h3 = TestServer::start("h3", StatusCode::OK).await;

    let a = service("a.srv.example.com");
    let resolver = TestDnsResolver::default();
    for server in [&h1, &h2, &h3] {
        resolver.add_backend(&a, server.backend()).await;
    }
    let registry = registry(&resolver);

    let mut selected = HashSet::new();
    for _ in 0..200 {
        let backend = registry.get_backend(&a).await.expect("no backend");
        assert_ne!(backend, h2.backend());
        selected.insert(backend);
    }

    assert_eq!(selected, HashSet::from([h1.backend(), h3.backend()]));
    assert_eq!(resolver.lookups(), 1);
    // Probed once per refresh, not once per request.
    assert_eq!(h1.hits(), 1);
    assert_eq!(h2.hits(), 1);
    assert_eq!(h3.hits(), 1);
}

#[tokio::test]
async fn redirecting_backend_is_alive() {
    let redirect = TestServer::start("redirect", StatusCode::MOVED_PERMANENTLY).await;
    let not_found = TestServer::start("not_found", StatusCode::NOT_FOUND).await;

    let a = service("a.srv.example.com");
    let resolver = TestDnsResolver::default();
    resolver.add_backend(&a, redirect.backend()).await;
    resolver.add_backend(&a, not_found.backend()).await;

    let pool = registry(&resolver).get_pool(&a).await.unwrap();

    assert_eq!(pool.backends(), &[redirect.backend(), not_found.backend()]);
    // The redirect was not followed.
    assert_eq!(redirect.hits(), 1);
}

#[tokio::test]
async fn refusing_backend_is_excluded() {
    let alive = TestServer::start("alive", StatusCode::OK).await;

    let a = service("a.srv.example.com");
    let resolver = TestDnsResolver::default();
    resolver.add_backend(&a, refusing_backend()).await;
    resolver.add_backend(&a, alive.backend()).await;

    let pool = registry(&resolver).get_pool(&a).await.unwrap();

    assert_eq!(pool.backends(), &[alive.backend()]);
}

#[tokio::test]
async fn all_dead_is_no_backend() {
    let dead = TestServer::start("dead", StatusCode::INTERNAL_SERVER_ERROR).await;

    let a = service("a.srv.example.com");
    let resolver = TestDnsResolver::default();
    resolver.add_backend(&a, dead.backend()).await;
    resolver.add_backend(&a, refusing_backend()).await;

    let err = registry(&resolver).get_backend(&a).await.unwrap_err();

    assert!(matches!(err, Error::NoBackend(_)));
}

#[tokio::test]
async fn unknown_service_does_not_affect_others() {
    let alive = TestServer::start("alive", StatusCode::OK).await;

    let a = service("a.srv.example.com");
    let resolver = TestDnsResolver::default();
    resolver.add_backend(&a, alive.backend()).await;
    let registry = registry(&resolver);

    let err = registry
        .get_backend(&service("unknown.srv.example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Resolution(_)));

    assert_eq!(registry.get_backend(&a).await.unwrap(), alive.backend());
}

#[tokio::test]
async fn backends_follow_discovery_after_ttl() {
    // Steps:
    //  1. Resolve a service with two backends.
    //  2. Remove one of them from discovery.
    //  3. Wait for the ttl to pass.
    // What we want to test:
    //  The removed backend stops being selected once the pool is refreshed.
    let ttl = Duration::from_millis(100);
    let stays = TestServer::start("stays", StatusCode::OK).await;
    let leaves = TestServer::start("leaves", StatusCode::OK).await;

    let a = service("a.srv.example.com");
    let resolver = TestDnsResolver::default();
    resolver.add_backend(&a, stays.backend()).await;
    resolver.add_backend(&a, leaves.backend()).await;
    let registry = Registry::builder()
        .ttl(ttl)
        .lookup_service(resolver.clone())
        .build()
        .unwrap();

    assert_eq!(registry.get_pool(&a).await.unwrap().backends().len(), 2);

    resolver.remove_backend(&a, &leaves.backend()).await;
    // Still cached.
    assert_eq!(registry.get_pool(&a).await.unwrap().backends().len(), 2);

    tokio::time::sleep(ttl * 2).await;

    for _ in 0..20 {
        assert_eq!(registry.get_backend(&a).await.unwrap(), stays.backend());
    }
    assert_eq!(resolver.lookups(), 2);
}

#[tokio::test]
async fn backend_going_down_is_dropped_on_refresh() {
    let ttl = Duration::from_millis(100);
    let stays = TestServer::start("stays", StatusCode::OK).await;
    let goes_down = TestServer::start("goes_down", StatusCode::OK).await;
    let goes_down_backend = goes_down.backend();

    let a = service("a.srv.example.com");
    let resolver = TestDnsResolver::default();
    resolver.add_backend(&a, stays.backend()).await;
    resolver.add_backend(&a, goes_down_backend.clone()).await;
    let registry = Registry::builder()
        .ttl(ttl)
        .probe_timeout(Duration::from_millis(500))
        .lookup_service(resolver.clone())
        .build()
        .unwrap();

    assert_eq!(registry.get_pool(&a).await.unwrap().backends().len(), 2);

    goes_down.shutdown_sync().await;
    tokio::time::sleep(ttl * 2).await;

    let pool = registry.get_pool(&a).await.unwrap();
    assert_eq!(pool.backends(), &[stays.backend()]);
}
