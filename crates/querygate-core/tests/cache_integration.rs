//! End-to-end cache behavior through the router.

mod common;

use common::{gateway_fixture, small_pool};
use querygate_core::cache::CacheConfig;
use querygate_core::protocol::{QueryRequest, QueryType, StatusCode};

fn select_users() -> QueryRequest {
    QueryRequest::new("SELECT * FROM users", QueryType::Select)
}

fn insert_user() -> QueryRequest {
    QueryRequest::new("INSERT INTO users (name) VALUES ('x')", QueryType::Insert)
}

fn warm_cache_config() -> CacheConfig {
    CacheConfig {
        enabled: true,
        max_entries: 10,
        ttl_seconds: 60,
        ..CacheConfig::default()
    }
}

#[tokio::test]
async fn select_twice_hits_cache_without_backend() {
    let (router, pool, cache, fleet) =
        gateway_fixture(small_pool(2, 500), warm_cache_config()).await;

    let first = router.execute(&select_users()).await;
    assert_eq!(first.status, StatusCode::Ok);
    assert_eq!(first.rows.len(), 3);
    assert_eq!(fleet.total_query_calls(), 1, "backend invoked once");

    let second = router.execute(&select_users()).await;
    assert_eq!(second.status, StatusCode::Ok);
    assert_eq!(second.rows.len(), 3);
    assert_eq!(fleet.total_query_calls(), 1, "cache hit leaves the backend untouched");
    assert_eq!(
        pool.metrics().base().snapshot().total_acquisitions,
        1,
        "a cache hit never leases a connection"
    );

    let metrics = cache.metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.puts, 1);
}

#[tokio::test]
async fn cached_response_is_restamped_per_request() {
    let (router, _pool, _cache, _fleet) =
        gateway_fixture(small_pool(2, 500), warm_cache_config()).await;

    let mut first = select_users();
    first.header.message_id = 100;
    first.header.correlation_id = "corr-a".to_string();
    router.execute(&first).await;

    let mut second = select_users();
    second.header.message_id = 200;
    second.header.correlation_id = "corr-b".to_string();
    let response = router.execute(&second).await;

    assert_eq!(response.header.message_id, 200);
    assert_eq!(response.header.correlation_id, "corr-b");
}

#[tokio::test]
async fn write_invalidates_cached_select() {
    let (router, _pool, cache, fleet) =
        gateway_fixture(small_pool(2, 500), warm_cache_config()).await;

    router.execute(&select_users()).await;
    assert_eq!(cache.size(), 1);

    let write = router.execute(&insert_user()).await;
    assert_eq!(write.status, StatusCode::Ok);
    assert_eq!(write.affected_rows, 1);
    assert_eq!(cache.metrics().invalidations, 1);

    let after = router.execute(&select_users()).await;
    assert_eq!(after.status, StatusCode::Ok);
    assert_eq!(
        fleet.total_query_calls(),
        3,
        "select, insert, and the re-executed select all reach the backend"
    );
    assert_eq!(cache.metrics().misses, 2);
}

#[tokio::test]
async fn unrelated_write_leaves_cache_warm() {
    let (router, _pool, cache, fleet) =
        gateway_fixture(small_pool(2, 500), warm_cache_config()).await;

    router.execute(&select_users()).await;
    router
        .execute(&QueryRequest::new(
            "INSERT INTO audit_log (entry) VALUES ('x')",
            QueryType::Insert,
        ))
        .await;

    let response = router.execute(&select_users()).await;
    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(fleet.total_query_calls(), 2, "second select was a cache hit");
    assert_eq!(cache.metrics().invalidations, 0);
}

#[tokio::test]
async fn oversized_result_is_never_cached() {
    let config = CacheConfig {
        max_result_size_bytes: 16,
        ..warm_cache_config()
    };
    let (router, _pool, cache, fleet) = gateway_fixture(small_pool(2, 500), config).await;

    router.execute(&select_users()).await;
    router.execute(&select_users()).await;

    let metrics = cache.metrics();
    assert_eq!(metrics.skipped_too_large, 2);
    assert_eq!(metrics.puts, 0);
    assert_eq!(fleet.total_query_calls(), 2, "both selects hit the backend");
    assert_eq!(cache.size(), 0);
}

#[tokio::test]
async fn disabled_cache_always_executes() {
    let (router, _pool, cache, fleet) =
        gateway_fixture(small_pool(2, 500), CacheConfig::default()).await;

    router.execute(&select_users()).await;
    router.execute(&select_users()).await;

    assert_eq!(fleet.total_query_calls(), 2);
    assert_eq!(cache.metrics().hits, 0);
}

#[tokio::test]
async fn invalidate_all_on_write_wipes_everything() {
    let config = CacheConfig {
        invalidate_all_on_write: true,
        ..warm_cache_config()
    };
    let (router, _pool, cache, _fleet) = gateway_fixture(small_pool(2, 500), config).await;

    router.execute(&select_users()).await;
    router
        .execute(&QueryRequest::new(
            "SELECT * FROM orders",
            QueryType::Select,
        ))
        .await;
    assert_eq!(cache.size(), 2);

    // The write names only audit_log, but the escape hatch wipes everything.
    router
        .execute(&QueryRequest::new(
            "INSERT INTO audit_log (entry) VALUES ('x')",
            QueryType::Insert,
        ))
        .await;
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.metrics().invalidations, 2);
}
