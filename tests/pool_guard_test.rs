//! Integration tests for pooled connection handling.
//!
//! Every connection handed out by the guard must come back exactly once, no
//! matter where a query or health check fails.

mod common;

use chrono::{TimeZone, Utc};
use common::{
    FaultStage, HEALTH_SQL, Script, StubBackend, StubDriver, StubFactory, context, settings, text,
};
use db_frame_datasource::datasource::DataSource;
use db_frame_datasource::db::{
    ConnectionPoolGuard, HEALTH_CHECK_LIFETIME, HealthProbe, LifetimeHint, QueryExecutor, RawValue,
};
use db_frame_datasource::models::{
    CheckHealthRequest, ConnectionString, DataQuery, HealthStatus, QueryDataRequest, QueryModel,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn guard(backend: &Arc<StubBackend>) -> ConnectionPoolGuard<StubDriver> {
    ConnectionPoolGuard::new(
        StubDriver::new(Arc::clone(backend)),
        ConnectionString::new("db.local", "5432", "metrics", "reader", "pw"),
    )
}

fn scripted(fault: FaultStage) -> Script {
    Script::new(
        &[("n", "bigint")],
        vec![vec![RawValue::Int(1)], vec![RawValue::Int(2)]],
    )
    .failing_at(fault)
}

const ALL_FAULTS: [FaultStage; 6] = [
    FaultStage::None,
    FaultStage::Prepare,
    FaultStage::Execute,
    FaultStage::Columns,
    FaultStage::Scan(0),
    FaultStage::Scan(1),
];

async fn wait_for_releases(backend: &StubBackend, expected: usize) {
    for _ in 0..100 {
        if backend.counters.releases() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =========================================================================
// Guard
// =========================================================================

#[tokio::test]
async fn test_explicit_release_returns_connection() {
    let backend = StubBackend::new();
    let pool = guard(&backend);

    let pooled = pool.acquire(LifetimeHint::NoRecycling).await.unwrap();
    assert_eq!(backend.counters.acquires(), 1);
    assert_eq!(backend.counters.releases(), 0);

    pooled.release().await;
    assert_eq!(backend.counters.releases(), 1);
}

#[tokio::test]
async fn test_dropped_connection_is_released() {
    let backend = StubBackend::new();
    let pool = guard(&backend);

    {
        let _pooled = pool.acquire(LifetimeHint::NoRecycling).await.unwrap();
    }

    wait_for_releases(&backend, 1).await;
    assert_eq!(backend.counters.releases(), 1);
}

#[tokio::test]
async fn test_concurrent_acquires_both_succeed() {
    let backend = StubBackend::new();
    let pool = guard(&backend);

    let (a, b) = tokio::join!(
        pool.acquire(LifetimeHint::NoRecycling),
        pool.acquire(LifetimeHint::NoRecycling)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(backend.counters.acquires(), 2);

    a.release().await;
    b.release().await;
    assert_eq!(backend.counters.releases(), 2);
}

#[tokio::test]
async fn test_cloned_guards_share_one_driver() {
    let backend = StubBackend::new();
    let pool = guard(&backend);
    let other = pool.clone();

    pool.acquire(LifetimeHint::NoRecycling)
        .await
        .unwrap()
        .release()
        .await;
    other.close().await;

    assert_eq!(backend.counters.acquires(), 1);
    assert_eq!(backend.counters.closes(), 1);
}

#[tokio::test]
async fn test_failed_acquire_has_nothing_to_release() {
    let backend = StubBackend::new();
    backend.fail_acquire(true);
    let pool = guard(&backend);

    let err = pool.acquire(LifetimeHint::NoRecycling).await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(backend.counters.acquires(), 0);
    assert_eq!(backend.counters.releases(), 0);
}

#[tokio::test]
async fn test_release_is_not_blocked_by_a_waiting_acquire() {
    let backend = StubBackend::with_capacity(1);
    let pool = guard(&backend);

    let first = pool.acquire(LifetimeHint::NoRecycling).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(LifetimeHint::NoRecycling).await })
    };
    // Let the second acquire park on the full pool
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    timeout(Duration::from_secs(5), first.release())
        .await
        .expect("release waited behind a pending acquire");

    let second = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("second acquire never completed")
        .unwrap()
        .unwrap();
    second.release().await;

    assert_eq!(backend.counters.acquires(), 2);
    assert_eq!(backend.counters.releases(), 2);
}

#[tokio::test]
async fn test_close_waits_for_checked_out_connection_without_blocking_release() {
    let backend = StubBackend::with_capacity(2);
    let pool = guard(&backend);

    let pooled = pool.acquire(LifetimeHint::NoRecycling).await.unwrap();

    let closing = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.close().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!closing.is_finished());
    assert_eq!(backend.counters.closes(), 0);

    timeout(Duration::from_secs(5), pooled.release())
        .await
        .expect("release waited behind close");
    timeout(Duration::from_secs(5), closing)
        .await
        .expect("close never completed")
        .unwrap();

    assert_eq!(backend.counters.releases(), 1);
    assert_eq!(backend.counters.closes(), 1);
}

#[tokio::test]
async fn test_executor_on_pooled_connection_balances_for_every_fault() {
    for fault in ALL_FAULTS {
        let backend = StubBackend::new();
        backend.script("select n from numbers", scripted(fault));
        let pool = guard(&backend);

        let mut pooled = pool.acquire(LifetimeHint::NoRecycling).await.unwrap();
        let result = QueryExecutor::new()
            .run(pooled.get_mut().unwrap(), &QueryModel::new("select n from numbers"))
            .await;
        pooled.release().await;

        assert_eq!(result.is_ok(), fault == FaultStage::None, "fault {:?}", fault);
        assert_eq!(backend.counters.acquires(), 1, "fault {:?}", fault);
        assert_eq!(backend.counters.releases(), 1, "fault {:?}", fault);
        assert_eq!(
            backend.counters.cursors_opened(),
            backend.counters.cursors_closed(),
            "fault {:?}",
            fault
        );
    }
}

// =========================================================================
// Through the datasource
// =========================================================================

#[tokio::test]
async fn test_query_data_releases_once_for_every_fault() {
    for fault in ALL_FAULTS {
        let backend = StubBackend::new();
        backend.script("select n from numbers", scripted(fault));
        let datasource = DataSource::new(StubFactory::new(Arc::clone(&backend)));

        let request = QueryDataRequest {
            plugin_context: context(settings("ds-1", Utc::now())),
            queries: vec![
                DataQuery::new("A", &QueryModel::new("select n from numbers")),
                DataQuery::new("B", &QueryModel::new("select n from numbers")),
            ],
        };
        let response = datasource.query_data(&request).await.unwrap();

        assert_eq!(response.len(), 2);
        assert_eq!(backend.counters.acquires(), 1, "fault {:?}", fault);
        assert_eq!(backend.counters.releases(), 1, "fault {:?}", fault);
        assert_eq!(
            backend.counters.cursors_opened(),
            backend.counters.cursors_closed(),
            "fault {:?}",
            fault
        );
    }
}

#[tokio::test]
async fn test_query_connections_use_no_recycling() {
    let backend = StubBackend::new();
    backend.script("select 1", Script::new(&[("one", "int")], vec![vec![RawValue::Int(1)]]));
    let datasource = DataSource::new(StubFactory::new(Arc::clone(&backend)));

    let request = QueryDataRequest {
        plugin_context: context(settings("ds-1", Utc::now())),
        queries: vec![DataQuery::new("A", &QueryModel::new("select 1"))],
    };
    datasource.query_data(&request).await.unwrap();

    assert_eq!(backend.hints(), vec![LifetimeHint::NoRecycling]);
}

// =========================================================================
// Health probe
// =========================================================================

#[tokio::test]
async fn test_health_connections_recycle_after_a_minute() {
    let backend = StubBackend::new();
    let datasource = DataSource::new(StubFactory::new(Arc::clone(&backend)));

    let request = CheckHealthRequest {
        plugin_context: context(settings("ds-1", Utc::now())),
    };
    let result = datasource.check_health(&request).await;

    assert_eq!(result.status, HealthStatus::Ok);
    assert_eq!(
        backend.hints(),
        vec![LifetimeHint::RecycleAfter(HEALTH_CHECK_LIFETIME)]
    );
    assert_eq!(HEALTH_CHECK_LIFETIME, Duration::from_secs(60));
}

#[tokio::test]
async fn test_health_probe_reports_stage_and_releases_once() {
    let cases = [
        (FaultStage::Prepare, "prepare"),
        (FaultStage::Execute, "execute"),
        (FaultStage::Columns, "columns"),
        (FaultStage::Scan(0), "scan"),
    ];

    for (fault, stage) in cases {
        let backend = StubBackend::new();
        backend.script(
            HEALTH_SQL,
            Script::new(
                &[("CURRENT_TIMESTAMP", "timestamp")],
                vec![vec![text("2024-06-01 12:00:00")]],
            )
            .failing_at(fault),
        );
        let pool = guard(&backend);

        let result = HealthProbe::new(HEALTH_SQL).check(&pool).await;

        assert_eq!(result.status, HealthStatus::Error, "fault {:?}", fault);
        assert!(
            result.message.contains(stage),
            "fault {:?}: {}",
            fault,
            result.message
        );
        assert_eq!(backend.counters.acquires(), 1, "fault {:?}", fault);
        assert_eq!(backend.counters.releases(), 1, "fault {:?}", fault);
        assert_eq!(
            backend.counters.cursors_opened(),
            backend.counters.cursors_closed(),
            "fault {:?}",
            fault
        );
    }
}

#[tokio::test]
async fn test_health_probe_rejects_empty_results() {
    let cases = [
        (Script::new(&[], Vec::new()), "no columns"),
        (
            Script::new(&[("CURRENT_TIMESTAMP", "timestamp")], Vec::new()),
            "no rows",
        ),
        (
            Script::new(
                &[("CURRENT_TIMESTAMP", "timestamp")],
                vec![vec![RawValue::Null]],
            ),
            "NULL",
        ),
    ];

    for (script, expected) in cases {
        let backend = StubBackend::new();
        backend.script(HEALTH_SQL, script);
        let pool = guard(&backend);

        let result = HealthProbe::new(HEALTH_SQL).check(&pool).await;

        assert_eq!(result.status, HealthStatus::Error);
        assert!(result.message.contains(expected), "{}", result.message);
        assert_eq!(backend.counters.releases(), 1);
        assert_eq!(backend.counters.cursors_closed(), 1);
    }
}

#[tokio::test]
async fn test_health_probe_acquire_failure() {
    let backend = StubBackend::new();
    backend.fail_acquire(true);
    let pool = guard(&backend);

    let result = HealthProbe::new(HEALTH_SQL).check(&pool).await;

    assert_eq!(result.status, HealthStatus::Error);
    assert!(result.message.contains("acquire"));
    assert!(result.message.contains("connection refused"));
    assert_eq!(backend.counters.releases(), 0);
}

#[tokio::test]
async fn test_health_probe_reads_typed_timestamp() {
    let backend = StubBackend::new();
    let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    backend.script(
        HEALTH_SQL,
        Script::new(
            &[("CURRENT_TIMESTAMP", "timestamp")],
            vec![vec![RawValue::Timestamp(ts)]],
        ),
    );
    let pool = guard(&backend);

    let result = HealthProbe::new(HEALTH_SQL).check(&pool).await;

    assert_eq!(result.status, HealthStatus::Ok);
    assert!(result.message.starts_with("Check successful; current timestamp = 2024-06-01 12:00:00"));
}
