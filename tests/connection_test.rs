//! Integration tests for connection establishment and selection.

use async_trait::async_trait;
use ormkit::db::{DbPool, Dialer, DriverDialer, ResolvedConnection};
use ormkit::{DbError, DbResult, MapConfig, MemorySink, Orm, OrmContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Dials through the real drivers, counting every dial.
struct CountingDialer {
    dials: AtomicUsize,
    delay: Duration,
}

impl CountingDialer {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            dials: AtomicUsize::new(0),
            delay,
        })
    }

    fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for CountingDialer {
    async fn dial(&self, connection: &ResolvedConnection) -> DbResult<DbPool> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        DriverDialer.dial(connection).await
    }
}

fn config() -> MapConfig {
    MapConfig::new()
        .with("database.default", "main")
        .with("database.connections.main.driver", "sqlite")
        .with("database.connections.main.database", ":memory:")
        .with("database.connections.reports.driver", "sqlite")
        .with("database.connections.reports.database", ":memory:")
        .with("database.connections.legacy.driver", "goravel")
}

fn orm_with(dialer: Arc<CountingDialer>, sink: Arc<MemorySink>) -> Orm {
    Orm::with_dialer(Arc::new(config()), sink, dialer)
}

#[tokio::test]
async fn test_reusing_a_name_never_redials() {
    let dialer = CountingDialer::new(Duration::ZERO);
    let orm = orm_with(dialer.clone(), Arc::new(MemorySink::new()));

    orm.connection("reports").await.unwrap();
    orm.connection("reports").await.unwrap();
    let first = orm.get_connection("reports").await.unwrap();
    let second = orm.get_connection("reports").await.unwrap();

    assert_eq!(dialer.dials(), 1);
    assert_eq!(first.connection_name(), second.connection_name());
    assert_eq!(orm.connections().await, vec!["reports".to_string()]);
}

#[tokio::test]
async fn test_handles_are_shared_within_an_orm() {
    let dialer = CountingDialer::new(Duration::ZERO);
    let orm = orm_with(dialer.clone(), Arc::new(MemorySink::new()));

    // Same in-memory database behind both queries
    orm.get_connection("main")
        .await
        .unwrap()
        .exec("CREATE TABLE marker (id INTEGER)", ormkit::params![])
        .await
        .unwrap();
    let count = orm
        .query()
        .await
        .unwrap()
        .table("marker")
        .count()
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn test_selection_is_one_shot() {
    let orm = orm_with(
        CountingDialer::new(Duration::ZERO),
        Arc::new(MemorySink::new()),
    );

    let selected = orm.connection("reports").await.unwrap().query().await.unwrap();
    assert_eq!(selected.connection_name(), "reports");

    // Selection consumed: back to the default
    let next = orm.query().await.unwrap();
    assert_eq!(next.connection_name(), "main");
    let again = orm.query().await.unwrap();
    assert_eq!(again.connection_name(), "main");
}

#[tokio::test]
async fn test_query_establishes_default_lazily() {
    let dialer = CountingDialer::new(Duration::ZERO);
    let orm = orm_with(dialer.clone(), Arc::new(MemorySink::new()));
    assert_eq!(dialer.dials(), 0);

    let query = orm.query().await.unwrap();
    assert_eq!(query.connection_name(), "main");
    assert_eq!(dialer.dials(), 1);

    orm.query().await.unwrap();
    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn test_concurrent_first_use_dials_once() {
    let dialer = CountingDialer::new(Duration::from_millis(50));
    let orm = Arc::new(orm_with(dialer.clone(), Arc::new(MemorySink::new())));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let orm = Arc::clone(&orm);
            tokio::spawn(async move {
                orm.get_connection("reports")
                    .await
                    .map(|q| q.connection_name().to_string())
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "reports");
    }
    assert_eq!(dialer.dials(), 1);
    assert_eq!(orm.connections().await.len(), 1);
}

#[tokio::test]
async fn test_unsupported_driver_is_reported_and_returned() {
    let sink = Arc::new(MemorySink::new());
    let dialer = CountingDialer::new(Duration::ZERO);
    let orm = orm_with(dialer.clone(), sink.clone());

    let err = orm.connection("legacy").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "err database driver: goravel, only support mysql, postgresql, sqlite and sqlserver"
    );
    assert_eq!(
        sink.lines(),
        vec![
            "[Orm] Init connection error, err database driver: goravel, only support mysql, postgresql, sqlite and sqlserver"
                .to_string()
        ]
    );
    // Resolution failed before any dial
    assert_eq!(dialer.dials(), 0);

    // The failed name was never selected
    assert_eq!(orm.query().await.unwrap().connection_name(), "main");
}

#[tokio::test]
async fn test_failed_connection_never_routes_to_previous_selection() {
    let sink = Arc::new(MemorySink::new());
    let orm = orm_with(CountingDialer::new(Duration::ZERO), sink.clone());

    orm.connection("reports").await.unwrap();
    assert!(orm.connection("legacy").await.is_err());

    assert_eq!(orm.query().await.unwrap().connection_name(), "main");
    assert_eq!(sink.lines().len(), 1);
}

#[tokio::test]
async fn test_missing_default_is_an_error() {
    let sink = Arc::new(MemorySink::new());
    let orm = Orm::new(Arc::new(MapConfig::new()), sink.clone());
    let err = orm.query().await.unwrap_err();
    assert!(matches!(err, DbError::UnsupportedDriver { ref driver } if driver.is_empty()));
    assert_eq!(sink.lines().len(), 1);
}

#[tokio::test]
async fn test_deadline_aborts_establishment() {
    let sink = Arc::new(MemorySink::new());
    let dialer = CountingDialer::new(Duration::from_secs(5));
    let orm = orm_with(dialer, sink.clone())
        .with_context(OrmContext::background().with_timeout(Duration::from_millis(50)));

    let started = std::time::Instant::now();
    let err = orm.connection("main").await.unwrap_err();
    assert!(err.is_context_ended());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(sink.lines()[0].contains("context deadline exceeded"));
}

#[tokio::test]
async fn test_cancelled_context_fails_queries_fast() {
    let token = CancellationToken::new();
    let base = orm_with(
        CountingDialer::new(Duration::ZERO),
        Arc::new(MemorySink::new()),
    );
    let orm = base.with_context(OrmContext::background().with_cancellation(token.clone()));

    let query = orm.query().await.unwrap();
    token.cancel();
    let err = query
        .raw("SELECT 1 AS one", ormkit::params![])
        .scan::<serde_json::Value>()
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ContextEnded { .. }));
}

#[tokio::test]
async fn test_with_context_gets_its_own_registry() {
    let dialer = CountingDialer::new(Duration::ZERO);
    let orm = orm_with(dialer.clone(), Arc::new(MemorySink::new()));
    orm.connection("main").await.unwrap();

    let scoped = orm.with_context(OrmContext::background());
    assert!(scoped.connections().await.is_empty());
    scoped.connection("main").await.unwrap();
    assert_eq!(dialer.dials(), 2);
}

#[tokio::test]
async fn test_close_all_then_reconnect() {
    let dialer = CountingDialer::new(Duration::ZERO);
    let orm = orm_with(dialer.clone(), Arc::new(MemorySink::new()));
    orm.query().await.unwrap();
    orm.close_all().await;
    assert!(orm.connections().await.is_empty());

    orm.query().await.unwrap();
    assert_eq!(dialer.dials(), 2);
}
