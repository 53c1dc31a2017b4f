//! The ORM facade.
//!
//! An [`Orm`] owns a [`ConnectionRegistry`], the default-connection handle
//! and the name selected by the last [`Orm::connection`] call. Selection is
//! one-shot: the next [`Orm::query`] consumes it, and later calls fall back to
//! the default connection. [`Orm::get_connection`] reaches a named connection
//! without touching the selection.

use crate::config::{ConfigRepository, DEFAULT_CONNECTION_KEY};
use crate::db::context::OrmContext;
use crate::db::pool::{ConnectionHandle, Dialer, DriverDialer};
use crate::db::query::Query;
use crate::db::registry::ConnectionRegistry;
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::log::LogSink;
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub struct Orm {
    config: Arc<dyn ConfigRepository>,
    dialer: Arc<dyn Dialer>,
    sink: Arc<dyn LogSink>,
    ctx: OrmContext,
    registry: ConnectionRegistry,
    selected: Mutex<Option<String>>,
    default_handle: Mutex<Option<Arc<ConnectionHandle>>>,
}

impl Orm {
    /// Create an Orm that dials through the sqlx/tiberius drivers.
    pub fn new(config: Arc<dyn ConfigRepository>, sink: Arc<dyn LogSink>) -> Self {
        Self::with_dialer(config, sink, Arc::new(DriverDialer))
    }

    /// Create an Orm with a custom [`Dialer`].
    pub fn with_dialer(
        config: Arc<dyn ConfigRepository>,
        sink: Arc<dyn LogSink>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self::build(config, sink, dialer, OrmContext::background())
    }

    fn build(
        config: Arc<dyn ConfigRepository>,
        sink: Arc<dyn LogSink>,
        dialer: Arc<dyn Dialer>,
        ctx: OrmContext,
    ) -> Self {
        let registry = ConnectionRegistry::new(Arc::clone(&config), Arc::clone(&dialer));
        Self {
            config,
            dialer,
            sink,
            ctx,
            registry,
            selected: Mutex::new(None),
            default_handle: Mutex::new(None),
        }
    }

    /// A fresh Orm bound to `ctx`. It shares configuration, dialer and log
    /// sink with `self` but has its own registry, so connections are
    /// established again under the new context.
    pub fn with_context(&self, ctx: OrmContext) -> Orm {
        Self::build(
            Arc::clone(&self.config),
            Arc::clone(&self.sink),
            Arc::clone(&self.dialer),
            ctx,
        )
    }

    pub fn context(&self) -> &OrmContext {
        &self.ctx
    }

    /// Name configured under `database.default`.
    pub fn default_connection_name(&self) -> String {
        self.config.string_or_empty(DEFAULT_CONNECTION_KEY)
    }

    /// Select a connection for the next [`Orm::query`], establishing it if
    /// needed. An empty name means the default connection.
    ///
    /// Establishment failures are reported to the log sink as
    /// `[Orm] Init connection error, <err>` and returned. They also clear any
    /// earlier selection, so the next [`Orm::query`] uses the default.
    pub async fn connection(&self, name: &str) -> DbResult<&Self> {
        let default_name = self.default_connection_name();
        let name = if name.is_empty() {
            default_name.clone()
        } else {
            name.to_string()
        };

        let handle = match self.establish(&name).await {
            Ok(handle) => handle,
            Err(err) => {
                // A failed name must not fall through to an earlier selection
                lock(&self.selected).take();
                return Err(err);
            }
        };
        if name == default_name {
            *lock(&self.default_handle) = Some(handle);
        }
        *lock(&self.selected) = Some(name);
        Ok(self)
    }

    /// Query on the selected connection, clearing the selection, or on the
    /// default connection when nothing is selected.
    pub async fn query(&self) -> DbResult<Query<'static>> {
        let handle = self.take_handle().await?;
        Ok(Query::for_connection(handle, self.ctx.clone()))
    }

    /// Query on a named connection without touching the selection. An empty
    /// name means the default connection.
    pub async fn get_connection(&self, name: &str) -> DbResult<Query<'static>> {
        let handle = if name.is_empty() {
            self.default_handle().await?
        } else {
            self.establish(name).await?
        };
        Ok(Query::for_connection(handle, self.ctx.clone()))
    }

    /// Run `callback` in a transaction on the connection [`Orm::query`] would
    /// use.
    ///
    /// - begin fails: the error is returned and `callback` never runs
    /// - `callback` succeeds: the transaction commits; a commit failure is returned
    /// - `callback` fails: the transaction rolls back and the callback's error
    ///   is returned; if the rollback fails too, [`DbError::RollbackFailed`]
    ///   carries both
    ///
    /// Run statements through `tx.query()` inside the callback. On SQL Server
    /// the transaction holds the connection's only session, so an
    /// [`Orm::query`] on the same connection waits until the transaction ends
    /// and, when awaited from inside the callback, blocks until the context
    /// deadline.
    ///
    /// ```no_run
    /// # async fn demo(orm: &ormkit::Orm) -> ormkit::DbResult<()> {
    /// use ormkit::params;
    ///
    /// orm.transaction(|tx| {
    ///     Box::pin(async move {
    ///         tx.query()
    ///             .exec("UPDATE accounts SET balance = balance - ? WHERE id = ?", params![10, 1])
    ///             .await?;
    ///         tx.query()
    ///             .exec("UPDATE accounts SET balance = balance + ? WHERE id = ?", params![10, 2])
    ///             .await?;
    ///         Ok::<(), ormkit::DbError>(())
    ///     })
    /// })
    /// .await
    /// # }
    /// ```
    pub async fn transaction<F>(&self, callback: F) -> DbResult<()>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, DbResult<()>>,
    {
        let handle = self.take_handle().await?;
        let mut tx = Transaction::begin(&handle, &self.ctx).await?;

        match callback(&mut tx).await {
            Ok(()) => tx.commit().await,
            Err(err) => {
                debug!(transaction_id = %tx.id(), error = %err, "Transaction callback failed");
                match tx.rollback().await {
                    Ok(()) => Err(err),
                    Err(rollback) => Err(DbError::rollback_failed(rollback, err)),
                }
            }
        }
    }

    /// Names with an established connection.
    pub async fn connections(&self) -> Vec<String> {
        self.registry.names().await
    }

    /// Close every established connection. Later use establishes them again.
    pub async fn close_all(&self) {
        *lock(&self.default_handle) = None;
        *lock(&self.selected) = None;
        self.registry.close_all().await;
    }

    async fn take_handle(&self) -> DbResult<Arc<ConnectionHandle>> {
        let selected = lock(&self.selected).take();
        match selected {
            Some(name) => self.establish(&name).await,
            None => self.default_handle().await,
        }
    }

    async fn default_handle(&self) -> DbResult<Arc<ConnectionHandle>> {
        let cached = lock(&self.default_handle).clone();
        if let Some(handle) = cached {
            return Ok(handle);
        }
        let handle = self.establish(&self.default_connection_name()).await?;
        *lock(&self.default_handle) = Some(Arc::clone(&handle));
        Ok(handle)
    }

    async fn establish(&self, name: &str) -> DbResult<Arc<ConnectionHandle>> {
        match self.registry.get_or_connect(name, &self.ctx).await {
            Ok(handle) => Ok(handle),
            Err(err) => {
                warn!(connection = %name, error = %err, "Init connection failed");
                self.sink
                    .error(&format!("[Orm] Init connection error, {}", err));
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orm")
            .field("ctx", &self.ctx)
            .field("selected", &*lock(&self.selected))
            .finish_non_exhaustive()
    }
}

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::log::MemorySink;

    fn orm(sink: Arc<MemorySink>) -> Orm {
        let config = MapConfig::new()
            .with("database.default", "main")
            .with("database.connections.main.driver", "sqlite")
            .with("database.connections.main.database", ":memory:")
            .with("database.connections.other.driver", "sqlite")
            .with("database.connections.other.database", ":memory:");
        Orm::new(Arc::new(config), sink)
    }

    #[tokio::test]
    async fn test_connection_empty_name_is_default() {
        let orm = orm(Arc::new(MemorySink::new()));
        orm.connection("").await.unwrap();
        assert_eq!(*lock(&orm.selected), Some("main".to_string()));
        assert!(lock(&orm.default_handle).is_some());
    }

    #[tokio::test]
    async fn test_selection_is_one_shot() {
        let orm = orm(Arc::new(MemorySink::new()));
        let query = orm.connection("other").await.unwrap().query().await.unwrap();
        assert_eq!(query.connection_name(), "other");
        let query = orm.query().await.unwrap();
        assert_eq!(query.connection_name(), "main");
    }

    #[tokio::test]
    async fn test_get_connection_keeps_selection() {
        let orm = orm(Arc::new(MemorySink::new()));
        orm.connection("other").await.unwrap();
        let query = orm.get_connection("main").await.unwrap();
        assert_eq!(query.connection_name(), "main");
        assert_eq!(orm.query().await.unwrap().connection_name(), "other");
    }

    #[tokio::test]
    async fn test_failed_connection_clears_earlier_selection() {
        let orm = orm(Arc::new(MemorySink::new()));
        orm.connection("other").await.unwrap();
        assert!(orm.connection("missing").await.is_err());
        assert_eq!(*lock(&orm.selected), None);
        assert_eq!(orm.query().await.unwrap().connection_name(), "main");
    }

    #[tokio::test]
    async fn test_failed_connection_is_logged() {
        let sink = Arc::new(MemorySink::new());
        let orm = orm(sink.clone());
        assert!(orm.connection("missing").await.is_err());
        assert_eq!(
            sink.lines(),
            vec![
                "[Orm] Init connection error, err database driver: , only support mysql, postgresql, sqlite and sqlserver"
                    .to_string()
            ]
        );
        assert_eq!(*lock(&orm.selected), None);
    }
}
