//! Transactions.
//!
//! A [`Transaction`] owns one dedicated session from the connection's pool
//! until it is committed or rolled back. Both are terminal: every later use
//! fails with a transaction error instead of touching the session.

use crate::db::context::OrmContext;
use crate::db::pool::{ConnectionHandle, DbPool, SqlServerClient};
use crate::db::query::Query;
use crate::error::{DbError, DbResult};
use crate::models::Driver;
use sqlx::{MySql, Postgres, Sqlite};
use std::fmt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Database-specific transaction wrapper.
///
/// This enum wraps database-specific transaction types to provide
/// a unified interface for transaction management.
pub enum DbTransaction {
    /// MySQL transaction
    MySql(sqlx::Transaction<'static, MySql>),
    /// PostgreSQL transaction
    Postgres(sqlx::Transaction<'static, Postgres>),
    /// SQLite transaction
    SQLite(sqlx::Transaction<'static, Sqlite>),
    /// SQL Server session, locked for the lifetime of the transaction
    SqlServer(OwnedMutexGuard<SqlServerClient>),
}

impl DbTransaction {
    /// Begin a transaction on a pooled session.
    pub async fn begin(pool: &DbPool) -> DbResult<Self> {
        match pool {
            DbPool::MySql(p) => Ok(DbTransaction::MySql(p.begin().await?)),
            DbPool::Postgres(p) => Ok(DbTransaction::Postgres(p.begin().await?)),
            DbPool::SQLite(p) => Ok(DbTransaction::SQLite(p.begin().await?)),
            DbPool::SqlServer(client) => {
                let mut guard = client.clone().lock_owned().await;
                // A dropped transaction can leave the shared session mid-transaction
                guard
                    .simple_query("IF @@TRANCOUNT > 0 ROLLBACK TRAN; BEGIN TRAN")
                    .await?
                    .into_results()
                    .await?;
                Ok(DbTransaction::SqlServer(guard))
            }
        }
    }

    /// Get the driver for this transaction.
    pub fn driver(&self) -> Driver {
        match self {
            DbTransaction::MySql(_) => Driver::MySql,
            DbTransaction::Postgres(_) => Driver::PostgreSql,
            DbTransaction::SQLite(_) => Driver::Sqlite,
            DbTransaction::SqlServer(_) => Driver::SqlServer,
        }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SqlServer(mut client) => {
                client.simple_query("COMMIT TRAN").await?.into_results().await?;
                Ok(())
            }
        }
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SqlServer(mut client) => {
                client
                    .simple_query("ROLLBACK TRAN")
                    .await?
                    .into_results()
                    .await?;
                Ok(())
            }
        }
    }
}

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Open => write!(f, "open"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// A transaction on one named connection.
///
/// Queries issued through [`Transaction::query`] run inside the transaction.
/// Requires `&mut` access, so a transaction is never shared between callers.
pub struct Transaction {
    id: String,
    connection: String,
    driver: Driver,
    inner: Option<DbTransaction>,
    state: TransactionState,
    ctx: OrmContext,
}

impl Transaction {
    /// Begin a transaction on the given connection. Fails without creating a
    /// transaction when the session can't be acquired or `BEGIN` fails.
    pub async fn begin(handle: &ConnectionHandle, ctx: &OrmContext) -> DbResult<Self> {
        let inner = ctx.run(DbTransaction::begin(handle.pool())).await?;
        let id = generate_transaction_id();

        info!(
            transaction_id = %id,
            connection = %handle.name(),
            driver = %handle.driver(),
            "Transaction started"
        );

        Ok(Self {
            id,
            connection: handle.name().to_string(),
            driver: handle.driver(),
            inner: Some(inner),
            state: TransactionState::Open,
            ctx: ctx.clone(),
        })
    }

    /// Unique id, used in logs and transaction errors.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the connection the transaction runs on.
    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Start a query that runs inside this transaction.
    pub fn query(&mut self) -> Query<'_> {
        Query::for_transaction(self)
    }

    pub(crate) fn context(&self) -> &OrmContext {
        &self.ctx
    }

    /// The live session, or a transaction error once the transaction has ended.
    pub(crate) fn session(&mut self) -> DbResult<&mut DbTransaction> {
        if self.state != TransactionState::Open {
            return Err(self.ended_error());
        }
        let id = &self.id;
        self.inner
            .as_mut()
            .ok_or_else(|| DbError::transaction("transaction session missing", id))
    }

    fn ended_error(&self) -> DbError {
        DbError::transaction(format!("transaction already {}", self.state), &self.id)
    }

    fn take(&mut self) -> DbResult<DbTransaction> {
        if self.state != TransactionState::Open {
            return Err(self.ended_error());
        }
        self.inner
            .take()
            .ok_or_else(|| DbError::transaction("transaction session missing", &self.id))
    }

    /// Commit. The transaction is terminal afterwards even if the commit fails.
    pub async fn commit(&mut self) -> DbResult<()> {
        let inner = self.take()?;
        self.state = TransactionState::Committed;
        let ctx = self.ctx.clone();
        match ctx.run(inner.commit()).await {
            Ok(()) => {
                info!(transaction_id = %self.id, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(transaction_id = %self.id, error = %e, "Commit failed");
                Err(e)
            }
        }
    }

    /// Roll back. The transaction is terminal afterwards even if the rollback fails.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let inner = self.take()?;
        self.state = TransactionState::RolledBack;
        let ctx = self.ctx.clone();
        match ctx.run(inner.rollback()).await {
            Ok(()) => {
                info!(transaction_id = %self.id, "Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                warn!(transaction_id = %self.id, error = %e, "Rollback failed");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("driver", &self.driver)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.is_some() {
            // sqlx rolls back on drop; tiberius releases the session lock.
            debug!(transaction_id = %self.id, "Open transaction dropped");
        }
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
