//! Statement execution.
//!
//! Rendered SQL and its parameters run against a [`Target`]: either a pooled
//! session or an open transaction. Results come back as JSON rows (see
//! [`crate::db::types`]) or as an [`ExecResult`] for writes.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`, `postgres`, `sqlite`: generic over the sqlx executor, so the same
//!   code serves a pool and a transaction connection
//! - `sqlserver`: tiberius client calls
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use crate::db::params::{
    bind_mysql_param, bind_postgres_param, bind_sqlite_param, bind_sqlserver_param,
};
use crate::db::pool::DbPool;
use crate::db::transaction::DbTransaction;
use crate::db::types::{JsonRow, RowToJson};
use crate::error::DbResult;
use crate::models::QueryParam;
use tracing::debug;

/// Where a statement runs.
pub enum Target<'a> {
    Pool(&'a DbPool),
    Transaction(&'a mut DbTransaction),
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Auto-increment id reported by MySQL and SQLite. Other drivers return
    /// generated keys through `RETURNING`/`OUTPUT` rows instead.
    pub last_insert_id: Option<i64>,
}

/// Run a statement and decode every returned row.
pub async fn fetch_rows(
    target: Target<'_>,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<Vec<JsonRow>> {
    debug!(sql = %sql, params = params.len(), "Executing query");

    match target {
        Target::Pool(DbPool::MySql(p)) => mysql::fetch_rows(p, sql, params).await,
        Target::Pool(DbPool::Postgres(p)) => postgres::fetch_rows(p, sql, params).await,
        Target::Pool(DbPool::SQLite(p)) => sqlite::fetch_rows(p, sql, params).await,
        Target::Pool(DbPool::SqlServer(client)) => {
            let mut client = client.lock().await;
            sqlserver::fetch_rows(&mut client, sql, params).await
        }
        Target::Transaction(DbTransaction::MySql(tx)) => {
            mysql::fetch_rows(&mut **tx, sql, params).await
        }
        Target::Transaction(DbTransaction::Postgres(tx)) => {
            postgres::fetch_rows(&mut **tx, sql, params).await
        }
        Target::Transaction(DbTransaction::SQLite(tx)) => {
            sqlite::fetch_rows(&mut **tx, sql, params).await
        }
        Target::Transaction(DbTransaction::SqlServer(client)) => {
            sqlserver::fetch_rows(client, sql, params).await
        }
    }
}

/// Run a write statement (INSERT, UPDATE, DELETE, DDL).
pub async fn execute(target: Target<'_>, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
    debug!(sql = %sql, params = params.len(), "Executing write operation");

    match target {
        Target::Pool(DbPool::MySql(p)) => mysql::execute(p, sql, params).await,
        Target::Pool(DbPool::Postgres(p)) => postgres::execute(p, sql, params).await,
        Target::Pool(DbPool::SQLite(p)) => sqlite::execute(p, sql, params).await,
        Target::Pool(DbPool::SqlServer(client)) => {
            let mut client = client.lock().await;
            sqlserver::execute(&mut client, sql, params).await
        }
        Target::Transaction(DbTransaction::MySql(tx)) => mysql::execute(&mut **tx, sql, params).await,
        Target::Transaction(DbTransaction::Postgres(tx)) => {
            postgres::execute(&mut **tx, sql, params).await
        }
        Target::Transaction(DbTransaction::SQLite(tx)) => {
            sqlite::execute(&mut **tx, sql, params).await
        }
        Target::Transaction(DbTransaction::SqlServer(client)) => {
            sqlserver::execute(client, sql, params).await
        }
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::{Executor, MySql};

    pub async fn fetch_rows<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>>
    where
        E: Executor<'c, Database = MySql>,
    {
        // When params is empty, use raw SQL to avoid prepared statement issues
        let rows = if params.is_empty() {
            executor.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch_all(executor).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult>
    where
        E: Executor<'c, Database = MySql>,
    {
        // Some statements (CREATE PROCEDURE, ...) can't be prepared
        let result = if params.is_empty() {
            executor.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.execute(executor).await?
        };
        let last_insert_id = match result.last_insert_id() {
            0 => None,
            id => i64::try_from(id).ok(),
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id,
        })
    }
}

mod postgres {
    use super::*;
    use sqlx::{Executor, Postgres};

    pub async fn fetch_rows<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let rows = if params.is_empty() {
            executor.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.fetch_all(executor).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let result = if params.is_empty() {
            executor.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.execute(executor).await?
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Executor, Sqlite};

    pub async fn fetch_rows<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let rows = if params.is_empty() {
            executor.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch_all(executor).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let result = if params.is_empty() {
            executor.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(executor).await?
        };
        let last_insert_id = match result.last_insert_rowid() {
            0 => None,
            id => Some(id),
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id,
        })
    }
}

mod sqlserver {
    use super::*;
    use crate::db::pool::SqlServerClient;

    pub async fn fetch_rows(
        client: &mut SqlServerClient,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        let mut query = tiberius::Query::new(sql);
        for param in params {
            bind_sqlserver_param(&mut query, param);
        }
        let rows = query.query(client).await?.into_first_result().await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute(
        client: &mut SqlServerClient,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        let mut query = tiberius::Query::new(sql);
        for param in params {
            bind_sqlserver_param(&mut query, param);
        }
        let result = query.execute(client).await?;
        Ok(ExecResult {
            rows_affected: result.total(),
            last_insert_id: None,
        })
    }
}
