//! Binding of [`QueryParam`] values onto driver queries.
//!
//! Every statement the executor issues, on a pool or inside a transaction,
//! binds its arguments through one of these functions. The sqlx binders differ
//! only in argument type and in how JSON travels, so one macro stamps them out.

use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

macro_rules! sqlx_binder {
    ($(#[$doc:meta])* $name:ident<$q:lifetime>, $db:ty, $args:ty, |$json:ident| $bind_json:expr) => {
        $(#[$doc])*
        pub(crate) fn $name<$q>(
            query: sqlx::query::Query<$q, $db, $args>,
            param: &$q QueryParam,
        ) -> sqlx::query::Query<$q, $db, $args> {
            match param {
                QueryParam::Null => query.bind(None::<String>),
                QueryParam::Bool(v) => query.bind(*v),
                QueryParam::Int(v) => query.bind(*v),
                QueryParam::Float(v) => query.bind(*v),
                QueryParam::String(v) => query.bind(v.as_str()),
                QueryParam::Timestamp(v) => query.bind(*v),
                QueryParam::Bytes(v) => query.bind(v.as_slice()),
                QueryParam::Json($json) => query.bind($bind_json),
            }
        }
    };
}

sqlx_binder!(
    /// Bind onto a MySQL query; JSON goes out as a JSON column value.
    bind_mysql_param<'q>, MySql, MySqlArguments, |v| Json(v)
);

sqlx_binder!(
    /// Bind onto a PostgreSQL query; JSON goes out as `jsonb`.
    bind_postgres_param<'q>, Postgres, PgArguments, |v| Json(v)
);

sqlx_binder!(
    /// Bind onto a SQLite query. SQLite has no JSON type, so JSON is stored as text.
    bind_sqlite_param<'q>, Sqlite, SqliteArguments<'q>, |v| v.to_string()
);

/// Bind onto a SQL Server query. tiberius binds in place.
pub(crate) fn bind_sqlserver_param<'q>(query: &mut tiberius::Query<'q>, param: &'q QueryParam) {
    match param {
        QueryParam::Null => query.bind(Option::<&str>::None),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Timestamp(v) => query.bind(*v),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}
