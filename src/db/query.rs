//! The chainable query capability.
//!
//! A [`Query`] is bound either to a connection handle or to an open
//! [`Transaction`]; everything below works identically on both. Chain methods
//! take and return the query by value, terminal methods execute immediately
//! and return a [`DbResult`].
//!
//! ```no_run
//! # async fn demo(orm: &ormkit::Orm) -> ormkit::DbResult<()> {
//! use ormkit::params;
//!
//! let names: Vec<String> = orm
//!     .query()
//!     .await?
//!     .table("users")
//!     .where_("age > ?", params![18])
//!     .order("name")
//!     .pluck("name")
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::db::builder::{Builder, Clause, Statement, quote_ident};
use crate::db::context::OrmContext;
use crate::db::executor::{self, ExecResult, Target};
use crate::db::pool::ConnectionHandle;
use crate::db::transaction::Transaction;
use crate::db::types::JsonRow;
use crate::error::{DbError, DbResult};
use crate::models::{Driver, QueryParam};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A database table mapped onto a serde type.
///
/// Rows are decoded by field name, and mutations write every serialized
/// field, so `#[serde(rename)]`/`#[serde(skip)]` control the column mapping.
pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    /// Table name.
    const TABLE: &'static str;

    /// Primary key column. A zero or empty key means "not yet inserted".
    const PRIMARY_KEY: &'static str = "id";

    /// Column that marks a row as soft-deleted. Rows with a non-NULL value
    /// are hidden unless the query calls [`Query::with_trashed`].
    const SOFT_DELETE: Option<&'static str> = None;

    /// Maintain `created_at`/`updated_at` columns on writes. Only fields the
    /// type actually serializes are touched.
    const TIMESTAMPS: bool = false;
}

/// A reusable chain fragment for [`Query::scopes`].
pub type Scope<'c> = fn(Query<'c>) -> Query<'c>;

#[derive(Debug)]
enum Session<'c> {
    Connection(Arc<ConnectionHandle>),
    Transaction(&'c mut Transaction),
}

/// Query bound to a connection or a transaction.
#[derive(Debug)]
pub struct Query<'c> {
    session: Session<'c>,
    ctx: OrmContext,
    builder: Builder,
}

impl Query<'static> {
    pub(crate) fn for_connection(handle: Arc<ConnectionHandle>, ctx: OrmContext) -> Self {
        let builder = Builder::new(handle.driver());
        Self {
            session: Session::Connection(handle),
            ctx,
            builder,
        }
    }
}

impl<'c> Query<'c> {
    pub(crate) fn for_transaction(tx: &'c mut Transaction) -> Self {
        let builder = Builder::new(tx.driver());
        let ctx = tx.context().clone();
        Self {
            session: Session::Transaction(tx),
            ctx,
            builder,
        }
    }

    /// Backend this query runs on.
    pub fn driver(&self) -> Driver {
        self.builder.driver()
    }

    /// Name of the connection this query runs on.
    pub fn connection_name(&self) -> &str {
        match &self.session {
            Session::Connection(handle) => handle.name(),
            Session::Transaction(tx) => tx.connection(),
        }
    }

    /// True when the query runs inside a transaction.
    pub fn in_transaction(&self) -> bool {
        matches!(self.session, Session::Transaction(_))
    }

    /// SQL the query would run for a retrieval terminal such as [`Query::get`].
    pub fn to_sql(&self) -> DbResult<Statement> {
        self.builder.select_statement()
    }

    // ---- chain -------------------------------------------------------------

    /// Add an `AND` condition written with `?` placeholders.
    pub fn where_<I>(mut self, condition: &str, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<QueryParam>,
    {
        self.builder
            .push_where(Clause::new(condition, collect_params(args)));
        self
    }

    /// Add an `OR` condition written with `?` placeholders.
    pub fn or_where<I>(mut self, condition: &str, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<QueryParam>,
    {
        self.builder
            .push_or_where(Clause::new(condition, collect_params(args)));
        self
    }

    pub fn having<I>(mut self, condition: &str, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<QueryParam>,
    {
        self.builder
            .push_having(Clause::new(condition, collect_params(args)));
        self
    }

    /// Restrict the projection. Columns are passed through as written.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            self.builder.push_select(column.into());
        }
        self
    }

    pub fn distinct(mut self) -> Self {
        self.builder.set_distinct();
        self
    }

    /// Append an ordering, e.g. `"created_at desc"`.
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.builder.push_order(order.into());
        self
    }

    pub fn group(mut self, column: impl Into<String>) -> Self {
        self.builder.push_group(column.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.builder.set_limit(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.builder.set_offset(offset);
        self
    }

    /// Append a join clause, e.g. `"LEFT JOIN accounts ON accounts.user_id = users.id"`.
    pub fn join<I>(mut self, clause: &str, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<QueryParam>,
    {
        self.builder
            .push_join(Clause::new(clause, collect_params(args)));
        self
    }

    /// Apply reusable chain fragments in order.
    pub fn scopes<I>(self, scopes: I) -> Self
    where
        I: IntoIterator<Item = Scope<'c>>,
    {
        scopes.into_iter().fold(self, |query, scope| scope(query))
    }

    /// Target a table by name.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.builder.set_table(name);
        self
    }

    /// Target the table of model `M`, with its primary key and soft-delete column.
    pub fn model<M: Model>(mut self) -> Self {
        self.builder
            .set_model(M::TABLE, M::PRIMARY_KEY, M::SOFT_DELETE);
        self.builder.set_timestamps(M::TIMESTAMPS);
        self
    }

    /// Include soft-deleted rows. A delete on such a query is permanent.
    pub fn with_trashed(mut self) -> Self {
        self.builder.set_with_trashed();
        self
    }

    /// Replace the generated SELECT with hand-written SQL. Retrieval
    /// terminals ([`Query::scan`], [`Query::count`], ...) run it as is.
    pub fn raw<I>(mut self, sql: &str, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<QueryParam>,
    {
        self.builder.set_raw(Clause::new(sql, collect_params(args)));
        self
    }

    // ---- retrieval ---------------------------------------------------------

    /// Find a row by primary key. `Ok(None)` when no row matches.
    pub async fn find<M: Model>(mut self, id: impl Into<QueryParam>) -> DbResult<Option<M>> {
        self.adopt::<M>();
        let pk = self.primary_key();
        self.push_key(&pk, id.into());
        self.builder.set_limit(1);
        let statement = self.builder.select_statement()?;
        let rows = self.fetch(&statement).await?;
        rows.into_iter().next().map(from_row).transpose()
    }

    /// First row ordered by primary key (unless the chain orders).
    /// [`DbError::RecordNotFound`] when nothing matches.
    pub async fn first<M: Model>(mut self) -> DbResult<M> {
        self.adopt::<M>();
        let table = self.builder.table().unwrap_or(M::TABLE).to_string();
        match self.first_row().await? {
            Some(row) => from_row(row),
            None => Err(DbError::record_not_found(table)),
        }
    }

    /// All matching rows.
    pub async fn get<M: Model>(mut self) -> DbResult<Vec<M>> {
        self.adopt::<M>();
        let statement = self.builder.select_statement()?;
        self.fetch(&statement)
            .await?
            .into_iter()
            .map(from_row)
            .collect()
    }

    /// All result rows decoded into any deserializable type, for projections
    /// and raw statements.
    pub async fn scan<T: DeserializeOwned>(mut self) -> DbResult<Vec<T>> {
        let statement = self.builder.select_statement()?;
        self.fetch(&statement)
            .await?
            .into_iter()
            .map(from_row)
            .collect()
    }

    pub async fn count(mut self) -> DbResult<i64> {
        let statement = self.builder.count_statement()?;
        let rows = self.fetch(&statement).await?;
        let value = rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next().map(|(_, v)| v))
            .unwrap_or(JsonValue::from(0));
        let count = match &value {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        };
        count.ok_or_else(|| DbError::internal(format!("unexpected count value: {}", value)))
    }

    /// Values of one column.
    pub async fn pluck<T: DeserializeOwned>(mut self, column: &str) -> DbResult<Vec<T>> {
        self.builder.set_select(vec![column.to_string()]);
        let statement = self.builder.select_statement()?;
        self.fetch(&statement)
            .await?
            .into_iter()
            .map(|row| {
                let value = row.into_iter().next().map(|(_, v)| v).unwrap_or_default();
                serde_json::from_value(value).map_err(|e| {
                    DbError::internal(format!("failed to decode column {}: {}", column, e))
                })
            })
            .collect()
    }

    // ---- mutation ----------------------------------------------------------

    /// Insert `value`. A zero primary key is left to the database and the
    /// generated key is written back into `value`.
    pub async fn create<M: Model>(mut self, value: &mut M) -> DbResult<()> {
        self.adopt::<M>();
        let pk = self.primary_key();
        let mut row = to_row(value)?;
        let key_unset = row
            .get(&pk)
            .map(|v| QueryParam::from_json(v.clone()).is_zero_key())
            .unwrap_or(true);
        if self.builder.timestamps() {
            stamp(&mut row, "created_at");
            stamp(&mut row, "updated_at");
        }

        let values: Vec<(String, QueryParam)> = row
            .iter()
            .filter(|(column, _)| !(key_unset && **column == pk))
            .map(|(column, v)| (column.clone(), QueryParam::from_json(v.clone())))
            .collect();
        let returning = key_unset.then_some(pk.as_str());
        let statement = self.builder.insert_statement(values, returning)?;

        let generated = match (returning, self.driver()) {
            (Some(_), Driver::PostgreSql | Driver::SqlServer) => self
                .fetch(&statement)
                .await?
                .into_iter()
                .next()
                .and_then(|mut r| r.remove(&pk)),
            (Some(_), _) => self
                .execute(&statement)
                .await?
                .last_insert_id
                .map(JsonValue::from),
            (None, _) => {
                self.execute(&statement).await?;
                None
            }
        };

        if let Some(id) = generated {
            row.insert(pk, id);
        }
        *value = from_row(row)?;
        Ok(())
    }

    /// Insert `value` when its primary key is zero, otherwise update every
    /// column of the row with that key.
    pub async fn save<M: Model>(mut self, value: &mut M) -> DbResult<()> {
        self.adopt::<M>();
        let pk = self.primary_key();
        let mut row = to_row(value)?;
        let key = row
            .get(&pk)
            .map(|v| QueryParam::from_json(v.clone()))
            .unwrap_or(QueryParam::Null);
        if key.is_zero_key() {
            return self.create(value).await;
        }

        if self.builder.timestamps() {
            stamp(&mut row, "updated_at");
        }
        let sets: Vec<(String, QueryParam)> = row
            .iter()
            .filter(|(column, _)| **column != pk)
            .map(|(column, v)| (column.clone(), QueryParam::from_json(v.clone())))
            .collect();
        self.push_key(&pk, key);
        let statement = self.builder.update_statement(sets)?;
        self.execute(&statement).await?;
        *value = from_row(row)?;
        Ok(())
    }

    /// Set one column on every matching row. Returns the affected row count.
    pub async fn update(
        mut self,
        column: &str,
        value: impl Into<QueryParam>,
    ) -> DbResult<u64> {
        let mut sets = vec![(column.to_string(), value.into())];
        if self.builder.timestamps() && column != "updated_at" {
            sets.push(("updated_at".to_string(), QueryParam::Timestamp(Utc::now())));
        }
        self.require_conditions("update")?;
        let statement = self.builder.update_statement(sets)?;
        Ok(self.execute(&statement).await?.rows_affected)
    }

    /// Set several columns from a serializable map or struct. A primary key
    /// field in `values` restricts the update to that row.
    pub async fn updates<U: Serialize>(mut self, values: &U) -> DbResult<u64> {
        let mut row = to_row(values)?;
        if let Some(pk) = self.builder.primary_key().map(str::to_string) {
            if let Some(key) = row.remove(&pk).map(QueryParam::from_json) {
                if !key.is_zero_key() {
                    self.push_key(&pk, key);
                }
            }
        }
        self.require_conditions("updates")?;
        let stamp_updated = self.builder.timestamps() && !row.contains_key("updated_at");
        let mut sets: Vec<(String, QueryParam)> = row
            .into_iter()
            .map(|(column, v)| (column, QueryParam::from_json(v)))
            .collect();
        if stamp_updated {
            sets.push(("updated_at".to_string(), QueryParam::Timestamp(Utc::now())));
        }
        let statement = self.builder.update_statement(sets)?;
        Ok(self.execute(&statement).await?.rows_affected)
    }

    /// Delete `value` (by primary key) or, with a zero key, every row the
    /// chain's conditions match. Models with a soft-delete column are
    /// stamped instead of removed.
    pub async fn delete<M: Model>(mut self, value: &M) -> DbResult<u64> {
        self.adopt::<M>();
        self.push_key_condition(value)?;
        self.require_conditions("delete")?;
        let statement = match self.builder.soft_delete_column() {
            Some(column) if !self.builder.with_trashed() => self.builder.update_statement(vec![(
                column.to_string(),
                QueryParam::Timestamp(Utc::now()),
            )])?,
            _ => self.builder.delete_statement()?,
        };
        Ok(self.execute(&statement).await?.rows_affected)
    }

    /// Permanently delete, ignoring the soft-delete column.
    pub async fn force_delete<M: Model>(mut self, value: &M) -> DbResult<u64> {
        self.adopt::<M>();
        self.push_key_condition(value)?;
        self.require_conditions("force_delete")?;
        let statement = self.builder.delete_statement()?;
        Ok(self.execute(&statement).await?.rows_affected)
    }

    /// Load the first row matching the chain into `value`, or insert `value`
    /// when none matches. Returns `true` when a row was created.
    pub async fn first_or_create<M: Model>(mut self, value: &mut M) -> DbResult<bool> {
        self.adopt::<M>();
        if let Some(row) = self.first_row().await? {
            *value = from_row(row)?;
            return Ok(false);
        }
        self.create(value).await?;
        Ok(true)
    }

    /// Run a statement that returns no rows. Returns the affected row count.
    pub async fn exec<I>(mut self, sql: &str, args: I) -> DbResult<u64>
    where
        I: IntoIterator,
        I::Item: Into<QueryParam>,
    {
        let statement = Statement {
            sql: crate::db::builder::rewrite_placeholders(self.driver(), sql),
            params: collect_params(args),
        };
        Ok(self.execute(&statement).await?.rows_affected)
    }

    /// Begin a transaction on this query's connection.
    pub async fn begin(self) -> DbResult<Transaction> {
        match self.session {
            Session::Connection(handle) => Transaction::begin(&handle, &self.ctx).await,
            Session::Transaction(tx) => Err(DbError::transaction(
                "nested transactions are not supported",
                tx.id(),
            )),
        }
    }

    // ---- internals ---------------------------------------------------------

    fn adopt<M: Model>(&mut self) {
        self.builder
            .adopt_model(M::TABLE, M::PRIMARY_KEY, M::SOFT_DELETE, M::TIMESTAMPS);
    }

    fn primary_key(&self) -> String {
        self.builder.primary_key().unwrap_or("id").to_string()
    }

    fn push_key(&mut self, pk: &str, key: QueryParam) {
        let condition = format!("{} = ?", quote_ident(self.driver(), pk));
        self.builder.push_key_where(Clause::new(condition, vec![key]));
    }

    fn require_conditions(&self, operation: &str) -> DbResult<()> {
        if self.builder.has_conditions() {
            Ok(())
        } else {
            Err(DbError::invalid_input(format!(
                "{} without conditions would touch every row; add a where clause or a primary key",
                operation
            )))
        }
    }

    fn push_key_condition<M: Model>(&mut self, value: &M) -> DbResult<()> {
        let pk = self.primary_key();
        let key = to_row(value)?
            .remove(&pk)
            .map(QueryParam::from_json)
            .unwrap_or(QueryParam::Null);
        if !key.is_zero_key() {
            self.push_key(&pk, key);
        }
        Ok(())
    }

    async fn first_row(&mut self) -> DbResult<Option<JsonRow>> {
        let mut lookup = self.builder.clone();
        if !lookup.has_order() {
            if let Some(pk) = lookup.primary_key().map(str::to_string) {
                lookup.push_order(quote_ident(lookup.driver(), &pk));
            }
        }
        lookup.set_limit(1);
        let statement = lookup.select_statement()?;
        Ok(self.fetch(&statement).await?.into_iter().next())
    }

    async fn fetch(&mut self, statement: &Statement) -> DbResult<Vec<JsonRow>> {
        match &mut self.session {
            Session::Connection(handle) => {
                let target = Target::Pool(handle.pool());
                self.ctx
                    .run(executor::fetch_rows(target, &statement.sql, &statement.params))
                    .await
            }
            Session::Transaction(tx) => {
                let target = Target::Transaction(tx.session()?);
                self.ctx
                    .run(executor::fetch_rows(target, &statement.sql, &statement.params))
                    .await
            }
        }
    }

    async fn execute(&mut self, statement: &Statement) -> DbResult<ExecResult> {
        match &mut self.session {
            Session::Connection(handle) => {
                let target = Target::Pool(handle.pool());
                self.ctx
                    .run(executor::execute(target, &statement.sql, &statement.params))
                    .await
            }
            Session::Transaction(tx) => {
                let target = Target::Transaction(tx.session()?);
                self.ctx
                    .run(executor::execute(target, &statement.sql, &statement.params))
                    .await
            }
        }
    }
}

fn collect_params<I>(args: I) -> Vec<QueryParam>
where
    I: IntoIterator,
    I::Item: Into<QueryParam>,
{
    args.into_iter().map(Into::into).collect()
}

fn to_row<T: Serialize + ?Sized>(value: &T) -> DbResult<JsonRow> {
    match serde_json::to_value(value)? {
        JsonValue::Object(row) => Ok(row),
        other => Err(DbError::invalid_input(format!(
            "expected a struct or map, got {}",
            other
        ))),
    }
}

fn from_row<T: DeserializeOwned>(row: JsonRow) -> DbResult<T> {
    serde_json::from_value(JsonValue::Object(row))
        .map_err(|e| DbError::internal(format!("failed to decode row: {}", e)))
}

/// Set a timestamp column to now, if the row has that column.
fn stamp(row: &mut JsonRow, column: &str) {
    if let Some(value) = row.get_mut(column) {
        if column != "created_at" || value.is_null() {
            *value = JsonValue::String(Utc::now().to_rfc3339());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::DbPool;
    use crate::params;
    use serde::Deserialize;
    use sqlx::sqlite::SqlitePoolOptions;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag {
        id: i64,
        name: String,
    }

    impl Model for Tag {
        const TABLE: &'static str = "tags";
    }

    async fn query() -> Query<'static> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        let handle = Arc::new(ConnectionHandle::new("sqlite", DbPool::SQLite(pool)));
        Query::for_connection(handle, OrmContext::background())
    }

    fn fork(query: &Query<'static>) -> Query<'static> {
        match &query.session {
            Session::Connection(handle) => {
                Query::for_connection(Arc::clone(handle), OrmContext::background())
            }
            Session::Transaction(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_create_writes_back_key() {
        let base = query().await;
        let mut tag = Tag {
            id: 0,
            name: "rust".to_string(),
        };
        fork(&base).create(&mut tag).await.unwrap();
        assert_eq!(tag.id, 1);

        let found: Option<Tag> = fork(&base).find(1).await.unwrap();
        assert_eq!(found, Some(tag));
        let missing: Option<Tag> = fork(&base).find(99).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_first_not_found() {
        let base = query().await;
        let err = fork(&base).first::<Tag>().await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("tags"));
    }

    #[tokio::test]
    async fn test_update_requires_conditions() {
        let base = query().await;
        let err = fork(&base)
            .table("tags")
            .update("name", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_to_sql_and_driver() {
        let base = query().await;
        let q = fork(&base)
            .model::<Tag>()
            .where_("name = ?", params!["x"])
            .limit(2);
        assert_eq!(q.driver(), Driver::Sqlite);
        assert_eq!(q.connection_name(), "sqlite");
        assert!(!q.in_transaction());
        assert_eq!(
            q.to_sql().unwrap().sql,
            "SELECT * FROM \"tags\" WHERE name = ? LIMIT 2"
        );
    }

    #[test]
    fn test_stamp_only_existing_columns() {
        let mut row = JsonRow::new();
        row.insert("created_at".to_string(), JsonValue::Null);
        stamp(&mut row, "created_at");
        stamp(&mut row, "updated_at");
        assert!(row["created_at"].is_string());
        assert!(!row.contains_key("updated_at"));
    }

    #[test]
    fn test_to_row_rejects_scalars() {
        assert!(to_row(&5).is_err());
        assert!(to_row(&serde_json::json!({"a": 1})).is_ok());
    }
}
