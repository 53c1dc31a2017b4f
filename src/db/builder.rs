//! SQL rendering for the query builder.
//!
//! [`Builder`] accumulates the chainable state of a [`Query`](crate::db::Query)
//! and renders it into a [`Statement`] for one driver. Conditions are written
//! with `?` placeholders whatever the driver; rendering rewrites them to `$n`
//! for PostgreSQL and `@Pn` for SQL Server, and quotes identifiers the builder
//! generates itself (table, primary key, mutation columns). User-written
//! fragments (conditions, projections, ordering) are passed through.

use crate::error::{DbError, DbResult};
use crate::models::{Driver, QueryParam};

/// Rendered SQL with its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// A SQL fragment and the parameters for its `?` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Clause {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl Clause {
    pub fn new(sql: impl Into<String>, params: Vec<QueryParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conjunction {
    And,
    Or,
}

/// Accumulated query state.
#[derive(Debug, Clone)]
pub(crate) struct Builder {
    driver: Driver,
    table: Option<String>,
    primary_key: Option<String>,
    soft_delete: Option<String>,
    timestamps: bool,
    with_trashed: bool,
    selects: Vec<String>,
    distinct: bool,
    joins: Vec<Clause>,
    wheres: Vec<(Conjunction, Clause)>,
    keys: Vec<Clause>,
    groups: Vec<String>,
    havings: Vec<Clause>,
    orders: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    raw: Option<Clause>,
}

impl Builder {
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            table: None,
            primary_key: None,
            soft_delete: None,
            timestamps: false,
            with_trashed: false,
            selects: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            wheres: Vec::new(),
            keys: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            raw: None,
        }
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    // ---- chain state -------------------------------------------------------

    pub fn set_table(&mut self, table: impl Into<String>) {
        self.table = Some(table.into());
    }

    pub fn set_model(&mut self, table: &str, primary_key: &str, soft_delete: Option<&str>) {
        self.table = Some(table.to_string());
        self.primary_key = Some(primary_key.to_string());
        self.soft_delete = soft_delete.map(str::to_string);
    }

    /// Take model metadata for whatever the chain hasn't set explicitly.
    /// A table chosen with `table()` is kept.
    pub fn adopt_model(
        &mut self,
        table: &str,
        primary_key: &str,
        soft_delete: Option<&str>,
        timestamps: bool,
    ) {
        if self.primary_key.is_none() {
            self.primary_key = Some(primary_key.to_string());
            self.soft_delete = soft_delete.map(str::to_string);
            self.timestamps = timestamps;
        }
        if self.table.is_none() {
            self.table = Some(table.to_string());
        }
    }

    pub fn set_timestamps(&mut self, timestamps: bool) {
        self.timestamps = timestamps;
    }

    pub fn timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete.as_deref()
    }

    pub fn set_with_trashed(&mut self) {
        self.with_trashed = true;
    }

    pub fn with_trashed(&self) -> bool {
        self.with_trashed
    }

    /// Replace the projection.
    pub fn set_select(&mut self, columns: Vec<String>) {
        self.selects = columns;
    }

    pub fn push_select(&mut self, column: String) {
        self.selects.push(column);
    }

    pub fn set_distinct(&mut self) {
        self.distinct = true;
    }

    pub fn push_join(&mut self, clause: Clause) {
        self.joins.push(clause);
    }

    pub fn push_where(&mut self, clause: Clause) {
        self.wheres.push((Conjunction::And, clause));
    }

    pub fn push_or_where(&mut self, clause: Clause) {
        self.wheres.push((Conjunction::Or, clause));
    }

    /// Restrict to one row. Key conditions are ANDed onto the whole user
    /// condition group, so an earlier `or_where` can't widen them.
    pub fn push_key_where(&mut self, clause: Clause) {
        self.keys.push(clause);
    }

    pub fn has_conditions(&self) -> bool {
        !self.wheres.is_empty() || !self.keys.is_empty()
    }

    pub fn push_group(&mut self, column: String) {
        self.groups.push(column);
    }

    pub fn push_having(&mut self, clause: Clause) {
        self.havings.push(clause);
    }

    pub fn push_order(&mut self, order: String) {
        self.orders.push(order);
    }

    pub fn has_order(&self) -> bool {
        !self.orders.is_empty()
    }

    pub fn set_limit(&mut self, limit: u64) {
        self.limit = Some(limit);
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    pub fn set_raw(&mut self, clause: Clause) {
        self.raw = Some(clause);
    }

    // ---- rendering ---------------------------------------------------------

    fn require_table(&self) -> DbResult<String> {
        self.table
            .as_deref()
            .map(|t| quote_ident(self.driver, t))
            .ok_or_else(|| DbError::invalid_input("no table for query; call table() or model()"))
    }

    /// `SELECT ...` for retrieval terminals.
    pub fn select_statement(&self) -> DbResult<Statement> {
        if let Some(raw) = &self.raw {
            return Ok(self.finish(raw.sql.clone(), raw.params.clone()));
        }
        let mut params = Vec::new();
        let mut sql = self.select_body(&mut params)?;
        self.push_order_and_paging(&mut sql);
        Ok(self.finish(sql, params))
    }

    /// `SELECT COUNT(*) AS count ...`, ignoring ordering and paging.
    pub fn count_statement(&self) -> DbResult<Statement> {
        let mut params = Vec::new();
        let sql = if let Some(raw) = &self.raw {
            params.extend(raw.params.iter().cloned());
            format!("SELECT COUNT(*) AS count FROM ({}) AS t", raw.sql)
        } else if self.distinct || !self.groups.is_empty() {
            let inner = self.select_body(&mut params)?;
            format!("SELECT COUNT(*) AS count FROM ({}) AS t", inner)
        } else {
            let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.require_table()?);
            self.push_joins(&mut sql, &mut params);
            self.push_where_clause(&mut sql, &mut params);
            sql
        };
        Ok(self.finish(sql, params))
    }

    /// `INSERT` of one row. With `returning`, the statement also yields the
    /// primary key (`RETURNING` on PostgreSQL, `OUTPUT INSERTED` on SQL Server).
    pub fn insert_statement(
        &self,
        values: Vec<(String, QueryParam)>,
        returning: Option<&str>,
    ) -> DbResult<Statement> {
        let table = self.require_table()?;
        let output = match (self.driver, returning) {
            (Driver::SqlServer, Some(pk)) => {
                format!(" OUTPUT INSERTED.{}", quote_ident(self.driver, pk))
            }
            _ => String::new(),
        };

        let mut sql = if values.is_empty() {
            match self.driver {
                Driver::MySql => format!("INSERT INTO {} () VALUES ()", table),
                _ => format!("INSERT INTO {}{} DEFAULT VALUES", table, output),
            }
        } else {
            let columns: Vec<String> = values
                .iter()
                .map(|(column, _)| quote_ident(self.driver, column))
                .collect();
            let placeholders = vec!["?"; values.len()].join(", ");
            format!(
                "INSERT INTO {} ({}){} VALUES ({})",
                table,
                columns.join(", "),
                output,
                placeholders
            )
        };

        if let (Driver::PostgreSql, Some(pk)) = (self.driver, returning) {
            sql.push_str(&format!(" RETURNING {}", quote_ident(self.driver, pk)));
        }

        let params = values.into_iter().map(|(_, value)| value).collect();
        Ok(self.finish(sql, params))
    }

    /// `UPDATE ... SET` restricted by the accumulated conditions.
    pub fn update_statement(&self, sets: Vec<(String, QueryParam)>) -> DbResult<Statement> {
        if sets.is_empty() {
            return Err(DbError::invalid_input("no columns to update"));
        }
        let mut params = Vec::new();
        let assignments: Vec<String> = sets
            .into_iter()
            .map(|(column, value)| {
                params.push(value);
                format!("{} = ?", quote_ident(self.driver, &column))
            })
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.require_table()?,
            assignments.join(", ")
        );
        self.push_where_clause(&mut sql, &mut params);
        Ok(self.finish(sql, params))
    }

    /// `DELETE` restricted by the accumulated conditions. Rows already
    /// soft-deleted are matched too.
    pub fn delete_statement(&self) -> DbResult<Statement> {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.require_table()?);
        let conditions = self.conditions(&mut params, false);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions);
        }
        Ok(self.finish(sql, params))
    }

    fn select_body(&self, params: &mut Vec<QueryParam>) -> DbResult<String> {
        let columns = if self.selects.is_empty() {
            "*".to_string()
        } else {
            self.selects.join(", ")
        };
        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if self.distinct { "DISTINCT " } else { "" },
            columns,
            self.require_table()?
        );
        self.push_joins(&mut sql, params);
        self.push_where_clause(&mut sql, params);
        if !self.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.groups.join(", "));
        }
        if !self.havings.is_empty() {
            let parts: Vec<String> = self
                .havings
                .iter()
                .map(|clause| {
                    params.extend(clause.params.iter().cloned());
                    wrap_compound(&clause.sql)
                })
                .collect();
            sql.push_str(" HAVING ");
            sql.push_str(&parts.join(" AND "));
        }
        Ok(sql)
    }

    fn push_joins(&self, sql: &mut String, params: &mut Vec<QueryParam>) {
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.sql);
            params.extend(join.params.iter().cloned());
        }
    }

    fn user_conditions(&self, params: &mut Vec<QueryParam>) -> String {
        let mut out = String::new();
        for (i, (conjunction, clause)) in self.wheres.iter().enumerate() {
            if i > 0 {
                out.push_str(match conjunction {
                    Conjunction::And => " AND ",
                    Conjunction::Or => " OR ",
                });
            }
            out.push_str(&wrap_compound(&clause.sql));
            params.extend(clause.params.iter().cloned());
        }
        out
    }

    /// User conditions, then key conditions, then (with `soft_filter`) the
    /// soft-delete filter, all joined with AND.
    fn conditions(&self, params: &mut Vec<QueryParam>, soft_filter: bool) -> String {
        let user = self.user_conditions(params);
        let mut extra: Vec<String> = self
            .keys
            .iter()
            .map(|key| {
                params.extend(key.params.iter().cloned());
                wrap_compound(&key.sql)
            })
            .collect();
        if soft_filter && !self.with_trashed {
            if let Some(column) = self.soft_delete.as_deref() {
                extra.push(format!("{} IS NULL", quote_ident(self.driver, column)));
            }
        }
        if extra.is_empty() {
            return user;
        }

        let mut parts = Vec::with_capacity(extra.len() + 1);
        if !user.is_empty() {
            if self.wheres.iter().any(|(c, _)| *c == Conjunction::Or) {
                parts.push(format!("({})", user));
            } else {
                parts.push(user);
            }
        }
        parts.extend(extra);
        parts.join(" AND ")
    }

    fn push_where_clause(&self, sql: &mut String, params: &mut Vec<QueryParam>) {
        let conditions = self.conditions(params, true);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions);
        }
    }

    fn push_order_and_paging(&self, sql: &mut String) {
        let paged = self.limit.is_some() || self.offset.is_some();
        if !self.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.orders.join(", "));
        } else if paged && self.driver == Driver::SqlServer {
            // OFFSET/FETCH is only valid after ORDER BY
            sql.push_str(" ORDER BY (SELECT NULL)");
        }

        match self.driver {
            Driver::SqlServer => {
                if paged {
                    sql.push_str(&format!(" OFFSET {} ROWS", self.offset.unwrap_or(0)));
                    if let Some(limit) = self.limit {
                        sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                    }
                }
            }
            driver => {
                match (self.limit, self.offset) {
                    (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
                    // MySQL and SQLite only accept OFFSET after LIMIT
                    (None, Some(_)) if driver == Driver::MySql => {
                        sql.push_str(" LIMIT 18446744073709551615")
                    }
                    (None, Some(_)) if driver == Driver::Sqlite => sql.push_str(" LIMIT -1"),
                    _ => {}
                }
                if let Some(offset) = self.offset {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
            }
        }
    }

    fn finish(&self, sql: String, params: Vec<QueryParam>) -> Statement {
        Statement {
            sql: rewrite_placeholders(self.driver, &sql),
            params,
        }
    }
}

/// Parenthesize a condition that combines several predicates, so chaining
/// keeps its meaning.
fn wrap_compound(condition: &str) -> String {
    let lower = condition.to_lowercase();
    let compound = lower
        .split_whitespace()
        .any(|word| word == "or" || word == "and");
    if compound && !lower.contains(" between ") {
        format!("({})", condition)
    } else {
        condition.to_string()
    }
}

/// Quote a simple identifier (optionally `schema.table`) for the driver.
/// Anything that isn't a plain identifier is returned unchanged.
pub fn quote_ident(driver: Driver, ident: &str) -> String {
    let plain = |part: &str| {
        !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    if !ident.split('.').all(plain) {
        return ident.to_string();
    }
    ident
        .split('.')
        .map(|part| match driver {
            Driver::MySql => format!("`{}`", part),
            Driver::SqlServer => format!("[{}]", part),
            Driver::PostgreSql | Driver::Sqlite => format!("\"{}\"", part),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Rewrite `?` placeholders into the driver's native form. Question marks
/// inside quoted strings or identifiers are left alone.
pub fn rewrite_placeholders(driver: Driver, sql: &str) -> String {
    let native = |n: usize| match driver {
        Driver::PostgreSql => Some(format!("${}", n)),
        Driver::SqlServer => Some(format!("@P{}", n)),
        Driver::MySql | Driver::Sqlite => None,
    };
    if native(1).is_none() {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut n = 0;
    for c in sql.chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                '[' if driver == Driver::SqlServer => {
                    quote = Some(']');
                    out.push(c);
                }
                '?' => {
                    n += 1;
                    if let Some(placeholder) = native(n) {
                        out.push_str(&placeholder);
                    }
                }
                _ => out.push(c),
            },
        }
    }
    out
}
