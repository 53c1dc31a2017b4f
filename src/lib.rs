//! ormkit
//!
//! Multi-driver ORM connection core: named connections resolved from
//! configuration, lazily established and cached per [`Orm`], a one-shot
//! connection selection protocol, transaction orchestration, and one
//! chainable [`Query`] API over MySQL, PostgreSQL, SQLite and SQL Server.
//!
//! ```no_run
//! use ormkit::{MapConfig, Orm, TracingSink, params};
//! use std::sync::Arc;
//!
//! # async fn demo() -> ormkit::DbResult<()> {
//! let config = MapConfig::new()
//!     .with("database.default", "sqlite")
//!     .with("database.connections.sqlite.driver", "sqlite")
//!     .with("database.connections.sqlite.database", "app.db");
//! let orm = Orm::new(Arc::new(config), Arc::new(TracingSink));
//!
//! let active = orm
//!     .query()
//!     .await?
//!     .table("users")
//!     .where_("active = ?", params![true])
//!     .count()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod log;
pub mod models;

pub use config::{ConfigRepository, MapConfig, PoolOptions};
pub use db::{Model, Orm, OrmContext, Query, Transaction};
pub use error::{DbError, DbResult};
pub use log::{LogSink, MemorySink, TracingSink};
pub use models::{Driver, QueryParam};
