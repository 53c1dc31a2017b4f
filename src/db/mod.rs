//! Database layer.
//!
//! This module provides:
//! - Dialector resolution from named connection configuration
//! - Driver sessions and the dialer that opens them
//! - The per-Orm connection registry and the Orm facade
//! - Transactions and the chainable query builder
//! - Statement execution, parameter binding and row decoding

pub mod builder;
pub mod context;
pub mod dialector;
pub mod executor;
pub mod orm;
pub mod params;
pub mod pool;
pub mod query;
pub mod registry;
pub mod transaction;
pub mod types;

pub use builder::Statement;
pub use context::OrmContext;
pub use dialector::{Dialector, ResolvedConnection, resolve, resolve_connection};
pub use executor::ExecResult;
pub use orm::Orm;
pub use pool::{ConnectionHandle, DbPool, Dialer, DriverDialer};
pub use query::{Model, Query, Scope};
pub use registry::ConnectionRegistry;
pub use transaction::{Transaction, TransactionState};
pub use types::JsonRow;
