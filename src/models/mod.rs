//! Data models for ormkit.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    Driver, MySqlSettings, PostgresSettings, ServerSettings, SqlServerSettings, SqliteSettings,
};
pub use query::QueryParam;
