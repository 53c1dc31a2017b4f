//! Error types for ormkit.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver errors from sqlx and tiberius are folded into [`DbError`] so callers
//! deal with one error type regardless of the backend a connection uses.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("err database driver: {driver}, only support mysql, postgresql, sqlite and sqlserver")]
    UnsupportedDriver { driver: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    /// Rollback failed after the transaction callback returned an error.
    #[error("rollback error: {rollback}; transaction callback failed: {source}")]
    RollbackFailed {
        rollback: Box<DbError>,
        source: Box<DbError>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Context ended: {reason}")]
    ContextEnded { reason: String },

    #[error("Record not found (table: {table})")]
    RecordNotFound { table: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an unsupported driver error.
    pub fn unsupported_driver(driver: impl Into<String>) -> Self {
        Self::UnsupportedDriver {
            driver: driver.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Combine a failed rollback with the callback error that triggered it.
    pub fn rollback_failed(rollback: DbError, source: DbError) -> Self {
        Self::RollbackFailed {
            rollback: Box::new(rollback),
            source: Box::new(source),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a context ended error.
    pub fn context_ended(reason: impl Into<String>) -> Self {
        Self::ContextEnded {
            reason: reason.into(),
        }
    }

    /// Create a record not found error.
    pub fn record_not_found(table: impl Into<String>) -> Self {
        Self::RecordNotFound {
            table: table.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error reports a missing row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound { .. })
    }

    /// Check if the operation was aborted by its context's deadline or cancellation.
    pub fn is_context_ended(&self) -> bool {
        matches!(self, Self::ContextEnded { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection configuration and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::record_not_found("unknown"),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                None,
                "Check the selected columns",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert tiberius (SQL Server) errors to DbError.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TdsError;

        match err {
            TdsError::Server(token) => DbError::database(
                token.message().to_string(),
                Some(token.code().to_string()),
                "Check the SQL syntax and referenced objects",
            ),
            TdsError::Io { kind, message } => DbError::connection(
                format!("I/O error ({:?}): {}", kind, message),
                "Check network connectivity and database server status",
            ),
            TdsError::Tls(msg) => DbError::connection(
                format!("TLS error: {}", msg),
                "Verify TLS configuration and certificates",
            ),
            TdsError::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            TdsError::Routing { host, port } => DbError::connection(
                format!("Server requested routing to {}:{}", host, port),
                "Connect to the routed host directly",
            ),
            other => DbError::internal(format!("SQL Server error: {}", other)),
        }
    }
}

/// Convert JSON (de)serialization errors raised while mapping rows to models.
impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::internal(format!("Row mapping error: {}", err))
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_unsupported_driver_text_is_fixed() {
        let err = DbError::unsupported_driver("goravel");
        assert_eq!(
            err.to_string(),
            "err database driver: goravel, only support mysql, postgresql, sqlite and sqlserver"
        );
    }

    #[test]
    fn test_unsupported_driver_empty() {
        let err = DbError::unsupported_driver("");
        assert_eq!(
            err.to_string(),
            "err database driver: , only support mysql, postgresql, sqlite and sqlserver"
        );
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
    }

    #[test]
    fn test_rollback_failed_keeps_both_messages() {
        let err = DbError::rollback_failed(
            DbError::transaction("connection reset", "tx_1"),
            DbError::invalid_input("insufficient balance"),
        );
        let text = err.to_string();
        assert!(text.contains("connection reset"));
        assert!(text.contains("insufficient balance"));

        match err {
            DbError::RollbackFailed { rollback, source } => {
                assert!(matches!(*rollback, DbError::Transaction { .. }));
                assert!(matches!(*source, DbError::InvalidInput { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_row_not_found_maps_to_record_not_found() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_context_ended() {
        let err = DbError::context_ended("deadline exceeded");
        assert!(err.is_context_ended());
        assert_eq!(err.to_string(), "Context ended: deadline exceeded");
    }
}
