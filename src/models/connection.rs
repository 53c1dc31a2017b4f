//! Connection-related data models.
//!
//! This module defines the supported driver families and the per-driver
//! connection settings read from configuration.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Includes MariaDB
    MySql,
    PostgreSql,
    Sqlite,
    SqlServer,
}

impl Driver {
    /// Parse the `driver` configuration value. Matching is exact, like the
    /// configuration keys themselves.
    pub fn parse(driver: &str) -> DbResult<Self> {
        match driver {
            "mysql" => Ok(Self::MySql),
            "postgresql" => Ok(Self::PostgreSql),
            "sqlite" => Ok(Self::Sqlite),
            "sqlserver" => Ok(Self::SqlServer),
            other => Err(DbError::unsupported_driver(other)),
        }
    }

    /// The configuration value naming this driver.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::Sqlite => "sqlite",
            Self::SqlServer => "sqlserver",
        }
    }

    /// Get the display name for this driver.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::PostgreSql => "PostgreSQL",
            Self::Sqlite => "SQLite",
            Self::SqlServer => "SQL Server",
        }
    }

    /// Get the default port for this driver.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::PostgreSql => Some(5432),
            Self::SqlServer => Some(1433),
            Self::Sqlite => None,
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Network settings shared by the server-based drivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    /// Kept as configured so the DSN reproduces it verbatim.
    pub port: String,
    pub database: String,
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
}

impl ServerSettings {
    /// Port as a number, falling back to the driver default when unset.
    pub fn port_number(&self, driver: Driver) -> DbResult<u16> {
        let port = self.port.trim();
        if port.is_empty() {
            return driver.default_port().ok_or_else(|| {
                DbError::invalid_input(format!("{} does not use a network port", driver))
            });
        }
        port.parse().map_err(|_| {
            DbError::connection(
                format!("Invalid port '{}'", self.port),
                "Set the connection port to a number between 1 and 65535",
            )
        })
    }
}

/// MySQL-family settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MySqlSettings {
    #[serde(flatten)]
    pub server: ServerSettings,
    pub charset: String,
    /// Location used when parsing times (`Local`, `UTC`, ...)
    pub loc: String,
}

/// PostgreSQL settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresSettings {
    #[serde(flatten)]
    pub server: ServerSettings,
    pub sslmode: String,
    pub timezone: String,
}

/// SQLite settings: only the database file (or `:memory:`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteSettings {
    pub database: String,
}

impl SqliteSettings {
    /// True when the database lives only in memory.
    pub fn is_memory(&self) -> bool {
        let db = self.database.trim();
        db == ":memory:" || db.is_empty() || db.contains("mode=memory")
    }
}

/// SQL Server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlServerSettings {
    #[serde(flatten)]
    pub server: ServerSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_parse() {
        assert_eq!(Driver::parse("mysql").unwrap(), Driver::MySql);
        assert_eq!(Driver::parse("postgresql").unwrap(), Driver::PostgreSql);
        assert_eq!(Driver::parse("sqlite").unwrap(), Driver::Sqlite);
        assert_eq!(Driver::parse("sqlserver").unwrap(), Driver::SqlServer);
    }

    #[test]
    fn test_driver_parse_unknown() {
        let err = Driver::parse("goravel").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedDriver { ref driver } if driver == "goravel"));
        // No aliases: the configuration value must be exact.
        assert!(Driver::parse("postgres").is_err());
        assert!(Driver::parse("MySQL").is_err());
        assert!(Driver::parse("").is_err());
    }

    #[test]
    fn test_driver_round_trip_name() {
        for driver in [
            Driver::MySql,
            Driver::PostgreSql,
            Driver::Sqlite,
            Driver::SqlServer,
        ] {
            assert_eq!(Driver::parse(driver.as_str()).unwrap(), driver);
        }
    }

    #[test]
    fn test_port_number() {
        let mut server = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: "3306".to_string(),
            database: "app".to_string(),
            username: "root".to_string(),
            password: String::new(),
        };
        assert_eq!(server.port_number(Driver::MySql).unwrap(), 3306);

        server.port = String::new();
        assert_eq!(server.port_number(Driver::SqlServer).unwrap(), 1433);

        server.port = "not-a-port".to_string();
        assert!(server.port_number(Driver::MySql).is_err());
    }

    #[test]
    fn test_sqlite_memory_detection() {
        let memory = SqliteSettings {
            database: ":memory:".to_string(),
        };
        assert!(memory.is_memory());
        let file = SqliteSettings {
            database: "/tmp/app.db".to_string(),
        };
        assert!(!file.is_memory());
    }
}
