//! Configuration handling for ormkit.
//!
//! The ORM never loads configuration itself. It reads dotted keys
//! (`database.default`, `database.connections.<name>.host`, ...) through the
//! [`ConfigRepository`] trait, which the host application implements over
//! whatever source it uses. [`MapConfig`] is an in-memory implementation used
//! by the CLI and the tests.
//!
//! The CLI arguments for the `ormkit` binary live here too.

use clap::Parser;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Key holding the name of the default connection.
pub const DEFAULT_CONNECTION_KEY: &str = "database.default";

/// Build the dotted key for a per-connection setting.
pub fn connection_key(connection: &str, field: &str) -> String {
    format!("database.connections.{}.{}", connection, field)
}

/// Read-only lookup of configuration values by dotted key.
pub trait ConfigRepository: Send + Sync {
    /// Get a string value. `None` when the key is not configured.
    fn get_string(&self, key: &str) -> Option<String>;

    /// Get an integer value. Non-numeric values are treated as missing.
    fn get_int(&self, key: &str) -> Option<i64> {
        self.get_string(key).and_then(|v| v.trim().parse().ok())
    }

    /// Get a string value, falling back to the empty string.
    fn string_or_empty(&self, key: &str) -> String {
        self.get_string(key).unwrap_or_default()
    }
}

/// In-memory configuration keyed by dotted path.
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Parse `key=value` assignments (as passed to `--set`).
    pub fn from_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self, String> {
        let mut config = Self::new();
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (key, value) = assignment
                .split_once('=')
                .ok_or_else(|| format!("Invalid assignment '{assignment}', expected key=value"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("Invalid assignment '{assignment}', key is empty"));
            }
            config.set(key, value.trim());
        }
        Ok(config)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigRepository for MapConfig {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Connection pool configuration options, read from
/// `database.connections.<name>.pool.*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Read pool options for a connection. Invalid or negative values are ignored.
    pub fn from_config(config: &dyn ConfigRepository, connection: &str) -> Self {
        let read = |field: &str| {
            config
                .get_int(&connection_key(connection, &format!("pool.{field}")))
                .filter(|v| *v >= 0)
        };
        Self {
            max_connections: read("max_connections").and_then(|v| u32::try_from(v).ok()),
            min_connections: read("min_connections").and_then(|v| u32::try_from(v).ok()),
            idle_timeout_secs: read("idle_timeout").map(|v| v as u64),
            acquire_timeout_secs: read("acquire_timeout").map(|v| v as u64),
        }
    }

    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Command line configuration for the `ormkit` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "ormkit", version, about = "Open a named database connection and run SQL")]
pub struct Config {
    /// Configuration assignments, e.g. `--set database.default=sqlite`.
    /// Repeat the flag or separate values with commas in ORMKIT_SET.
    #[arg(long = "set", env = "ORMKIT_SET", value_delimiter = ',')]
    pub assignments: Vec<String>,

    /// Connection name to use (default: value of `database.default`)
    #[arg(long)]
    pub connection: Option<String>,

    /// SQL statement to run. Only the connection check is performed when omitted.
    #[arg(long)]
    pub sql: Option<String>,

    /// Treat the SQL statement as a write and report affected rows
    #[arg(long, default_value_t = false)]
    pub exec: bool,

    /// Deadline for the whole run in seconds
    #[arg(long, env = "ORMKIT_TIMEOUT", default_value_t = DEFAULT_QUERY_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, env = "ORMKIT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "ORMKIT_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

impl Config {
    /// Build the key/value configuration from the `--set` assignments.
    pub fn repository(&self) -> Result<MapConfig, String> {
        MapConfig::from_assignments(&self.assignments)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_key() {
        assert_eq!(
            connection_key("mysql", "host"),
            "database.connections.mysql.host"
        );
    }

    #[test]
    fn test_map_config_lookup() {
        let config = MapConfig::new()
            .with("database.default", "mysql")
            .with("database.connections.mysql.port", "3306");
        assert_eq!(
            config.get_string("database.default"),
            Some("mysql".to_string())
        );
        assert_eq!(config.get_int("database.connections.mysql.port"), Some(3306));
        assert_eq!(config.get_string("database.missing"), None);
        assert_eq!(config.string_or_empty("database.missing"), "");
    }

    #[test]
    fn test_get_int_rejects_non_numeric() {
        let config = MapConfig::new().with("a", "abc");
        assert_eq!(config.get_int("a"), None);
    }

    #[test]
    fn test_from_assignments() {
        let config = MapConfig::from_assignments(&[
            "database.default=sqlite",
            "database.connections.sqlite.database = app.db",
        ])
        .unwrap();
        assert_eq!(config.len(), 2);
        assert_eq!(
            config.get_string("database.connections.sqlite.database"),
            Some("app.db".to_string())
        );
    }

    #[test]
    fn test_from_assignments_keeps_equals_in_value() {
        let config = MapConfig::from_assignments(&["database.connections.pg.password=a=b"]).unwrap();
        assert_eq!(
            config.get_string("database.connections.pg.password"),
            Some("a=b".to_string())
        );
    }

    #[test]
    fn test_from_assignments_invalid() {
        assert!(MapConfig::from_assignments(&["no_equals_sign"]).is_err());
        assert!(MapConfig::from_assignments(&["=value"]).is_err());
    }

    #[test]
    fn test_pool_options_from_config() {
        let config = MapConfig::new()
            .with("database.connections.pg.pool.max_connections", "20")
            .with("database.connections.pg.pool.idle_timeout", "120")
            .with("database.connections.pg.pool.min_connections", "-1");
        let opts = PoolOptions::from_config(&config, "pg");
        assert_eq!(opts.max_connections, Some(20));
        assert_eq!(opts.min_connections, None);
        assert_eq!(opts.idle_timeout_or_default(), Duration::from_secs(120));
        assert_eq!(
            opts.acquire_timeout_or_default(),
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_pool_options_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections_or_default(false), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(
            opts.max_connections_or_default(true),
            DEFAULT_MAX_CONNECTIONS_SQLITE
        );
        assert_eq!(opts.min_connections_or_default(), DEFAULT_MIN_CONNECTIONS);
    }

    #[test]
    fn test_pool_options_validate() {
        let opts = PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = PoolOptions {
            max_connections: Some(2),
            min_connections: Some(5),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        assert!(PoolOptions::default().validate().is_ok());
    }

    #[test]
    fn test_cli_parse() {
        let config = Config::parse_from([
            "ormkit",
            "--set",
            "database.default=sqlite",
            "--set",
            "database.connections.sqlite.driver=sqlite",
            "--sql",
            "SELECT 1",
        ]);
        assert_eq!(config.assignments.len(), 2);
        assert_eq!(config.sql.as_deref(), Some("SELECT 1"));
        assert!(!config.exec);
        let repo = config.repository().unwrap();
        assert_eq!(
            repo.get_string("database.default"),
            Some("sqlite".to_string())
        );
    }
}
