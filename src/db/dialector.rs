//! Dialector resolution.
//!
//! A dialector is everything needed to open a session for one named
//! connection: the driver family, its settings, and the DSN string in the
//! format existing deployments expect. Resolution is pure: it only reads
//! configuration keys and never touches the network.

use crate::config::{ConfigRepository, PoolOptions, connection_key};
use crate::error::DbResult;
use crate::models::{
    Driver, MySqlSettings, PostgresSettings, ServerSettings, SqlServerSettings, SqliteSettings,
};

/// Driver-specific connection settings for one named connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialector {
    MySql(MySqlSettings),
    Postgres(PostgresSettings),
    Sqlite(SqliteSettings),
    SqlServer(SqlServerSettings),
}

impl Dialector {
    /// Get the driver family.
    pub fn driver(&self) -> Driver {
        match self {
            Dialector::MySql(_) => Driver::MySql,
            Dialector::Postgres(_) => Driver::PostgreSql,
            Dialector::Sqlite(_) => Driver::Sqlite,
            Dialector::SqlServer(_) => Driver::SqlServer,
        }
    }

    /// Build the DSN string. Contains credentials - never log.
    pub fn dsn(&self) -> String {
        match self {
            Dialector::MySql(s) => format!(
                "{}:{}@tcp({}:{})/{}?charset={}&parseTime=true&loc={}",
                s.server.username,
                s.server.password,
                s.server.host,
                s.server.port,
                s.server.database,
                s.charset,
                s.loc
            ),
            Dialector::Postgres(s) => format!(
                "host={} user={} password={} dbname={} port={} sslmode={} TimeZone={}",
                s.server.host,
                s.server.username,
                s.server.password,
                s.server.database,
                s.server.port,
                s.sslmode,
                s.timezone
            ),
            Dialector::Sqlite(s) => s.database.clone(),
            Dialector::SqlServer(s) => format!(
                "sqlserver://{}:{}@{}:{}?database={}",
                s.server.username, s.server.password, s.server.host, s.server.port, s.server.database
            ),
        }
    }

    /// DSN with the password replaced, safe for logs.
    pub fn masked_dsn(&self) -> String {
        let mut masked = self.clone();
        match &mut masked {
            Dialector::MySql(s) => mask(&mut s.server),
            Dialector::Postgres(s) => mask(&mut s.server),
            Dialector::SqlServer(s) => mask(&mut s.server),
            Dialector::Sqlite(_) => {}
        }
        masked.dsn()
    }
}

fn mask(server: &mut ServerSettings) {
    if !server.password.is_empty() {
        server.password = "****".to_string();
    }
}

/// Everything the registry needs to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub name: String,
    pub dialector: Dialector,
    pub pool_options: PoolOptions,
}

/// Resolve the dialector for a named connection.
///
/// Only the keys relevant to the configured driver are read. An empty or
/// unknown driver value is an error, never a default.
pub fn resolve(config: &dyn ConfigRepository, connection: &str) -> DbResult<Dialector> {
    let read = |field: &str| config.string_or_empty(&connection_key(connection, field));
    let driver = Driver::parse(&read("driver"))?;

    let server = || ServerSettings {
        host: read("host"),
        port: read("port"),
        database: read("database"),
        username: read("username"),
        password: read("password"),
    };

    let dialector = match driver {
        Driver::MySql => Dialector::MySql(MySqlSettings {
            server: server(),
            charset: read("charset"),
            loc: read("loc"),
        }),
        Driver::PostgreSql => Dialector::Postgres(PostgresSettings {
            server: server(),
            sslmode: read("sslmode"),
            timezone: read("timezone"),
        }),
        Driver::Sqlite => Dialector::Sqlite(SqliteSettings {
            database: read("database"),
        }),
        Driver::SqlServer => Dialector::SqlServer(SqlServerSettings { server: server() }),
    };

    Ok(dialector)
}

/// Resolve the dialector together with the connection's pool options.
pub fn resolve_connection(
    config: &dyn ConfigRepository,
    connection: &str,
) -> DbResult<ResolvedConnection> {
    let dialector = resolve(config, connection)?;
    Ok(ResolvedConnection {
        name: connection.to_string(),
        dialector,
        pool_options: PoolOptions::from_config(config, connection),
    })
}
