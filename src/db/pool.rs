//! Driver sessions.
//!
//! This module opens driver-bound sessions from a resolved dialector: sqlx
//! pools (MySqlPool, PgPool, SqlitePool) for the three sqlx backends and a
//! mutex-guarded tiberius client for SQL Server. A [`Dialer`] opens and
//! ping-verifies a session; the registry only ever talks to the dialer.

use crate::db::dialector::{Dialector, ResolvedConnection};
use crate::error::{DbError, DbResult};
use crate::models::{Driver, MySqlSettings, PostgresSettings, SqlServerSettings, SqliteSettings};
use async_trait::async_trait;
use sqlx::{
    MySqlPool, PgPool, SqlitePool,
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// SQL Server client over a tokio TCP stream.
pub type SqlServerClient = tiberius::Client<Compat<TcpStream>>;

/// A single SQL Server session. tiberius has no pool, so statements are
/// serialized through the mutex; a transaction holds the lock until it ends.
pub type SqlServerPool = Arc<tokio::sync::Mutex<SqlServerClient>>;

/// Database-specific session pool.
#[derive(Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
    SqlServer(SqlServerPool),
}

impl std::fmt::Debug for DbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbPool::MySql(pool) => f.debug_tuple("MySql").field(pool).finish(),
            DbPool::Postgres(pool) => f.debug_tuple("Postgres").field(pool).finish(),
            DbPool::SQLite(pool) => f.debug_tuple("SQLite").field(pool).finish(),
            DbPool::SqlServer(_) => f.debug_tuple("SqlServer").field(&"Client").finish(),
        }
    }
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
            // The client closes its socket when the last handle is dropped.
            DbPool::SqlServer(_) => {}
        }
    }

    /// Get the driver for this pool.
    pub fn driver(&self) -> Driver {
        match self {
            DbPool::MySql(_) => Driver::MySql,
            DbPool::Postgres(_) => Driver::PostgreSql,
            DbPool::SQLite(_) => Driver::Sqlite,
            DbPool::SqlServer(_) => Driver::SqlServer,
        }
    }

    /// Liveness check: run `SELECT 1` on a pooled session.
    pub async fn ping(&self) -> DbResult<()> {
        match self {
            DbPool::MySql(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DbPool::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DbPool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DbPool::SqlServer(client) => {
                let mut client = client.lock().await;
                client.simple_query("SELECT 1").await?.into_results().await?;
            }
        }
        Ok(())
    }
}

/// An opened, ping-verified session registered under a connection name.
#[derive(Debug)]
pub struct ConnectionHandle {
    name: String,
    pool: DbPool,
}

impl ConnectionHandle {
    pub fn new(name: impl Into<String>, pool: DbPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    /// Connection name this handle was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> Driver {
        self.pool.driver()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// Opens driver sessions. Implementations must not cache: the registry
/// decides when a dial happens.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, connection: &ResolvedConnection) -> DbResult<DbPool>;
}

/// Dialer backed by sqlx and tiberius. Opens the session and verifies it
/// with a ping before handing it out.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverDialer;

#[async_trait]
impl Dialer for DriverDialer {
    async fn dial(&self, connection: &ResolvedConnection) -> DbResult<DbPool> {
        let driver = connection.dialector.driver();
        info!(
            connection = %connection.name,
            driver = %driver,
            dsn = %connection.dialector.masked_dsn(),
            "Connecting to database"
        );

        let pool = open_pool(connection).await?;
        if let Err(e) = pool.ping().await {
            pool.close().await;
            return Err(DbError::connection(
                format!("Ping failed: {}", e),
                connection_suggestion(driver, &e.to_string()),
            ));
        }

        info!(connection = %connection.name, driver = %driver, "Connected successfully");
        Ok(pool)
    }
}

/// Create a session pool for the given connection.
async fn open_pool(connection: &ResolvedConnection) -> DbResult<DbPool> {
    let pool_opts = &connection.pool_options;
    pool_opts
        .validate()
        .map_err(|e| DbError::invalid_input(format!("Invalid pool options: {}", e)))?;

    let driver = connection.dialector.driver();
    let is_sqlite = driver == Driver::Sqlite;
    let connect_error = |e: sqlx::Error| {
        let message = e.to_string();
        DbError::connection(
            format!("Failed to connect: {}", message),
            connection_suggestion(driver, &message),
        )
    };

    match &connection.dialector {
        Dialector::MySql(settings) => {
            let options = mysql_options(settings)?;
            let pool = MySqlPoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                .acquire_timeout(pool_opts.acquire_timeout_or_default())
                .idle_timeout(Some(pool_opts.idle_timeout_or_default()))
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::MySql(pool))
        }
        Dialector::Postgres(settings) => {
            let options = postgres_options(settings)?;
            let pool = PgPoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                .acquire_timeout(pool_opts.acquire_timeout_or_default())
                .idle_timeout(Some(pool_opts.idle_timeout_or_default()))
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::Postgres(pool))
        }
        Dialector::Sqlite(settings) => {
            let options = sqlite_options(settings)?;
            let mut pool_options = SqlitePoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                .acquire_timeout(pool_opts.acquire_timeout_or_default());
            // An in-memory database lives exactly as long as its connection.
            if settings.is_memory() {
                pool_options = pool_options
                    .min_connections(1)
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None);
            } else {
                pool_options = pool_options.idle_timeout(Some(pool_opts.idle_timeout_or_default()));
            }
            let pool = pool_options
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::SQLite(pool))
        }
        Dialector::SqlServer(settings) => {
            let client = connect_sqlserver(settings).await?;
            Ok(DbPool::SqlServer(Arc::new(tokio::sync::Mutex::new(client))))
        }
    }
}

fn mysql_options(settings: &MySqlSettings) -> DbResult<MySqlConnectOptions> {
    let server = &settings.server;
    let mut options = MySqlConnectOptions::new()
        .host(&server.host)
        .port(server.port_number(Driver::MySql)?)
        .username(&server.username)
        .database(&server.database);
    if !server.password.is_empty() {
        options = options.password(&server.password);
    }
    if !settings.charset.is_empty() {
        options = options.charset(&settings.charset);
    }
    // `Local` keeps the server's zone; anything else becomes the session time_zone.
    match settings.loc.as_str() {
        "" | "Local" => {}
        "UTC" => options = options.timezone(Some("+00:00".to_string())),
        zone => options = options.timezone(Some(zone.to_string())),
    }
    Ok(options)
}

fn postgres_options(settings: &PostgresSettings) -> DbResult<PgConnectOptions> {
    let server = &settings.server;
    let mut options = PgConnectOptions::new()
        .host(&server.host)
        .port(server.port_number(Driver::PostgreSql)?)
        .username(&server.username)
        .database(&server.database);
    if !server.password.is_empty() {
        options = options.password(&server.password);
    }
    if !settings.sslmode.is_empty() {
        let mode = PgSslMode::from_str(&settings.sslmode).map_err(|e| {
            DbError::connection(
                format!("Invalid sslmode '{}': {}", settings.sslmode, e),
                "Use one of disable, allow, prefer, require, verify-ca, verify-full",
            )
        })?;
        options = options.ssl_mode(mode);
    }
    if !settings.timezone.is_empty() {
        options = options.options([("TimeZone", settings.timezone.as_str())]);
    }
    Ok(options)
}

fn sqlite_options(settings: &SqliteSettings) -> DbResult<SqliteConnectOptions> {
    if settings.is_memory() {
        return SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            DbError::connection(
                format!("Invalid SQLite options: {}", e),
                "Use ':memory:' or a file path as the database",
            )
        });
    }
    Ok(SqliteConnectOptions::new()
        .filename(settings.database.trim())
        .create_if_missing(true))
}

async fn connect_sqlserver(settings: &SqlServerSettings) -> DbResult<SqlServerClient> {
    let server = &settings.server;
    let mut config = tiberius::Config::new();
    config.host(&server.host);
    config.port(server.port_number(Driver::SqlServer)?);
    config.database(&server.database);
    config.authentication(tiberius::AuthMethod::sql_server(
        &server.username,
        &server.password,
    ));
    config.trust_cert();

    debug!(host = %server.host, "Opening SQL Server socket");
    let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
        let message = e.to_string();
        DbError::connection(
            format!("Failed to connect: {}", message),
            connection_suggestion(Driver::SqlServer, &message),
        )
    })?;
    tcp.set_nodelay(true).map_err(|e| {
        DbError::connection(format!("Failed to configure socket: {}", e), "Retry the connection")
    })?;

    tiberius::Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| {
            let message = e.to_string();
            DbError::connection(
                format!("Failed to connect: {}", message),
                connection_suggestion(Driver::SqlServer, &message),
            )
        })
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(driver: Driver, error: &str) -> String {
    let error_str = error.to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", driver);
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password for this connection".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try sslmode=disable".to_string();
    }

    match driver {
        Driver::Sqlite => "Verify the database file path exists and is accessible".to_string(),
        _ => format!(
            "Verify host, port and credentials under database.connections for this {} connection",
            driver
        ),
    }
}
