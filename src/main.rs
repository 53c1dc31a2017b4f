//! ormkit - Main entry point.
//!
//! Opens a named connection from `--set` configuration and either checks it
//! or runs one SQL statement, printing result rows as JSON lines.

use clap::Parser;
use ormkit::config::Config;
use ormkit::db::JsonRow;
use ormkit::{Orm, OrmContext, TracingSink};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    let repository = config.repository()?;
    if repository.is_empty() {
        eprintln!("Error: no configuration given.");
        eprintln!();
        eprintln!("Usage: ormkit --set <key>=<value> [--set ...] [--connection <name>] [--sql <statement>]");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  ormkit --set database.default=sqlite \\");
        eprintln!("         --set database.connections.sqlite.driver=sqlite \\");
        eprintln!("         --set database.connections.sqlite.database=app.db \\");
        eprintln!("         --sql 'SELECT * FROM users'");
        eprintln!("  ORMKIT_SET=database.connections.pg.driver=postgresql,database.connections.pg.host=localhost \\");
        eprintln!("         ormkit --connection pg");
        std::process::exit(1);
    }

    info!("Starting ormkit v{}", env!("CARGO_PKG_VERSION"));

    // Ctrl-C cancels whatever is in flight
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling");
                shutdown.cancel();
            }
        });
    }

    let ctx = OrmContext::background()
        .with_timeout(config.timeout())
        .with_cancellation(shutdown);
    let orm = Orm::new(Arc::new(repository), Arc::new(TracingSink)).with_context(ctx);

    let name = config.connection.clone().unwrap_or_default();
    let result = run(&orm, &name, &config).await;
    orm.close_all().await;

    if let Err(e) = result {
        error!(error = %e, "Run failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        return Err(e.into());
    }

    Ok(())
}

async fn run(orm: &Orm, name: &str, config: &Config) -> ormkit::DbResult<()> {
    let query = orm.connection(name).await?.query().await?;
    info!(
        connection = %query.connection_name(),
        driver = %query.driver(),
        "Connected"
    );

    let Some(sql) = config.sql.as_deref() else {
        println!("ok");
        return Ok(());
    };

    if config.exec {
        let affected = query.exec(sql, ormkit::params![]).await?;
        println!("{}", serde_json::json!({ "rows_affected": affected }));
    } else {
        let rows: Vec<JsonRow> = query.raw(sql, ormkit::params![]).scan().await?;
        for row in &rows {
            println!("{}", serde_json::Value::Object(row.clone()));
        }
        info!(rows = rows.len(), "Query finished");
    }
    Ok(())
}
