// =============================================================================
// DATABASE CONNECTION POOL
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{ConnectOptions, PgPool};
use tracing::log::LevelFilter;

use crate::config::environment::EnvironmentVariables;

/// Builds the pool shared by every request. Sized for a single long-lived
/// analytics backend rather than a multi-tenant deployment: a handful of
/// connections, a short idle timeout, and a checkout timeout so a burst of
/// traffic backpressures instead of wedging the process.
pub async fn create_pool(config: &EnvironmentVariables) -> Result<PgPool> {
    let connect_options = create_connect_options(config)?;

    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .idle_timeout(Duration::from_secs(config.db_idle_timeout_seconds))
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await
        .context("failed to create database connection pool")
}

fn create_connect_options(config: &EnvironmentVariables) -> Result<PgConnectOptions> {
    let mut options: PgConnectOptions = config
        .database_url
        .parse()
        .context("DATABASE_URL is not a valid Postgres connection string")?;

    options = options
        .log_statements(if config.debug_sql {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .options([("timezone", "UTC"), ("application_name", "sql-query-service")]);

    options = if config.environment == "development" {
        options.ssl_mode(PgSslMode::Prefer)
    } else {
        options.ssl_mode(PgSslMode::Require)
    };

    Ok(options)
}
