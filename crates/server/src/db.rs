use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use tilecast_core::config::{PostgresConfig, QueryConfig};

/// Connect to the template store database and run migrations.
pub async fn init_pg_pool(config: &PostgresConfig) -> anyhow::Result<PgPool> {
    if !config.is_configured() {
        anyhow::bail!("PostgreSQL is not configured: set PG_URL or PG_USERNAME/PG_PASSWORD");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.connection_string())
        .await
        .with_context(|| format!("failed to connect to PostgreSQL at {}:{}", config.host, config.port))?;
    info!(host = %config.host, database = %config.database, "PostgreSQL connected");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;
    info!("Database migrations applied successfully");

    Ok(pool)
}

/// Pool the template queries run against. Reuses the store pool unless a
/// separate `QUERY_DATABASE_URL` is configured.
pub async fn init_query_pool(
    config: &QueryConfig,
    postgres: &PostgresConfig,
    store_pool: &PgPool,
) -> anyhow::Result<PgPool> {
    let Some(url) = &config.database_url else {
        return Ok(store_pool.clone());
    };

    let pool = PgPoolOptions::new()
        .max_connections(postgres.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await
        .context("failed to connect to the query database")?;
    info!("query database connected");
    Ok(pool)
}
