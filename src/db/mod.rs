//! PostgreSQL pool and migrations

pub mod queries;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Apply the embedded migrations under `migrations/`
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");
    info!("Running {} database migrations...", migrator.iter().count());

    migrator
        .run(pool)
        .await
        .context("failed to apply database migrations")?;

    info!("Database migrations complete");
    Ok(())
}
