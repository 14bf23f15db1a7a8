//! PostgreSQL pool backing the token store and user directory.

use crate::config::DatabaseConfig;
use crate::services::StoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Every request resolves its token through this pool, so a stalled
/// acquire must fail fast enough for the coordinator to answer.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to the identity database and bring its schema up to date.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    tracing::info!(max_connections = config.max_connections, "Connecting to identity database");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Persistence(anyhow::Error::new(e)))?;

    tracing::info!("Identity database ready");
    Ok(pool)
}

/// Round-trip a trivial query; used by the token store's health check.
pub async fn ping(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
