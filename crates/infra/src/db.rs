//! Postgres wiring: pool creation and schema.

use sqlx::PgPool;
use tracing::info;

/// Tables used by the Postgres content, job and audit stores.
pub const SCHEMA: &str = include_str!("../migrations/schema.sql");

/// Connect and apply [`SCHEMA`]. Every statement is `IF NOT EXISTS`.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPool::connect(database_url).await?;
    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    info!("postgres schema applied");
    Ok(pool)
}
