//! Database connection pool

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub type DbPool = PgPool;

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str, max_connections: u32, min_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(_pool: &DbPool) -> Result<(), sqlx::Error> {
    // Schema (accounts, groups, account_groups, api_keys, users, user_subscriptions,
    // usage_logs, idempotency_records, scheduler_outbox) is applied out-of-band.
    tracing::info!("database pool initialized successfully");
    Ok(())
}
