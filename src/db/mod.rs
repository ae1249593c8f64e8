//! Catalog. Owns persistent state: pods, streams, records.
//!
//! Follows `providers/database/mod.rs`'s shape (a single `setup_database`
//! entry point run once at boot, collection/validator setup folded into
//! it) and `providers/crud/*`'s shape (one small async function per
//! operation, `tracing::error!` on failure then a typed error), pointed
//! at `sqlx::PgPool` instead of `mongodb::Database` since the catalog
//! needs relational prefix queries over stream paths.

pub mod models;
pub mod pods;
pub mod records;
pub mod streams;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn setup_database(database_url: &str) -> Result<PgPool, anyhow::Error> {
    let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
