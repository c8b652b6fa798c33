//! # Schema Migrations
//!
//! The schema ships inside the binary (`migrations/sqlite/`, embedded with
//! `sqlx::migrate!`) and is applied by [`Database::new`](crate::Database::new).
//!
//! ```text
//! 001_initial_schema.sql
//!   lots ─┬─ floors ── zones ── spots ── spot_proximity ── gates
//!         ├─ tickets (one ACTIVE ticket per spot)
//!         └─ type_occupancy (per spot type counters)
//! ```
//!
//! Applied files are checksummed by sqlx; change the schema by adding
//! `NNN_description.sql`, never by editing an applied file.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the workspace `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    info!(migrations = MIGRATOR.migrations.len(), "Schema up to date");
    Ok(())
}

/// Returns `(total_migrations, applied_migrations)` for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
