//! # Connection Pool
//!
//! One [`Database`] per process. Every entry lane takes its own pooled
//! connection; SQLite lets one writer through at a time and the busy timeout
//! makes the others queue instead of failing.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  gate 1 ──► conn ──┐                                                    │
//! │  gate 2 ──► conn ──┼──► parkline.db (WAL)                               │
//! │  gate 3 ──► conn ──┘      readers: snapshots, candidate searches        │
//! │                           writer:  UPDATE spots ... WHERE status = ?    │
//! │                                    occupy / free transactions           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A second engine process opening the same file is a second pool; the
//! conditional UPDATEs keep the two from sharing a spot.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::gate::GateRepository;
use crate::repository::layout::LayoutRepository;
use crate::repository::spot::SpotRepository;
use crate::repository::ticket::TicketRepository;
use crate::repository::zone::ZoneRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the database lives and how many lanes may use it at once.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/parkline/parkline.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `None` for a private in-memory database.
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    /// How long a writer waits on SQLite's write lock.
    pub busy_timeout: Duration,
    /// How long a caller waits for a free pooled connection.
    pub acquire_timeout: Duration,
    pub run_migrations: bool,
}

impl DbConfig {
    /// File-backed database, created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: Some(path.into()),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
            run_migrations: true,
        }
    }

    /// Private in-memory database for tests.
    ///
    /// The data lives inside one connection, so the pool is pinned to it.
    pub fn in_memory() -> Self {
        DbConfig {
            path: None,
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        if self.path.is_some() {
            self.max_connections = max.max(1);
        }
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            None => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?,
        };

        // SQLite leaves foreign keys off unless asked.
        Ok(options.foreign_keys(true).busy_timeout(self.busy_timeout))
    }

    fn describe(&self) -> String {
        self.path
            .as_deref()
            .map(Path::display)
            .map(|p| p.to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }
}

// =============================================================================
// Database
// =============================================================================

/// Pool handle and entry point to the repositories.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and, unless disabled, brings the schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let target = config.describe();
        info!(database = %target, "Opening database");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout);
        if config.path.is_none() {
            // Dropping the only connection would drop the data with it.
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(format!("{target}: {e}")))?;

        debug!(
            database = %target,
            max_connections = config.max_connections,
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "Pool ready"
        );

        let db = Database { pool };
        if config.run_migrations {
            migrations::run_migrations(&db.pool).await?;
        }
        Ok(db)
    }

    /// Raw pool, for queries no repository covers.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Candidate searches, claims and occupancy transitions.
    pub fn spots(&self) -> SpotRepository {
        SpotRepository::new(self.pool.clone())
    }

    pub fn zones(&self) -> ZoneRepository {
        ZoneRepository::new(self.pool.clone())
    }

    pub fn gates(&self) -> GateRepository {
        GateRepository::new(self.pool.clone())
    }

    pub fn tickets(&self) -> TicketRepository {
        TicketRepository::new(self.pool.clone())
    }

    /// Layout import and occupancy counters.
    pub fn layouts(&self) -> LayoutRepository {
        LayoutRepository::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// True when a trivial query goes through.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.db");

        let first = Database::new(DbConfig::new(&path)).await.unwrap();
        first.close().await;

        let second = Database::new(DbConfig::new(&path).run_migrations(false))
            .await
            .unwrap();
        let (total, applied) = migrations::migration_status(second.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[test]
    fn test_in_memory_pool_stays_single() {
        let config = DbConfig::in_memory().max_connections(8);
        assert_eq!(config.max_connections, 1);

        let config = DbConfig::new("/tmp/parkline-test.db")
            .max_connections(0)
            .busy_timeout(Duration::from_millis(250));
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.describe(), "/tmp/parkline-test.db");
    }
}
