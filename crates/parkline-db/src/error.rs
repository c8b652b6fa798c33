//! # Database Error Types
//!
//! Every repository returns [`DbResult`]. SQLite failures are classified
//! once, here, so the engine can tell a lost state transition from a broken
//! connection.
//!
//! ## Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error                         DbError               engine sees  │
//! │  ───────────                         ───────               ──────────── │
//! │  RowNotFound                    ──►  NotFound              Db           │
//! │  "UNIQUE constraint failed: t.c"──►  UniqueViolation       Db           │
//! │  "FOREIGN KEY constraint failed"──►  ForeignKeyViolation   Db           │
//! │  SQLITE_BUSY / "database is locked" ► Busy                 Contention   │
//! │  PoolTimedOut                   ──►  PoolExhausted         Db           │
//! │  conditional UPDATE hit 0 rows  ──►  StateConflict         Invariant    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A unique index rejected the write.
    ///
    /// Raised for a second ACTIVE zone on one floor (partial unique index),
    /// a second open ticket on one spot, or re-importing a lot.
    #[error("Unique constraint violated on {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// A conditional transition matched no row.
    ///
    /// Occupying a spot that is not RESERVED, freeing a spot under another
    /// ticket, or persisting a zone change whose `from` no longer holds.
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Rejected before it reached SQLite.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// SQLite's write lock stayed taken past the busy timeout.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DbError::StateConflict(message.into())
    }

    /// True when a conditional transition found the row in another state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::StateConflict(_))
    }

    /// True when waiting longer (or retrying) may succeed.
    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }
}

// SQLITE_BUSY and its extended codes (BUSY_RECOVERY, BUSY_SNAPSHOT, ...).
fn is_busy_code(code: &str) -> bool {
    code.parse::<i32>().map(|c| c & 0xff == 5).unwrap_or(false)
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message();

                if let Some(constraint) = message.strip_prefix("UNIQUE constraint failed: ") {
                    DbError::UniqueViolation {
                        constraint: constraint.to_string(),
                    }
                } else if message.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation(message.to_string())
                } else if db_err.code().is_some_and(|c| is_busy_code(&c))
                    || message.contains("database is locked")
                {
                    DbError::Busy(message.to_string())
                } else {
                    DbError::QueryFailed(message.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_codes() {
        assert!(is_busy_code("5"));
        assert!(is_busy_code("517"));
        assert!(!is_busy_code("19"));
        assert!(!is_busy_code("not a code"));
    }

    #[test]
    fn test_classification_helpers() {
        assert!(DbError::conflict("spot 1 is vacant").is_conflict());
        assert!(DbError::Busy("locked".into()).is_busy());
        assert!(DbError::PoolExhausted.is_busy());
        assert!(!DbError::not_found("Spot", 9).is_busy());
        assert_eq!(
            DbError::not_found("Spot", 9).to_string(),
            "Spot not found: 9"
        );
    }
}
