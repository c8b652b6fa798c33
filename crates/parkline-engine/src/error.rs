//! # Engine Error Types
//!
//! Error types for allocation, occupancy and service operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Domain (Core)  │  │    Storage      │  │    Configuration        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Capacity       │  │  Db(DbError)    │  │  InvalidConfig          │ │
//! │  │   Exhausted     │  │                 │  │  ConfigLoadFailed       │ │
//! │  │  Contention     │  │  StateConflict  │  │  ConfigSaveFailed       │ │
//! │  │   Timeout       │  │   ──► Invariant │  │                         │ │
//! │  │  Invariant      │  │       Violation │  │                         │ │
//! │  │   Violation     │  │                 │  │                         │ │
//! │  │  Validation     │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │   Settlement    │  │    Runtime      │                              │
//! │  │                 │  │                 │                              │
//! │  │ SettlementFailed│  │  Internal       │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A storage-level state conflict (a conditional update that matched nothing
//! although the engine's locks said it must) is surfaced as
//! `InvariantViolation`, never as an ordinary database error.

use thiserror::Error;

use parkline_core::{CoreError, SpotType, ValidationError};
use parkline_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type covering all allocation and service failures.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Capacity, contention, invariant and validation failures.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Durable registry failure.
    #[error("Database error: {0}")]
    Db(DbError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Settlement Errors
    // =========================================================================
    /// The payment collaborator refused or failed the fee.
    #[error("Fee settlement failed for ticket {ticket_id}: {reason}")]
    SettlementFailed { ticket_id: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn capacity_exhausted(spot_type: SpotType) -> Self {
        EngineError::Core(CoreError::CapacityExhausted { spot_type })
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        EngineError::Core(CoreError::invariant(message))
    }

    pub fn contention(resource: impl Into<String>, waited_ms: u64) -> Self {
        EngineError::Core(CoreError::contention(resource, waited_ms))
    }

    /// Only lock contention may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Core(e) if e.is_retryable())
    }

    pub fn is_capacity_exhausted(&self) -> bool {
        matches!(self, EngineError::Core(CoreError::CapacityExhausted { .. }))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, EngineError::Core(e) if e.is_invariant_violation())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Core(CoreError::Validation(_)))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::ConfigSaveFailed(_)
        )
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::StateConflict(message) => EngineError::invariant(message),
            DbError::Busy(_) => EngineError::contention("sqlite write lock", 0),
            other => EngineError::Db(other),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(EngineError::contention("floor 1", 100).is_retryable());

        assert!(!EngineError::capacity_exhausted(SpotType::Compact).is_retryable());
        assert!(!EngineError::invariant("double occupancy").is_retryable());
        assert!(!EngineError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_state_conflict_becomes_invariant_violation() {
        let err: EngineError = DbError::StateConflict("spot 4 is occupied".into()).into();
        assert!(err.is_invariant_violation());

        let err: EngineError = DbError::Busy("database is locked".into()).into();
        assert!(err.is_retryable());

        let err: EngineError = DbError::not_found("Spot", 4).into();
        assert!(matches!(err, EngineError::Db(DbError::NotFound { .. })));
    }

    #[test]
    fn test_capacity_message_is_transparent() {
        let err = EngineError::capacity_exhausted(SpotType::Large);
        assert!(err.is_capacity_exhausted());
        assert_eq!(err.to_string(), "No vacant large spot available");
    }

    #[test]
    fn test_validation_conversion() {
        let err: EngineError = ValidationError::ExitBeforeEntry.into();
        assert!(err.is_validation());
        assert!(!err.is_config_error());
    }
}
