//! # Error Types
//!
//! Domain-specific error types for parkline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  parkline-core errors (this file)                                      │
//! │  ├── CoreError        - Allocation outcomes + domain rule breaks       │
//! │  └── ValidationError  - Input rejected before the allocator runs       │
//! │                                                                         │
//! │  parkline-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  parkline-engine errors                                                │
//! │  └── EngineError      - What the entry/exit workflow sees              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Allocation Outcomes
//! Three variants carry the allocation taxonomy and must stay distinct:
//!
//! | Variant              | Meaning                              | Caller action        |
//! |----------------------|--------------------------------------|----------------------|
//! | `CapacityExhausted`  | No vacant spot reachable             | "Lot full" to driver |
//! | `ContentionTimeout`  | Exclusive window not acquired in time| Retry a few times    |
//! | `InvariantViolation` | A design invariant broke             | Fail loudly, page    |

use thiserror::Error;

use crate::types::{FloorId, GateId, GateType, SpotId, SpotType, ZoneId};

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No vacant spot of the required type is reachable by the active strategy.
    ///
    /// ## When This Occurs
    /// - Every candidate was taken (or none existed)
    /// - Zone-based: every zone on every floor went FULL for this type
    /// - Reservation races were lost more times than the retry bound
    #[error("No vacant {spot_type} spot available")]
    CapacityExhausted { spot_type: SpotType },

    /// Exclusive access to a zone pointer or search window was not acquired in time.
    #[error("Timed out after {waited_ms}ms waiting for {resource}")]
    ContentionTimeout { resource: String, waited_ms: u64 },

    /// A design invariant was broken (e.g. a spot occupied by two tickets).
    ///
    /// This is never expected contention. It signals a bug and is surfaced
    /// separately from capacity exhaustion.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Spot does not exist in the registry.
    #[error("Spot not found: {0}")]
    SpotNotFound(SpotId),

    /// Zone does not exist in the registry.
    #[error("Zone not found: {0}")]
    ZoneNotFound(ZoneId),

    /// Floor does not exist in the registry.
    #[error("Floor not found: {0}")]
    FloorNotFound(FloorId),

    /// Ticket cannot be found.
    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    /// Ticket has already been closed.
    #[error("Ticket {0} is already closed")]
    TicketClosed(String),

    /// Administrative layout is inconsistent.
    ///
    /// ## When This Occurs
    /// - Spot references a zone on another floor
    /// - Two zones on one floor share a fill priority
    /// - Proximity row references an unknown spot or gate
    #[error("Invalid lot layout: {0}")]
    InvalidLayout(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvariantViolation from anything printable.
    pub fn invariant(message: impl Into<String>) -> Self {
        CoreError::InvariantViolation(message.into())
    }

    /// Creates a ContentionTimeout for a named resource.
    pub fn contention(resource: impl Into<String>, waited_ms: u64) -> Self {
        CoreError::ContentionTimeout {
            resource: resource.into(),
            waited_ms,
        }
    }

    /// True when the whole operation may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ContentionTimeout { .. })
    }

    /// True for a design-invariant break.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, CoreError::InvariantViolation(_))
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These are raised before any spot state is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., invalid UUID, bad plate characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Gate id does not resolve to a gate.
    #[error("Unknown gate: {0}")]
    UnknownGate(GateId),

    /// Gate exists but is under maintenance.
    #[error("Gate {0} is not operational")]
    GateNotOperational(GateId),

    /// Gate cannot be used in the requested direction.
    #[error("Gate {gate_id} ({gate_type}) cannot be used for {direction}")]
    GateDirection {
        gate_id: GateId,
        gate_type: GateType,
        direction: String,
    },

    /// Exit timestamp lies before the entry timestamp.
    #[error("Exit time precedes entry time")]
    ExitBeforeEntry,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
