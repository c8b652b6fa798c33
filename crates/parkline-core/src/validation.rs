//! # Validation Module
//!
//! Checks applied at the edge of the workflow, before the allocator runs.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Gate hardware / API collaborator                             │
//! │  └── Plate capture, vehicle classification                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Plate format                                                      │
//! │  ├── Gate exists, is operational, serves the direction                 │
//! │  └── Ticket id format                                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Allocator (only ever sees pre-validated gate ids)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use uuid::Uuid;

use crate::error::ValidationError;
use crate::types::{Gate, GateId};
use crate::MAX_PLATE_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates and normalises a licence plate.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 16 characters
/// - Letters, digits, hyphens and single spaces only
///
/// ## Returns
/// The plate upper-cased with surrounding whitespace removed.
///
/// ## Example
/// ```rust
/// use parkline_core::validation::validate_plate;
///
/// assert_eq!(validate_plate(" ab-123 ").unwrap(), "AB-123");
/// assert!(validate_plate("").is_err());
/// assert!(validate_plate("AB_123").is_err());
/// ```
pub fn validate_plate(plate: &str) -> ValidationResult<String> {
    let plate = plate.trim();

    if plate.is_empty() {
        return Err(ValidationError::Required {
            field: "plate".to_string(),
        });
    }

    if plate.chars().count() > MAX_PLATE_LEN {
        return Err(ValidationError::TooLong {
            field: "plate".to_string(),
            max: MAX_PLATE_LEN,
        });
    }

    if !plate
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ' ')
    {
        return Err(ValidationError::InvalidFormat {
            field: "plate".to_string(),
            reason: "must contain only letters, digits, hyphens and spaces".to_string(),
        });
    }

    Ok(plate.to_ascii_uppercase())
}

/// Validates a ticket id (UUID).
pub fn validate_ticket_id(id: &str) -> ValidationResult<()> {
    Uuid::parse_str(id.trim())
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidFormat {
            field: "ticket_id".to_string(),
            reason: e.to_string(),
        })
}

// =============================================================================
// Gate Validators
// =============================================================================

/// Entry gate must exist, be operational and accept entries.
///
/// `gate` is the result of the gate lookup for `gate_id`.
pub fn validate_entry_gate(gate_id: GateId, gate: Option<&Gate>) -> ValidationResult<()> {
    let gate = gate.ok_or(ValidationError::UnknownGate(gate_id))?;

    if !gate.is_operational() {
        return Err(ValidationError::GateNotOperational(gate.id));
    }

    if !gate.gate_type.allows_entry() {
        return Err(ValidationError::GateDirection {
            gate_id: gate.id,
            gate_type: gate.gate_type,
            direction: "entry".to_string(),
        });
    }

    Ok(())
}

/// Exit gate must exist, be operational and accept exits.
pub fn validate_exit_gate(gate_id: GateId, gate: Option<&Gate>) -> ValidationResult<()> {
    let gate = gate.ok_or(ValidationError::UnknownGate(gate_id))?;

    if !gate.is_operational() {
        return Err(ValidationError::GateNotOperational(gate.id));
    }

    if !gate.gate_type.allows_exit() {
        return Err(ValidationError::GateDirection {
            gate_id: gate.id,
            gate_type: gate.gate_type,
            direction: "exit".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FloorId, GateStatus, GateType};

    fn gate(gate_type: GateType, status: GateStatus) -> Gate {
        Gate {
            id: GateId(3),
            floor_id: FloorId(1),
            name: "North".to_string(),
            gate_type,
            status,
        }
    }

    #[test]
    fn test_validate_plate() {
        assert_eq!(validate_plate("kl 07 ab 1234").unwrap(), "KL 07 AB 1234");
        assert!(validate_plate("   ").is_err());
        assert!(validate_plate(&"A".repeat(17)).is_err());
        assert!(validate_plate("AB#12").is_err());
    }

    #[test]
    fn test_validate_ticket_id() {
        assert!(validate_ticket_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_ticket_id("not-a-uuid").is_err());
    }

    #[test]
    fn test_entry_gate_rules() {
        let ok = gate(GateType::EntryExit, GateStatus::Operational);
        assert!(validate_entry_gate(GateId(3), Some(&ok)).is_ok());

        assert!(matches!(
            validate_entry_gate(GateId(3), None),
            Err(ValidationError::UnknownGate(GateId(3)))
        ));

        let closed = gate(GateType::Entry, GateStatus::UnderMaintenance);
        assert!(matches!(
            validate_entry_gate(GateId(3), Some(&closed)),
            Err(ValidationError::GateNotOperational(_))
        ));

        let exit_only = gate(GateType::Exit, GateStatus::Operational);
        assert!(matches!(
            validate_entry_gate(GateId(3), Some(&exit_only)),
            Err(ValidationError::GateDirection { .. })
        ));
    }

    #[test]
    fn test_exit_gate_rules() {
        let entry_only = gate(GateType::Entry, GateStatus::Operational);
        assert!(validate_exit_gate(GateId(3), Some(&entry_only)).is_err());

        let exit = gate(GateType::Exit, GateStatus::Operational);
        assert!(validate_exit_gate(GateId(3), Some(&exit)).is_ok());
    }
}
