//! # parkline-core: Pure Allocation Logic for Parkline
//!
//! Domain types and every decision rule of the spot allocator that does not
//! need I/O: vehicle→spot mapping, the per-floor zone state machine,
//! candidate ranking, the rate card and input validation.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Parkline Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Gate controllers / API (collaborators)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ park / exit / snapshot                 │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   parkline-engine: Allocator, ZoneBoard, Ledger, Service        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ parkline-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌──────────┐ │   │
//! │  │   │  types  │ │  zone   │ │ ranking │ │   fee   │ │validation│ │   │
//! │  │   │  Spot   │ │ Floor   │ │ (dist,  │ │ RateCard│ │  plate,  │ │   │
//! │  │   │  Ticket │ │ Zones   │ │  id)    │ │ Money   │ │  gates   │ │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └─────────┘ └──────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO LOCKS • NO DATABASE • DETERMINISTIC               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            parkline-db (SQLite repositories, migrations)        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Spot, Zone, Gate, Ticket, snapshots)
//! - [`zone`] - Per-floor zone lifecycle (AVAILABLE → ACTIVE → FULL)
//! - [`ranking`] - Strategy kinds and deterministic candidate ordering
//! - [`layout`] - Validated lot layout and its builder
//! - [`fee`] - Integer money and the rate card
//! - [`validation`] - Edge checks run before the allocator
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use parkline_core::{FloorZones, FloorId, ZoneId, VehicleType, SpotType};
//!
//! assert_eq!(VehicleType::Truck.spot_type(), SpotType::Large);
//!
//! let mut floor = FloorZones::fresh(FloorId(1), [(ZoneId(1), 1), (ZoneId(2), 2)]).unwrap();
//! floor.advance().unwrap();
//! assert_eq!(floor.current_active(), Some(ZoneId(2)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fee;
pub mod layout;
pub mod ranking;
pub mod types;
pub mod validation;
pub mod zone;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use fee::{Money, RateCard, Tariff};
pub use layout::{LotLayout, LotLayoutBuilder};
pub use ranking::{RankedSpot, StrategyKind};
pub use types::*;
pub use zone::{FloorZones, ZoneChange, ZoneSlot};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Lot used when a deployment runs a single facility.
pub const DEFAULT_LOT_ID: LotId = LotId(1);

/// Longest accepted licence plate.
pub const MAX_PLATE_LEN: usize = 16;

/// Reservation races an allocator may lose before reporting exhaustion.
pub const DEFAULT_MAX_RESERVATION_RETRIES: u32 = 3;

/// Bound on waiting for a zone pointer or search window.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;
