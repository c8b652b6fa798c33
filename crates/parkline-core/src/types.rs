//! # Domain Types
//!
//! Core domain types used throughout Parkline.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ParkingLot ──► Floor ──► Zone ──► Spot         Gate (on a Floor)       │
//! │   (context)      level     fill_priority  type    ENTRY / EXIT /        │
//! │                            status         status  ENTRY_EXIT            │
//! │                                                                         │
//! │  Proximity (Spot × Gate → distance)     Ticket (references Spot by id)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reference By Identity
//! A Spot holds a `ZoneId`, a Zone holds a `FloorId`, a Ticket holds a
//! `SpotId`. Nothing embeds its parent; lookups resolve ids. A spot outlives
//! many tickets, so tickets never own spot state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// =============================================================================
// Identifiers
// =============================================================================

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
        #[cfg_attr(feature = "sqlx", sqlx(transparent))]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns the raw numeric value.
            #[inline]
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Forwarded so width/fill flags apply to the number.
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                $name(raw)
            }
        }
    };
}

numeric_id!(
    /// Parking lot identifier (tenant-like context parameter).
    LotId
);
numeric_id!(
    /// Floor identifier.
    FloorId
);
numeric_id!(
    /// Zone identifier.
    ZoneId
);
numeric_id!(
    /// Spot identifier. Ordering is the deterministic tie-break.
    SpotId
);
numeric_id!(
    /// Gate identifier.
    GateId
);

// =============================================================================
// Vehicle & Spot Types
// =============================================================================

/// Class of an arriving vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Motorcycle,
    Car,
    Truck,
}

impl VehicleType {
    /// All vehicle types, in a stable order.
    pub const ALL: [VehicleType; 3] = [VehicleType::Motorcycle, VehicleType::Car, VehicleType::Truck];

    /// Fixed mapping from vehicle class to compatible spot class.
    ///
    /// ```text
    /// MOTORCYCLE → MOTORCYCLE spot
    /// CAR        → COMPACT spot
    /// TRUCK      → LARGE spot
    /// ```
    #[inline]
    pub const fn spot_type(&self) -> SpotType {
        match self {
            VehicleType::Motorcycle => SpotType::Motorcycle,
            VehicleType::Car => SpotType::Compact,
            VehicleType::Truck => SpotType::Large,
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleType::Motorcycle => write!(f, "motorcycle"),
            VehicleType::Car => write!(f, "car"),
            VehicleType::Truck => write!(f, "truck"),
        }
    }
}

impl std::str::FromStr for VehicleType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "motorcycle" | "bike" => Ok(VehicleType::Motorcycle),
            "car" => Ok(VehicleType::Car),
            "truck" => Ok(VehicleType::Truck),
            _ => Err(ValidationError::NotAllowed {
                field: "vehicle_type".to_string(),
                allowed: vec!["motorcycle".into(), "car".into(), "truck".into()],
            }),
        }
    }
}

/// Physical spot category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SpotType {
    Motorcycle,
    Compact,
    Large,
}

impl SpotType {
    /// All spot types, in a stable order.
    pub const ALL: [SpotType; 3] = [SpotType::Motorcycle, SpotType::Compact, SpotType::Large];
}

impl fmt::Display for SpotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpotType::Motorcycle => write!(f, "motorcycle"),
            SpotType::Compact => write!(f, "compact"),
            SpotType::Large => write!(f, "large"),
        }
    }
}

impl std::str::FromStr for SpotType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "motorcycle" => Ok(SpotType::Motorcycle),
            "compact" => Ok(SpotType::Compact),
            "large" => Ok(SpotType::Large),
            _ => Err(ValidationError::NotAllowed {
                field: "spot_type".to_string(),
                allowed: vec!["motorcycle".into(), "compact".into(), "large".into()],
            }),
        }
    }
}

// =============================================================================
// Spot
// =============================================================================

/// Occupancy state of a spot.
///
/// ## Transitions
/// ```text
///            try_reserve              occupy (+ticket)
///  VACANT ───────────────► RESERVED ──────────────────► OCCUPIED
///    ▲                        │                            │
///    │   cancel_reservation   │          free (-ticket)    │
///    └────────────────────────┴────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SpotStatus {
    Vacant,
    /// Claimed by an allocator, ticket not yet written.
    Reserved,
    Occupied,
}

impl Default for SpotStatus {
    fn default() -> Self {
        SpotStatus::Vacant
    }
}

/// A single parking spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Spot {
    pub id: SpotId,
    pub floor_id: FloorId,
    pub zone_id: ZoneId,
    /// Painted label, e.g. "B1-A-012".
    pub code: String,
    pub spot_type: SpotType,
    pub status: SpotStatus,
    /// Ticket currently holding the spot (OCCUPIED only).
    pub ticket_id: Option<String>,
}

impl Spot {
    /// True when the spot can be handed to a new vehicle.
    #[inline]
    pub fn is_vacant(&self) -> bool {
        self.status == SpotStatus::Vacant
    }
}

// =============================================================================
// Zone & Floor
// =============================================================================

/// Lifecycle state of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum ZoneStatus {
    Available,
    Active,
    Full,
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneStatus::Available => write!(f, "available"),
            ZoneStatus::Active => write!(f, "active"),
            ZoneStatus::Full => write!(f, "full"),
        }
    }
}

/// A fill-ordered group of spots on one floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Zone {
    pub id: ZoneId,
    pub floor_id: FloorId,
    pub name: String,
    /// Activation order within the floor (lower fills first).
    pub fill_priority: i32,
    pub status: ZoneStatus,
}

/// A floor of the lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Floor {
    pub id: FloorId,
    pub lot_id: LotId,
    /// Vertical position; spill-over order for zone-based allocation.
    pub level: i32,
    pub name: String,
}

/// The lot itself. Treated as a context parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ParkingLot {
    pub id: LotId,
    pub name: String,
    /// Designated exit for the nearest-to-exit strategy.
    pub exit_gate_id: Option<GateId>,
}

// =============================================================================
// Gate & Proximity
// =============================================================================

/// Direction(s) a gate serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    Entry,
    Exit,
    EntryExit,
}

impl GateType {
    /// True if vehicles may enter through this gate.
    #[inline]
    pub const fn allows_entry(&self) -> bool {
        matches!(self, GateType::Entry | GateType::EntryExit)
    }

    /// True if vehicles may leave through this gate.
    #[inline]
    pub const fn allows_exit(&self) -> bool {
        matches!(self, GateType::Exit | GateType::EntryExit)
    }
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateType::Entry => write!(f, "entry"),
            GateType::Exit => write!(f, "exit"),
            GateType::EntryExit => write!(f, "entry_exit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Operational,
    UnderMaintenance,
}

/// An entry and/or exit gate on a floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Gate {
    pub id: GateId,
    pub floor_id: FloorId,
    pub name: String,
    pub gate_type: GateType,
    pub status: GateStatus,
}

impl Gate {
    #[inline]
    pub fn is_operational(&self) -> bool {
        self.status == GateStatus::Operational
    }
}

/// Precomputed distance between a spot and a gate. Ranking only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Proximity {
    pub spot_id: SpotId,
    pub gate_id: GateId,
    pub distance: u32,
}

// =============================================================================
// Ticket
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Active,
    Closed,
}

/// A parking session.
///
/// Created together with spot occupation, closed together with spot
/// release. `spot_id` never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Ticket {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub lot_id: LotId,
    /// Licence plate as captured at the gate.
    pub plate: String,
    pub vehicle_type: VehicleType,
    pub spot_id: SpotId,
    pub entry_gate_id: GateId,
    pub entry_time: DateTime<Utc>,
    pub exit_gate_id: Option<GateId>,
    pub exit_time: Option<DateTime<Utc>>,
    pub status: TicketStatus,
    /// Settled fee in cents (set on close).
    pub fee_cents: Option<i64>,
}

impl Ticket {
    /// Opens a new ticket for a vehicle parked on `spot_id`.
    pub fn open(
        lot_id: LotId,
        plate: impl Into<String>,
        vehicle_type: VehicleType,
        spot_id: SpotId,
        entry_gate_id: GateId,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Ticket {
            id: Uuid::new_v4().to_string(),
            lot_id,
            plate: plate.into(),
            vehicle_type,
            spot_id,
            entry_gate_id,
            entry_time,
            exit_gate_id: None,
            exit_time: None,
            status: TicketStatus::Active,
            fee_cents: None,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == TicketStatus::Active
    }
}

/// Exit data applied to a ticket when its spot is freed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketClosure {
    pub ticket_id: String,
    pub exit_gate_id: GateId,
    pub exit_time: DateTime<Utc>,
    pub fee_cents: i64,
}

// =============================================================================
// Allocation Context
// =============================================================================

/// What the allocator knows about an arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationContext {
    pub lot_id: LotId,
    pub entry_gate_id: GateId,
    /// Floor of the entry gate; zone-based allocation starts here.
    pub floor_id: FloorId,
    /// Overrides the lot's designated exit for nearest-to-exit.
    pub exit_gate_id: Option<GateId>,
}

impl AllocationContext {
    /// Context for an entry through `gate`.
    pub fn at_gate(lot_id: LotId, gate: &Gate) -> Self {
        AllocationContext {
            lot_id,
            entry_gate_id: gate.id,
            floor_id: gate.floor_id,
            exit_gate_id: None,
        }
    }
}

// =============================================================================
// Occupancy
// =============================================================================

/// Counters for one spot type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAvailability {
    pub total: u64,
    pub occupied: u64,
    /// `total - occupied`; reserved-but-unticketed spots still count here.
    pub available: u64,
}

impl TypeAvailability {
    pub fn new(total: u64, occupied: u64) -> Self {
        TypeAvailability {
            total,
            occupied,
            available: total.saturating_sub(occupied),
        }
    }
}

/// Real-time occupancy view handed to reporting collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    pub total_spots: u64,
    pub occupied_spots: u64,
    pub per_type: BTreeMap<SpotType, TypeAvailability>,
    /// Active zone of each floor (None once the floor is exhausted).
    pub active_zones: BTreeMap<FloorId, Option<ZoneId>>,
    /// Active zone of the lowest floor that still has one.
    pub active_zone_id: Option<ZoneId>,
}

impl OccupancySnapshot {
    /// Builds a snapshot from per-type `(total, occupied)` counters.
    pub fn from_counts(
        per_type: impl IntoIterator<Item = (SpotType, u64, u64)>,
        active_zones: BTreeMap<FloorId, Option<ZoneId>>,
    ) -> Self {
        let per_type: BTreeMap<SpotType, TypeAvailability> = per_type
            .into_iter()
            .map(|(spot_type, total, occupied)| (spot_type, TypeAvailability::new(total, occupied)))
            .collect();

        let total_spots = per_type.values().map(|t| t.total).sum();
        let occupied_spots = per_type.values().map(|t| t.occupied).sum();
        let active_zone_id = active_zones.values().find_map(|zone| *zone);

        OccupancySnapshot {
            total_spots,
            occupied_spots,
            per_type,
            active_zones,
            active_zone_id,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
