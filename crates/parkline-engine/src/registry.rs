//! # Spot Registry
//!
//! The storage seam of the engine. Everything the allocator, the zone board
//! and the ledger know about spots, zones, gates and tickets goes through
//! [`SpotRegistry`].
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SpotRegistry Contract                            │
//! │                                                                         │
//! │  find_candidates   VACANT spots of one type, in ranking order          │
//! │                    (zone: by id, gate: by (distance, id), lot: by id)  │
//! │  try_reserve       VACANT → RESERVED, atomically. false = lost race    │
//! │  cancel_reservation RESERVED → VACANT                                   │
//! │  occupy            RESERVED → OCCUPIED + ticket + counters (1 unit)    │
//! │  free              OCCUPIED → VACANT + close ticket + counters         │
//! │                    VACANT → Ok(None)   (idempotent)                    │
//! │  apply_zone_changes compare-and-set on zone statuses (all or nothing)  │
//! │                                                                         │
//! │  Implementations:                                                      │
//! │  • MemoryRegistry  per-spot parking_lot mutex + atomic counters        │
//! │  • SqliteRegistry  conditional UPDATEs + transactions (parkline-db)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A registry serves exactly one lot.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parkline_core::{
    Floor, FloorId, Gate, GateId, ParkingLot, Spot, SpotId, SpotType, Ticket, TicketClosure,
    Zone, ZoneChange, ZoneId,
};

use crate::error::EngineResult;

/// Where to look for vacant spots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchScope {
    /// One zone, ordered by spot id.
    Zone(ZoneId),
    /// Spots with a recorded distance to the gate, ordered by (distance, id).
    NearestTo(GateId),
    /// The whole lot, ordered by spot id.
    Anywhere,
}

/// Incrementally maintained occupancy counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// `(spot_type, total, occupied)`.
    pub per_type: Vec<(SpotType, u64, u64)>,
    pub zones: BTreeMap<ZoneId, u64>,
    pub floors: BTreeMap<FloorId, u64>,
}

impl Counters {
    pub fn occupied(&self, spot_type: SpotType) -> u64 {
        self.per_type
            .iter()
            .find(|(t, _, _)| *t == spot_type)
            .map(|(_, _, occupied)| *occupied)
            .unwrap_or(0)
    }
}

/// Durable or in-memory record of one lot's spots.
#[async_trait]
pub trait SpotRegistry: Send + Sync {
    /// The lot this registry serves.
    async fn lot(&self) -> EngineResult<ParkingLot>;

    /// Floors in ascending level order.
    async fn floors(&self) -> EngineResult<Vec<Floor>>;

    async fn zones_on_floor(&self, floor_id: FloorId) -> EngineResult<Vec<Zone>>;

    /// A gate of this lot, if it exists.
    async fn gate(&self, gate_id: GateId) -> EngineResult<Option<Gate>>;

    async fn spot(&self, spot_id: SpotId) -> EngineResult<Option<Spot>>;

    /// Up to `limit` VACANT spots of `spot_type` in `scope`, best first.
    async fn find_candidates(
        &self,
        spot_type: SpotType,
        scope: SearchScope,
        limit: usize,
    ) -> EngineResult<Vec<Spot>>;

    /// Claims a VACANT spot. `false` if it was no longer VACANT.
    async fn try_reserve(&self, spot_id: SpotId) -> EngineResult<bool>;

    /// Releases a claim. `false` if the spot was not RESERVED.
    async fn cancel_reservation(&self, spot_id: SpotId) -> EngineResult<bool>;

    /// RESERVED → OCCUPIED together with the ticket and the counters.
    ///
    /// Any other starting state is an `InvariantViolation`.
    async fn occupy(&self, ticket: &Ticket) -> EngineResult<()>;

    /// OCCUPIED → VACANT, closing the holding ticket.
    ///
    /// Returns the closed ticket id, or `None` if the spot was already
    /// VACANT. A RESERVED spot or a ticket mismatch is an
    /// `InvariantViolation`.
    async fn free(
        &self,
        spot_id: SpotId,
        closure: Option<&TicketClosure>,
    ) -> EngineResult<Option<String>>;

    async fn ticket(&self, ticket_id: &str) -> EngineResult<Option<Ticket>>;

    /// RESERVED spots, used to sweep claims orphaned by a crash.
    async fn reserved_spots(&self) -> EngineResult<Vec<SpotId>>;

    /// Persists zone transitions. Every `from` must still match.
    async fn apply_zone_changes(&self, changes: &[ZoneChange]) -> EngineResult<()>;

    async fn counters(&self) -> EngineResult<Counters>;
}
