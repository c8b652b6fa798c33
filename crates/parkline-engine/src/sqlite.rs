//! # SQLite Registry
//!
//! [`SpotRegistry`] backed by `parkline_db::Database`. Claims are conditional
//! UPDATEs, occupy/free are single transactions, so the registry stays correct
//! even with several engine processes sharing one database file.

use async_trait::async_trait;
use tracing::info;

use parkline_core::{
    Floor, FloorId, Gate, GateId, GateStatus, LotId, ParkingLot, Spot, SpotId, SpotType, Ticket,
    TicketClosure, ValidationError, Zone, ZoneChange,
};
use parkline_db::{Database, SpotScope};

use crate::error::{EngineError, EngineResult};
use crate::registry::{Counters, SearchScope, SpotRegistry};

/// Durable spot registry for one lot.
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    db: Database,
    lot: ParkingLot,
    floors: Vec<Floor>,
}

impl SqliteRegistry {
    /// Opens the registry for `lot_id`. The lot must already be imported.
    pub async fn open(db: Database, lot_id: LotId) -> EngineResult<Self> {
        let lot = db.layouts().lot(lot_id).await?;
        let floors = db.layouts().floors(lot_id).await?;

        info!(%lot_id, name = %lot.name, floors = floors.len(), "SQLite registry opened");

        Ok(SqliteRegistry { db, lot, floors })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Every gate of the lot.
    pub async fn gates(&self) -> EngineResult<Vec<Gate>> {
        Ok(self.db.gates().list_for_lot(self.lot.id).await?)
    }

    /// Puts a gate into or out of maintenance.
    pub async fn set_gate_status(&self, gate_id: GateId, status: GateStatus) -> EngineResult<()> {
        if self.gate(gate_id).await?.is_none() {
            return Err(ValidationError::UnknownGate(gate_id).into());
        }
        self.db.gates().set_status(gate_id, status).await?;
        info!(%gate_id, ?status, "Gate status changed");
        Ok(())
    }

    fn owns_floor(&self, floor_id: FloorId) -> bool {
        self.floors.iter().any(|f| f.id == floor_id)
    }
}

#[async_trait]
impl SpotRegistry for SqliteRegistry {
    async fn lot(&self) -> EngineResult<ParkingLot> {
        Ok(self.lot.clone())
    }

    async fn floors(&self) -> EngineResult<Vec<Floor>> {
        Ok(self.floors.clone())
    }

    async fn zones_on_floor(&self, floor_id: FloorId) -> EngineResult<Vec<Zone>> {
        Ok(self.db.zones().list_for_floor(floor_id).await?)
    }

    async fn gate(&self, gate_id: GateId) -> EngineResult<Option<Gate>> {
        let gate = self.db.gates().get(gate_id).await?;
        Ok(gate.filter(|g| self.owns_floor(g.floor_id)))
    }

    async fn spot(&self, spot_id: SpotId) -> EngineResult<Option<Spot>> {
        let spot = self.db.spots().get(spot_id).await?;
        Ok(spot.filter(|s| self.owns_floor(s.floor_id)))
    }

    async fn find_candidates(
        &self,
        spot_type: SpotType,
        scope: SearchScope,
        limit: usize,
    ) -> EngineResult<Vec<Spot>> {
        let scope = match scope {
            SearchScope::Zone(zone_id) => SpotScope::Zone(zone_id),
            SearchScope::NearestTo(gate_id) => SpotScope::NearestTo(gate_id),
            SearchScope::Anywhere => SpotScope::Lot(self.lot.id),
        };
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        Ok(self.db.spots().find_vacant(spot_type, scope, limit).await?)
    }

    async fn try_reserve(&self, spot_id: SpotId) -> EngineResult<bool> {
        Ok(self.db.spots().try_reserve(spot_id).await?)
    }

    async fn cancel_reservation(&self, spot_id: SpotId) -> EngineResult<bool> {
        Ok(self.db.spots().cancel_reservation(spot_id).await?)
    }

    async fn occupy(&self, ticket: &Ticket) -> EngineResult<()> {
        if ticket.lot_id != self.lot.id {
            return Err(EngineError::invariant(format!(
                "ticket {} belongs to lot {}, registry serves lot {}",
                ticket.id, ticket.lot_id, self.lot.id
            )));
        }
        Ok(self.db.spots().occupy_with_ticket(ticket).await?)
    }

    async fn free(
        &self,
        spot_id: SpotId,
        closure: Option<&TicketClosure>,
    ) -> EngineResult<Option<String>> {
        Ok(self.db.spots().free(spot_id, closure).await?)
    }

    async fn ticket(&self, ticket_id: &str) -> EngineResult<Option<Ticket>> {
        let ticket = self.db.tickets().get(ticket_id).await?;
        Ok(ticket.filter(|t| t.lot_id == self.lot.id))
    }

    async fn reserved_spots(&self) -> EngineResult<Vec<SpotId>> {
        Ok(self.db.spots().list_reserved(self.lot.id).await?)
    }

    async fn apply_zone_changes(&self, changes: &[ZoneChange]) -> EngineResult<()> {
        Ok(self.db.zones().apply_changes(changes).await?)
    }

    async fn counters(&self) -> EngineResult<Counters> {
        let layouts = self.db.layouts();
        Ok(Counters {
            per_type: layouts.type_counts(self.lot.id).await?,
            zones: layouts.zone_counts(self.lot.id).await?,
            floors: layouts.floor_counts(self.lot.id).await?,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
