//! # Occupancy Ledger
//!
//! The only path by which a spot becomes OCCUPIED or VACANT again. Both
//! transitions carry the ticket and the zone, floor and type counters in the
//! same atomic unit of the registry, so the counters never need recomputing.

use std::sync::Arc;

use tracing::{debug, error, info};

use parkline_core::{SpotId, Ticket, TicketClosure};

use crate::error::EngineResult;
use crate::registry::SpotRegistry;

#[derive(Clone)]
pub struct OccupancyLedger {
    registry: Arc<dyn SpotRegistry>,
}

impl OccupancyLedger {
    pub fn new(registry: Arc<dyn SpotRegistry>) -> Self {
        OccupancyLedger { registry }
    }

    /// RESERVED → OCCUPIED for `ticket.spot_id`, recording the ticket.
    ///
    /// The caller still holds the reservation and must release it if this
    /// fails.
    pub async fn occupy(&self, ticket: &Ticket) -> EngineResult<()> {
        match self.registry.occupy(ticket).await {
            Ok(()) => {
                info!(
                    spot_id = %ticket.spot_id,
                    ticket_id = %ticket.id,
                    plate = %ticket.plate,
                    "Spot occupied"
                );
                Ok(())
            }
            Err(e) => {
                if e.is_invariant_violation() {
                    error!(spot_id = %ticket.spot_id, ticket_id = %ticket.id, error = %e, "Occupancy invariant broken");
                }
                Err(e)
            }
        }
    }

    /// OCCUPIED → VACANT. Returns `false` when the spot was already VACANT.
    pub async fn free(&self, spot_id: SpotId, closure: Option<&TicketClosure>) -> EngineResult<bool> {
        match self.registry.free(spot_id, closure).await {
            Ok(Some(ticket_id)) => {
                info!(%spot_id, %ticket_id, "Spot freed");
                Ok(true)
            }
            Ok(None) => {
                debug!(%spot_id, "Spot already vacant");
                Ok(false)
            }
            Err(e) => {
                if e.is_invariant_violation() {
                    error!(%spot_id, error = %e, "Release invariant broken");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRegistry;
    use crate::testing;
    use chrono::Utc;
    use parkline_core::{FloorId, GateId, LotId, SpotStatus, SpotType, VehicleType, ZoneId};

    #[tokio::test]
    async fn test_occupy_free_roundtrip() {
        let registry = Arc::new(MemoryRegistry::new(testing::two_floor_layout()).unwrap());
        let ledger = OccupancyLedger::new(registry.clone());
        let before = registry.counters().await.unwrap();

        let ticket = Ticket::open(LotId(1), "MH-12-AB-1234", VehicleType::Car, SpotId(200), GateId(1), Utc::now());
        registry.try_reserve(SpotId(200)).await.unwrap();
        ledger.occupy(&ticket).await.unwrap();

        let during = registry.counters().await.unwrap();
        assert_eq!(during.zones[&ZoneId(20)], 1);
        assert_eq!(during.floors[&FloorId(2)], 1);
        assert_eq!(during.occupied(SpotType::Compact), 1);

        assert!(ledger.free(SpotId(200), None).await.unwrap());
        assert!(!ledger.free(SpotId(200), None).await.unwrap());

        assert_eq!(registry.counters().await.unwrap(), before);
        assert_eq!(
            registry.spot(SpotId(200)).await.unwrap().unwrap().status,
            SpotStatus::Vacant
        );
    }

    #[tokio::test]
    async fn test_second_ticket_on_occupied_spot_is_rejected() {
        let registry = Arc::new(MemoryRegistry::new(testing::two_floor_layout()).unwrap());
        let ledger = OccupancyLedger::new(registry.clone());

        let first = Ticket::open(LotId(1), "A1", VehicleType::Car, SpotId(100), GateId(1), Utc::now());
        let second = Ticket::open(LotId(1), "B2", VehicleType::Car, SpotId(100), GateId(1), Utc::now());
        registry.try_reserve(SpotId(100)).await.unwrap();
        ledger.occupy(&first).await.unwrap();

        let err = ledger.occupy(&second).await.unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(registry.ticket(&second.id).await.unwrap().is_none());
        assert_eq!(registry.counters().await.unwrap().occupied(SpotType::Compact), 1);
    }
}
