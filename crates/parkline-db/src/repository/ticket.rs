//! # Ticket Repository
//!
//! Read side of the ticket journal. Tickets are written only by
//! `SpotRepository::occupy_with_ticket` and closed only by
//! `SpotRepository::free`, so a ticket never exists without its spot
//! transition.

use sqlx::SqlitePool;

use crate::error::DbResult;
use parkline_core::{LotId, SpotId, Ticket};

const TICKET_COLUMNS: &str = r#"
    id, lot_id, plate, vehicle_type, spot_id, entry_gate_id,
    entry_time, exit_gate_id, exit_time, status, fee_cents
"#;

/// Repository for ticket database operations.
#[derive(Debug, Clone)]
pub struct TicketRepository {
    pool: SqlitePool,
}

impl TicketRepository {
    /// Creates a new TicketRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TicketRepository { pool }
    }

    /// Gets a ticket by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ticket)
    }

    /// The open ticket holding a spot, if any.
    pub async fn active_for_spot(&self, spot_id: SpotId) -> DbResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE spot_id = ?1 AND status = 'active'"
        ))
        .bind(spot_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ticket)
    }

    /// The open ticket for a plate, if the vehicle is inside.
    pub async fn active_by_plate(&self, plate: &str) -> DbResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>(&format!(
            r#"
            SELECT {TICKET_COLUMNS} FROM tickets
            WHERE plate = ?1 AND status = 'active'
            ORDER BY entry_time DESC
            LIMIT 1
            "#
        ))
        .bind(plate)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ticket)
    }

    /// All open tickets of a lot, oldest first.
    pub async fn list_active(&self, lot_id: LotId) -> DbResult<Vec<Ticket>> {
        let tickets = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE lot_id = ?1 AND status = 'active' ORDER BY entry_time"
        ))
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use chrono::Utc;
    use parkline_core::{GateId, VehicleType};

    #[tokio::test]
    async fn test_active_lookups() {
        let db = fixtures::seeded_db().await;
        let ticket = Ticket::open(LotId(1), "MH-12-AB-9", VehicleType::Truck, SpotId(102), GateId(1), Utc::now());

        db.spots().try_reserve(SpotId(102)).await.unwrap();
        db.spots().occupy_with_ticket(&ticket).await.unwrap();

        let by_spot = db.tickets().active_for_spot(SpotId(102)).await.unwrap().unwrap();
        assert_eq!(by_spot.id, ticket.id);
        assert_eq!(by_spot.vehicle_type, VehicleType::Truck);

        let by_plate = db.tickets().active_by_plate("MH-12-AB-9").await.unwrap().unwrap();
        assert_eq!(by_plate.spot_id, SpotId(102));

        assert_eq!(db.tickets().list_active(LotId(1)).await.unwrap().len(), 1);

        db.spots().free(SpotId(102), None).await.unwrap();
        assert!(db.tickets().active_for_spot(SpotId(102)).await.unwrap().is_none());
        assert!(db.tickets().list_active(LotId(1)).await.unwrap().is_empty());
    }
}
