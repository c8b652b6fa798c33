//! # Spot Repository
//!
//! The durable spot registry: candidate search, the atomic claim primitive,
//! and the occupy/free transitions that move tickets and counters together.
//!
//! ## Spot Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Spot Transitions                                  │
//! │                                                                         │
//! │  try_reserve         UPDATE spots SET status='reserved'                 │
//! │                      WHERE id=? AND status='vacant'     (1 statement)   │
//! │                                                                         │
//! │  cancel_reservation  RESERVED → VACANT                  (1 statement)   │
//! │                                                                         │
//! │  occupy_with_ticket  BEGIN                                              │
//! │                        RESERVED → OCCUPIED (+ticket_id)                 │
//! │                        INSERT ticket                                    │
//! │                        zone / floor / type counters + 1                 │
//! │                      COMMIT                                             │
//! │                                                                         │
//! │  free                BEGIN                                              │
//! │                        close the spot's ACTIVE ticket                   │
//! │                        OCCUPIED → VACANT                                │
//! │                        zone / floor / type counters - 1                 │
//! │                      COMMIT        (VACANT spot: no-op, returns None)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use parkline_core::{
    FloorId, GateId, LotId, Spot, SpotId, SpotStatus, SpotType, Ticket, TicketClosure, ZoneId,
};

const SPOT_COLUMNS: &str = "s.id, s.floor_id, s.zone_id, s.code, s.spot_type, s.status, s.ticket_id";

/// Where to look for vacant spots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotScope {
    /// One zone, ordered by spot id.
    Zone(ZoneId),
    /// Spots with a proximity row to the gate, ordered by (distance, id).
    NearestTo(GateId),
    /// Whole lot, ordered by spot id.
    Lot(LotId),
}

/// Repository for spot database operations.
#[derive(Debug, Clone)]
pub struct SpotRepository {
    pool: SqlitePool,
}

impl SpotRepository {
    /// Creates a new SpotRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SpotRepository { pool }
    }

    /// Gets a spot by ID.
    pub async fn get(&self, spot_id: SpotId) -> DbResult<Option<Spot>> {
        let spot = sqlx::query_as::<_, Spot>(&format!(
            "SELECT {SPOT_COLUMNS} FROM spots s WHERE s.id = ?1"
        ))
        .bind(spot_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(spot)
    }

    /// Vacant spots of `spot_type` inside `scope`, in ranking order.
    pub async fn find_vacant(
        &self,
        spot_type: SpotType,
        scope: SpotScope,
        limit: u32,
    ) -> DbResult<Vec<Spot>> {
        let (sql, key) = match scope {
            SpotScope::Zone(zone_id) => (
                format!(
                    r#"
                    SELECT {SPOT_COLUMNS}
                    FROM spots s
                    WHERE s.zone_id = ?1 AND s.spot_type = ?2 AND s.status = 'vacant'
                    ORDER BY s.id
                    LIMIT ?3
                    "#
                ),
                zone_id.get(),
            ),
            SpotScope::NearestTo(gate_id) => (
                format!(
                    r#"
                    SELECT {SPOT_COLUMNS}
                    FROM spots s
                    JOIN spot_proximity p ON p.spot_id = s.id
                    WHERE p.gate_id = ?1 AND s.spot_type = ?2 AND s.status = 'vacant'
                    ORDER BY p.distance, s.id
                    LIMIT ?3
                    "#
                ),
                gate_id.get(),
            ),
            SpotScope::Lot(lot_id) => (
                format!(
                    r#"
                    SELECT {SPOT_COLUMNS}
                    FROM spots s
                    JOIN floors f ON f.id = s.floor_id
                    WHERE f.lot_id = ?1 AND s.spot_type = ?2 AND s.status = 'vacant'
                    ORDER BY s.id
                    LIMIT ?3
                    "#
                ),
                lot_id.get(),
            ),
        };

        let spots = sqlx::query_as::<_, Spot>(&sql)
            .bind(key)
            .bind(spot_type)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        debug!(?scope, %spot_type, found = spots.len(), "Vacant spot search");
        Ok(spots)
    }

    /// Atomically claims a VACANT spot. `false` means the race was lost.
    pub async fn try_reserve(&self, spot_id: SpotId) -> DbResult<bool> {
        let result = sqlx::query("UPDATE spots SET status = 'reserved' WHERE id = ?1 AND status = 'vacant'")
            .bind(spot_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns a RESERVED spot to VACANT. `false` if it was not reserved.
    pub async fn cancel_reservation(&self, spot_id: SpotId) -> DbResult<bool> {
        let result = sqlx::query("UPDATE spots SET status = 'vacant' WHERE id = ?1 AND status = 'reserved'")
            .bind(spot_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// RESERVED → OCCUPIED together with the ticket insert and counters.
    ///
    /// ## Errors
    /// - `StateConflict` if the spot is not RESERVED
    /// - `NotFound` if the spot does not exist
    pub async fn occupy_with_ticket(&self, ticket: &Ticket) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let claimed: Option<(ZoneId, FloorId, SpotType)> = sqlx::query_as(
            r#"
            UPDATE spots SET status = 'occupied', ticket_id = ?2
            WHERE id = ?1 AND status = 'reserved'
            RETURNING zone_id, floor_id, spot_type
            "#,
        )
        .bind(ticket.spot_id)
        .bind(&ticket.id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((zone_id, floor_id, spot_type)) = claimed else {
            let current = current_state(&mut tx, ticket.spot_id).await?;
            return Err(match current {
                None => DbError::not_found("Spot", ticket.spot_id),
                Some((status, holder)) => DbError::conflict(format!(
                    "cannot occupy spot {} with ticket {}: spot is {:?} (ticket {:?})",
                    ticket.spot_id, ticket.id, status, holder
                )),
            });
        };

        sqlx::query(
            r#"
            INSERT INTO tickets (
                id, lot_id, plate, vehicle_type, spot_id, entry_gate_id,
                entry_time, exit_gate_id, exit_time, status, fee_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&ticket.id)
        .bind(ticket.lot_id)
        .bind(&ticket.plate)
        .bind(ticket.vehicle_type)
        .bind(ticket.spot_id)
        .bind(ticket.entry_gate_id)
        .bind(ticket.entry_time)
        .bind(ticket.exit_gate_id)
        .bind(ticket.exit_time)
        .bind(ticket.status)
        .bind(ticket.fee_cents)
        .execute(&mut *tx)
        .await?;

        adjust_counters(&mut tx, ticket.lot_id, zone_id, floor_id, spot_type, 1).await?;

        tx.commit().await?;

        debug!(spot_id = %ticket.spot_id, ticket_id = %ticket.id, "Spot occupied");
        Ok(())
    }

    /// OCCUPIED → VACANT, closing the spot's ticket and decrementing counters.
    ///
    /// `closure` carries exit data; without it the ticket is closed with the
    /// current time and no fee (administrative release). When given, its
    /// `ticket_id` must match the ticket holding the spot.
    ///
    /// ## Returns
    /// - `Some(ticket_id)` when a transition happened
    /// - `None` when the spot was already VACANT (idempotent retry)
    ///
    /// ## Errors
    /// - `StateConflict` for a RESERVED spot or a ticket mismatch
    /// - `NotFound` if the spot does not exist
    pub async fn free(
        &self,
        spot_id: SpotId,
        closure: Option<&TicketClosure>,
    ) -> DbResult<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let (exit_gate_id, exit_time, fee_cents) = match closure {
            Some(c) => (Some(c.exit_gate_id), c.exit_time, Some(c.fee_cents)),
            None => (None, Utc::now(), None),
        };

        let closed: Option<(String, LotId)> = sqlx::query_as(
            r#"
            UPDATE tickets SET
                status = 'closed',
                exit_gate_id = ?2,
                exit_time = ?3,
                fee_cents = ?4
            WHERE spot_id = ?1 AND status = 'active'
            RETURNING id, lot_id
            "#,
        )
        .bind(spot_id)
        .bind(exit_gate_id)
        .bind(exit_time)
        .bind(fee_cents)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((ticket_id, lot_id)) = closed else {
            return match current_state(&mut tx, spot_id).await? {
                None => Err(DbError::not_found("Spot", spot_id)),
                Some((SpotStatus::Vacant, _)) => {
                    debug!(%spot_id, "Free on vacant spot, nothing to do");
                    Ok(None)
                }
                Some((status, holder)) => Err(DbError::conflict(format!(
                    "cannot free spot {spot_id}: spot is {status:?} (ticket {holder:?}) without an active ticket"
                ))),
            };
        };

        if let Some(c) = closure {
            if c.ticket_id != ticket_id {
                warn!(%spot_id, expected = %c.ticket_id, actual = %ticket_id, "Ticket mismatch on free");
                return Err(DbError::conflict(format!(
                    "spot {spot_id} is held by ticket {ticket_id}, not {}",
                    c.ticket_id
                )));
            }
        }

        let released: Option<(ZoneId, FloorId, SpotType)> = sqlx::query_as(
            r#"
            UPDATE spots SET status = 'vacant', ticket_id = NULL
            WHERE id = ?1 AND status = 'occupied' AND ticket_id = ?2
            RETURNING zone_id, floor_id, spot_type
            "#,
        )
        .bind(spot_id)
        .bind(&ticket_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((zone_id, floor_id, spot_type)) = released else {
            return Err(DbError::conflict(format!(
                "ticket {ticket_id} is active but spot {spot_id} is not occupied by it"
            )));
        };

        adjust_counters(&mut tx, lot_id, zone_id, floor_id, spot_type, -1).await?;

        tx.commit().await?;

        debug!(%spot_id, %ticket_id, "Spot freed");
        Ok(Some(ticket_id))
    }

    /// RESERVED spots of a lot. After a restart these have no live claimant.
    pub async fn list_reserved(&self, lot_id: LotId) -> DbResult<Vec<SpotId>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT s.id
            FROM spots s
            JOIN floors f ON f.id = s.floor_id
            WHERE f.lot_id = ?1 AND s.status = 'reserved'
            ORDER BY s.id
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Number of spots in each status, for diagnostics.
    pub async fn status_counts(&self, lot_id: LotId) -> DbResult<Vec<(SpotStatus, u64)>> {
        let rows: Vec<(SpotStatus, i64)> = sqlx::query_as(
            r#"
            SELECT s.status, COUNT(*)
            FROM spots s
            JOIN floors f ON f.id = s.floor_id
            WHERE f.lot_id = ?1
            GROUP BY s.status
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s, n)| (s, n as u64)).collect())
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

async fn current_state(
    tx: &mut Transaction<'_, Sqlite>,
    spot_id: SpotId,
) -> DbResult<Option<(SpotStatus, Option<String>)>> {
    let row = sqlx::query_as("SELECT status, ticket_id FROM spots WHERE id = ?1")
        .bind(spot_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row)
}

async fn adjust_counters(
    tx: &mut Transaction<'_, Sqlite>,
    lot_id: LotId,
    zone_id: ZoneId,
    floor_id: FloorId,
    spot_type: SpotType,
    delta: i64,
) -> DbResult<()> {
    sqlx::query("UPDATE zones SET occupied_count = occupied_count + ?2 WHERE id = ?1")
        .bind(zone_id)
        .bind(delta)
        .execute(&mut **tx)
        .await?;

    sqlx::query("UPDATE floors SET occupied_count = occupied_count + ?2 WHERE id = ?1")
        .bind(floor_id)
        .bind(delta)
        .execute(&mut **tx)
        .await?;

    let result = sqlx::query(
        "UPDATE type_occupancy SET occupied = occupied + ?3 WHERE lot_id = ?1 AND spot_type = ?2",
    )
    .bind(lot_id)
    .bind(spot_type)
    .bind(delta)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() != 1 {
        return Err(DbError::conflict(format!(
            "no {spot_type} counter row for lot {lot_id}"
        )));
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use crate::{Database, DbConfig};
    use parkline_core::VehicleType;
    use std::sync::Arc;

    fn ticket_for(spot_id: SpotId) -> Ticket {
        Ticket::open(LotId(1), "KA-01-1234", VehicleType::Car, spot_id, GateId(1), Utc::now())
    }

    #[tokio::test]
    async fn test_nearest_search_orders_by_distance_then_id() {
        let db = fixtures::seeded_db().await;
        let spots = db
            .spots()
            .find_vacant(SpotType::Compact, SpotScope::NearestTo(GateId(1)), 10)
            .await
            .unwrap();
        let ids: Vec<_> = spots.iter().map(|s| s.id).collect();
        // 101 and 110 tie at distance 3
        assert_eq!(ids, vec![SpotId(101), SpotId(110), SpotId(100), SpotId(200)]);
    }

    #[tokio::test]
    async fn test_zone_search_is_scoped() {
        let db = fixtures::seeded_db().await;
        let spots = db
            .spots()
            .find_vacant(SpotType::Compact, SpotScope::Zone(ZoneId(10)), 10)
            .await
            .unwrap();
        let ids: Vec<_> = spots.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SpotId(100), SpotId(101)]);

        let large = db
            .spots()
            .find_vacant(SpotType::Large, SpotScope::Lot(LotId(1)), 10)
            .await
            .unwrap();
        assert_eq!(large.len(), 1);
    }

    #[tokio::test]
    async fn test_try_reserve_is_conditional() {
        let db = fixtures::seeded_db().await;
        assert!(db.spots().try_reserve(SpotId(100)).await.unwrap());
        assert!(!db.spots().try_reserve(SpotId(100)).await.unwrap());

        let spot = db.spots().get(SpotId(100)).await.unwrap().unwrap();
        assert_eq!(spot.status, SpotStatus::Reserved);

        assert!(db.spots().cancel_reservation(SpotId(100)).await.unwrap());
        assert!(!db.spots().cancel_reservation(SpotId(100)).await.unwrap());
        assert!(db.spots().try_reserve(SpotId(100)).await.unwrap());
        assert_eq!(db.spots().list_reserved(LotId(1)).await.unwrap(), vec![SpotId(100)]);
    }

    #[tokio::test]
    async fn test_occupy_requires_reservation() {
        let db = fixtures::seeded_db().await;
        let err = db
            .spots()
            .occupy_with_ticket(&ticket_for(SpotId(100)))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Nothing leaked
        assert!(db.tickets().active_for_spot(SpotId(100)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_occupy_free_roundtrip_restores_counters() {
        let db = fixtures::seeded_db().await;
        let before = db.layouts().zone_counts(LotId(1)).await.unwrap();

        let ticket = ticket_for(SpotId(101));
        assert!(db.spots().try_reserve(SpotId(101)).await.unwrap());
        db.spots().occupy_with_ticket(&ticket).await.unwrap();

        let during = db.layouts().zone_counts(LotId(1)).await.unwrap();
        assert_eq!(during[&ZoneId(10)], 1);
        let floors = db.layouts().floor_counts(LotId(1)).await.unwrap();
        assert_eq!(floors[&FloorId(1)], 1);

        let closure = TicketClosure {
            ticket_id: ticket.id.clone(),
            exit_gate_id: GateId(2),
            exit_time: Utc::now(),
            fee_cents: 300,
        };
        let freed = db.spots().free(SpotId(101), Some(&closure)).await.unwrap();
        assert_eq!(freed.as_deref(), Some(ticket.id.as_str()));

        let after = db.layouts().zone_counts(LotId(1)).await.unwrap();
        assert_eq!(before, after);

        let stored = db.tickets().get(&ticket.id).await.unwrap().unwrap();
        assert!(!stored.is_active());
        assert_eq!(stored.fee_cents, Some(300));
        assert_eq!(stored.exit_gate_id, Some(GateId(2)));
    }

    #[tokio::test]
    async fn test_free_is_idempotent() {
        let db = fixtures::seeded_db().await;
        let ticket = ticket_for(SpotId(110));
        db.spots().try_reserve(SpotId(110)).await.unwrap();
        db.spots().occupy_with_ticket(&ticket).await.unwrap();

        assert!(db.spots().free(SpotId(110), None).await.unwrap().is_some());
        assert!(db.spots().free(SpotId(110), None).await.unwrap().is_none());

        let counts = db.layouts().type_counts(LotId(1)).await.unwrap();
        assert!(counts.iter().all(|(_, _, occupied)| *occupied == 0));
    }

    #[tokio::test]
    async fn test_free_with_wrong_ticket_rolls_back() {
        let db = fixtures::seeded_db().await;
        let ticket = ticket_for(SpotId(100));
        db.spots().try_reserve(SpotId(100)).await.unwrap();
        db.spots().occupy_with_ticket(&ticket).await.unwrap();

        let closure = TicketClosure {
            ticket_id: "someone-else".to_string(),
            exit_gate_id: GateId(2),
            exit_time: Utc::now(),
            fee_cents: 0,
        };
        assert!(db
            .spots()
            .free(SpotId(100), Some(&closure))
            .await
            .unwrap_err()
            .is_conflict());

        let spot = db.spots().get(SpotId(100)).await.unwrap().unwrap();
        assert_eq!(spot.status, SpotStatus::Occupied);
        assert!(db.tickets().get(&ticket.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_free_reserved_spot_is_conflict() {
        let db = fixtures::seeded_db().await;
        db.spots().try_reserve(SpotId(200)).await.unwrap();
        assert!(db.spots().free(SpotId(200), None).await.unwrap_err().is_conflict());
        assert!(matches!(
            db.spots().free(SpotId(999), None).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reserve_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("claims.db")).max_connections(8))
            .await
            .unwrap();
        db.layouts().import(&fixtures::layout()).await.unwrap();
        let db = Arc::new(db);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                db.spots().try_reserve(SpotId(100)).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
