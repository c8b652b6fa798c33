//! # Layout Repository
//!
//! Imports a validated [`LotLayout`] and reads it back, plus the
//! incrementally maintained occupancy counters.
//!
//! ## Counter Tables
//! ```text
//! type_occupancy (lot, spot_type) ── total / occupied   per-type availability
//! zones.occupied_count                                  per-zone
//! floors.occupied_count                                 per-floor
//! ```
//!
//! Counters are seeded here from the imported spot states and afterwards
//! only touched by `SpotRepository::occupy_with_ticket` / `free`.

use std::collections::BTreeMap;

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use parkline_core::{
    Floor, FloorId, Gate, LotId, LotLayout, ParkingLot, Proximity, Spot, SpotStatus, SpotType,
    Zone, ZoneId,
};

/// Repository for lot layout import/export.
#[derive(Debug, Clone)]
pub struct LayoutRepository {
    pool: SqlitePool,
}

impl LayoutRepository {
    /// Creates a new LayoutRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LayoutRepository { pool }
    }

    /// Writes a whole layout in one transaction.
    ///
    /// The layout is validated first; ids must not exist yet.
    pub async fn import(&self, layout: &LotLayout) -> DbResult<()> {
        layout
            .validate()
            .map_err(|e| DbError::InvalidData(e.to_string()))?;

        info!(
            lot_id = %layout.lot.id,
            floors = layout.floors.len(),
            zones = layout.zones.len(),
            spots = layout.spots.len(),
            gates = layout.gates.len(),
            "Importing lot layout"
        );

        let occupied = |spot: &&Spot| spot.status == SpotStatus::Occupied;

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO lots (id, name, exit_gate_id) VALUES (?1, ?2, ?3)")
            .bind(layout.lot.id)
            .bind(&layout.lot.name)
            .bind(layout.lot.exit_gate_id)
            .execute(&mut *tx)
            .await?;

        for floor in &layout.floors {
            let count = layout
                .spots
                .iter()
                .filter(|s| s.floor_id == floor.id)
                .filter(occupied)
                .count() as i64;
            sqlx::query(
                "INSERT INTO floors (id, lot_id, level, name, occupied_count) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(floor.id)
            .bind(floor.lot_id)
            .bind(floor.level)
            .bind(&floor.name)
            .bind(count)
            .execute(&mut *tx)
            .await?;
        }

        for zone in &layout.zones {
            let count = layout
                .spots
                .iter()
                .filter(|s| s.zone_id == zone.id)
                .filter(occupied)
                .count() as i64;
            sqlx::query(
                r#"
                INSERT INTO zones (id, floor_id, name, fill_priority, status, occupied_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(zone.id)
            .bind(zone.floor_id)
            .bind(&zone.name)
            .bind(zone.fill_priority)
            .bind(zone.status)
            .bind(count)
            .execute(&mut *tx)
            .await?;
        }

        for spot in &layout.spots {
            sqlx::query(
                r#"
                INSERT INTO spots (id, floor_id, zone_id, code, spot_type, status, ticket_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(spot.id)
            .bind(spot.floor_id)
            .bind(spot.zone_id)
            .bind(&spot.code)
            .bind(spot.spot_type)
            .bind(spot.status)
            .bind(&spot.ticket_id)
            .execute(&mut *tx)
            .await?;
        }

        for gate in &layout.gates {
            sqlx::query(
                "INSERT INTO gates (id, floor_id, name, gate_type, status) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(gate.id)
            .bind(gate.floor_id)
            .bind(&gate.name)
            .bind(gate.gate_type)
            .bind(gate.status)
            .execute(&mut *tx)
            .await?;
        }

        for row in &layout.proximity {
            sqlx::query("INSERT INTO spot_proximity (spot_id, gate_id, distance) VALUES (?1, ?2, ?3)")
                .bind(row.spot_id)
                .bind(row.gate_id)
                .bind(row.distance)
                .execute(&mut *tx)
                .await?;
        }

        for spot_type in SpotType::ALL {
            let of_type = || layout.spots.iter().filter(move |s| s.spot_type == spot_type);
            let total = of_type().count() as i64;
            let taken = of_type().filter(occupied).count() as i64;
            sqlx::query(
                "INSERT INTO type_occupancy (lot_id, spot_type, total, occupied) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(layout.lot.id)
            .bind(spot_type)
            .bind(total)
            .bind(taken)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(lot_id = %layout.lot.id, "Layout import committed");
        Ok(())
    }

    /// True if a lot with this id exists.
    pub async fn exists(&self, lot_id: LotId) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lots WHERE id = ?1")
            .bind(lot_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Gets the lot record.
    pub async fn lot(&self, lot_id: LotId) -> DbResult<ParkingLot> {
        sqlx::query_as::<_, ParkingLot>("SELECT id, name, exit_gate_id FROM lots WHERE id = ?1")
            .bind(lot_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Lot", lot_id))
    }

    /// Floors of a lot, ascending by level.
    pub async fn floors(&self, lot_id: LotId) -> DbResult<Vec<Floor>> {
        let floors = sqlx::query_as::<_, Floor>(
            "SELECT id, lot_id, level, name FROM floors WHERE lot_id = ?1 ORDER BY level, id",
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(floors)
    }

    /// Reads the complete layout of a lot, including current statuses.
    pub async fn load(&self, lot_id: LotId) -> DbResult<LotLayout> {
        let lot = self.lot(lot_id).await?;
        let floors = self.floors(lot_id).await?;

        let zones = sqlx::query_as::<_, Zone>(
            r#"
            SELECT z.id, z.floor_id, z.name, z.fill_priority, z.status
            FROM zones z
            JOIN floors f ON f.id = z.floor_id
            WHERE f.lot_id = ?1
            ORDER BY z.floor_id, z.fill_priority
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        let spots = sqlx::query_as::<_, Spot>(
            r#"
            SELECT s.id, s.floor_id, s.zone_id, s.code, s.spot_type, s.status, s.ticket_id
            FROM spots s
            JOIN floors f ON f.id = s.floor_id
            WHERE f.lot_id = ?1
            ORDER BY s.id
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        let gates = sqlx::query_as::<_, Gate>(
            r#"
            SELECT g.id, g.floor_id, g.name, g.gate_type, g.status
            FROM gates g
            JOIN floors f ON f.id = g.floor_id
            WHERE f.lot_id = ?1
            ORDER BY g.id
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        let proximity = sqlx::query_as::<_, Proximity>(
            r#"
            SELECT p.spot_id, p.gate_id, p.distance
            FROM spot_proximity p
            JOIN spots s ON s.id = p.spot_id
            JOIN floors f ON f.id = s.floor_id
            WHERE f.lot_id = ?1
            ORDER BY p.spot_id, p.gate_id
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(LotLayout {
            lot,
            floors,
            zones,
            spots,
            gates,
            proximity,
        })
    }

    // =========================================================================
    // Occupancy Counters
    // =========================================================================

    /// `(spot_type, total, occupied)` for every spot type of the lot.
    pub async fn type_counts(&self, lot_id: LotId) -> DbResult<Vec<(SpotType, u64, u64)>> {
        let rows: Vec<(SpotType, i64, i64)> = sqlx::query_as(
            "SELECT spot_type, total, occupied FROM type_occupancy WHERE lot_id = ?1 ORDER BY spot_type",
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(spot_type, total, occupied)| (spot_type, total as u64, occupied as u64))
            .collect())
    }

    /// Occupied count of every zone of the lot.
    pub async fn zone_counts(&self, lot_id: LotId) -> DbResult<BTreeMap<ZoneId, u64>> {
        let rows: Vec<(ZoneId, i64)> = sqlx::query_as(
            r#"
            SELECT z.id, z.occupied_count
            FROM zones z
            JOIN floors f ON f.id = z.floor_id
            WHERE f.lot_id = ?1
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id, n)| (id, n as u64)).collect())
    }

    /// Occupied count of every floor of the lot.
    pub async fn floor_counts(&self, lot_id: LotId) -> DbResult<BTreeMap<FloorId, u64>> {
        let rows: Vec<(FloorId, i64)> =
            sqlx::query_as("SELECT id, occupied_count FROM floors WHERE lot_id = ?1")
                .bind(lot_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id, n)| (id, n as u64)).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use crate::{Database, DbConfig};
    use parkline_core::ZoneStatus;

    #[tokio::test]
    async fn test_import_then_load_roundtrips() {
        let db = fixtures::seeded_db().await;
        let original = fixtures::layout();

        let loaded = db.layouts().load(LotId(1)).await.unwrap();
        assert_eq!(loaded.lot, original.lot);
        assert_eq!(loaded.spots.len(), original.spots.len());
        assert_eq!(loaded.proximity.len(), original.proximity.len());

        let zone_a = loaded.zones.iter().find(|z| z.id == ZoneId(10)).unwrap();
        assert_eq!(zone_a.status, ZoneStatus::Active);
    }

    #[tokio::test]
    async fn test_import_seeds_counters() {
        let db = fixtures::seeded_db().await;

        let counts = db.layouts().type_counts(LotId(1)).await.unwrap();
        let compact = counts
            .iter()
            .find(|(t, _, _)| *t == SpotType::Compact)
            .unwrap();
        assert_eq!((compact.1, compact.2), (4, 0));

        let zones = db.layouts().zone_counts(LotId(1)).await.unwrap();
        assert!(zones.values().all(|n| *n == 0));
    }

    #[tokio::test]
    async fn test_duplicate_import_rejected() {
        let db = fixtures::seeded_db().await;
        let err = db.layouts().import(&fixtures::layout()).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_floors_ordered_by_level() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.layouts().import(&fixtures::layout()).await.unwrap();

        let floors = db.layouts().floors(LotId(1)).await.unwrap();
        let levels: Vec<i32> = floors.iter().map(|f| f.level).collect();
        assert_eq!(levels, vec![0, 1]);
        assert!(db.layouts().exists(LotId(1)).await.unwrap());
        assert!(!db.layouts().exists(LotId(9)).await.unwrap());
    }
}
