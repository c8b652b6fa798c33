//! # Zone Repository
//!
//! Zone records and persistence of zone state machine transitions.
//!
//! Transitions arrive as [`ZoneChange`]s computed by `FloorZones` while the
//! engine holds the floor's exclusion. Each change is applied as a
//! compare-and-set on the `from` status, all in one transaction.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use parkline_core::{FloorId, Zone, ZoneChange, ZoneId, ZoneStatus};

/// Repository for zone database operations.
#[derive(Debug, Clone)]
pub struct ZoneRepository {
    pool: SqlitePool,
}

impl ZoneRepository {
    /// Creates a new ZoneRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ZoneRepository { pool }
    }

    /// Gets a zone by ID.
    pub async fn get(&self, zone_id: ZoneId) -> DbResult<Option<Zone>> {
        let zone = sqlx::query_as::<_, Zone>(
            "SELECT id, floor_id, name, fill_priority, status FROM zones WHERE id = ?1",
        )
        .bind(zone_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(zone)
    }

    /// Zones of a floor in activation order.
    pub async fn list_for_floor(&self, floor_id: FloorId) -> DbResult<Vec<Zone>> {
        let zones = sqlx::query_as::<_, Zone>(
            r#"
            SELECT id, floor_id, name, fill_priority, status
            FROM zones
            WHERE floor_id = ?1
            ORDER BY fill_priority
            "#,
        )
        .bind(floor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(zones)
    }

    /// Applies zone transitions atomically.
    ///
    /// Changes leaving ACTIVE are written before changes entering it so the
    /// one-active-zone-per-floor index never sees two at once.
    pub async fn apply_changes(&self, changes: &[ZoneChange]) -> DbResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut ordered: Vec<&ZoneChange> = changes.iter().collect();
        ordered.sort_by_key(|c| c.to == ZoneStatus::Active);

        let mut tx = self.pool.begin().await?;

        for change in ordered {
            let result = sqlx::query("UPDATE zones SET status = ?3 WHERE id = ?1 AND status = ?2")
                .bind(change.zone_id)
                .bind(change.from)
                .bind(change.to)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() != 1 {
                return Err(DbError::conflict(format!(
                    "zone {} is no longer {}",
                    change.zone_id, change.from
                )));
            }

            debug!(zone_id = %change.zone_id, from = %change.from, to = %change.to, "Zone transition");
        }

        tx.commit().await?;
        Ok(())
    }

    /// Occupied count of one zone.
    pub async fn occupied_count(&self, zone_id: ZoneId) -> DbResult<u64> {
        let count: Option<i64> = sqlx::query_scalar("SELECT occupied_count FROM zones WHERE id = ?1")
            .bind(zone_id)
            .fetch_optional(&self.pool)
            .await?;
        count
            .map(|n| n as u64)
            .ok_or_else(|| DbError::not_found("Zone", zone_id))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;

    #[tokio::test]
    async fn test_list_for_floor_in_priority_order() {
        let db = fixtures::seeded_db().await;
        let zones = db.zones().list_for_floor(FloorId(1)).await.unwrap();
        let ids: Vec<_> = zones.iter().map(|z| z.id).collect();
        assert_eq!(ids, vec![ZoneId(10), ZoneId(11)]);
        assert_eq!(zones[0].status, ZoneStatus::Active);
    }

    #[tokio::test]
    async fn test_apply_advance_changes() {
        let db = fixtures::seeded_db().await;
        // Activation listed first on purpose
        let changes = [
            ZoneChange {
                zone_id: ZoneId(11),
                from: ZoneStatus::Available,
                to: ZoneStatus::Active,
            },
            ZoneChange {
                zone_id: ZoneId(10),
                from: ZoneStatus::Active,
                to: ZoneStatus::Full,
            },
        ];
        db.zones().apply_changes(&changes).await.unwrap();

        let a = db.zones().get(ZoneId(10)).await.unwrap().unwrap();
        let b = db.zones().get(ZoneId(11)).await.unwrap().unwrap();
        assert_eq!(a.status, ZoneStatus::Full);
        assert_eq!(b.status, ZoneStatus::Active);
    }

    #[tokio::test]
    async fn test_stale_change_rejected_atomically() {
        let db = fixtures::seeded_db().await;
        let changes = [
            ZoneChange {
                zone_id: ZoneId(10),
                from: ZoneStatus::Active,
                to: ZoneStatus::Full,
            },
            ZoneChange {
                zone_id: ZoneId(11),
                from: ZoneStatus::Full,
                to: ZoneStatus::Active,
            },
        ];
        assert!(db.zones().apply_changes(&changes).await.unwrap_err().is_conflict());

        // First change rolled back with the second
        let a = db.zones().get(ZoneId(10)).await.unwrap().unwrap();
        assert_eq!(a.status, ZoneStatus::Active);
    }

    #[tokio::test]
    async fn test_second_active_zone_rejected_by_schema() {
        let db = fixtures::seeded_db().await;
        let changes = [ZoneChange {
            zone_id: ZoneId(11),
            from: ZoneStatus::Available,
            to: ZoneStatus::Active,
        }];
        let err = db.zones().apply_changes(&changes).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }
}
