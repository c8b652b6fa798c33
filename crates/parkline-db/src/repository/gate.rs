//! # Gate Repository
//!
//! Gate lookups used for entry/exit validation, plus maintenance toggling.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};
use parkline_core::{Gate, GateId, GateStatus, LotId, SpotId};

/// Repository for gate database operations.
#[derive(Debug, Clone)]
pub struct GateRepository {
    pool: SqlitePool,
}

impl GateRepository {
    /// Creates a new GateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        GateRepository { pool }
    }

    /// Gets a gate by ID.
    pub async fn get(&self, gate_id: GateId) -> DbResult<Option<Gate>> {
        let gate = sqlx::query_as::<_, Gate>(
            "SELECT id, floor_id, name, gate_type, status FROM gates WHERE id = ?1",
        )
        .bind(gate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(gate)
    }

    /// All gates of a lot.
    pub async fn list_for_lot(&self, lot_id: LotId) -> DbResult<Vec<Gate>> {
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
        Ok(gates)
    }

    /// Puts a gate into or out of maintenance.
    pub async fn set_status(&self, gate_id: GateId, status: GateStatus) -> DbResult<()> {
        let result = sqlx::query("UPDATE gates SET status = ?2 WHERE id = ?1")
            .bind(gate_id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Gate", gate_id));
        }

        info!(%gate_id, ?status, "Gate status changed");
        Ok(())
    }

    /// Distance between a spot and a gate, if recorded.
    pub async fn distance(&self, spot_id: SpotId, gate_id: GateId) -> DbResult<Option<u32>> {
        let distance: Option<u32> = sqlx::query_scalar(
            "SELECT distance FROM spot_proximity WHERE spot_id = ?1 AND gate_id = ?2",
        )
        .bind(spot_id)
        .bind(gate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use parkline_core::GateType;

    #[tokio::test]
    async fn test_gate_lookup_and_maintenance() {
        let db = fixtures::seeded_db().await;

        let gate = db.gates().get(GateId(1)).await.unwrap().unwrap();
        assert_eq!(gate.gate_type, GateType::Entry);
        assert!(gate.is_operational());

        db.gates()
            .set_status(GateId(1), GateStatus::UnderMaintenance)
            .await
            .unwrap();
        let gate = db.gates().get(GateId(1)).await.unwrap().unwrap();
        assert!(!gate.is_operational());

        assert!(db.gates().get(GateId(77)).await.unwrap().is_none());
        assert_eq!(db.gates().list_for_lot(LotId(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_distance_lookup() {
        let db = fixtures::seeded_db().await;
        assert_eq!(db.gates().distance(SpotId(101), GateId(1)).await.unwrap(), Some(3));
        assert_eq!(db.gates().distance(SpotId(102), GateId(1)).await.unwrap(), None);
    }
}
