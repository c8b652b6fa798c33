//! # Allocation Strategies
//!
//! The three policies a lot can run, chosen once at configuration time and
//! dispatched through [`AllocationStrategy::plan`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Strategy          Search plan            Exclusion scope              │
//! │  ────────────────  ─────────────────────  ──────────────────────────── │
//! │  NearestToGate     Proximity(entry gate)  (spot type, entry gate)      │
//! │  NearestToExit     Proximity(exit gate)   (spot type, exit gate)       │
//! │  ZoneBased         Zoned(entry floor)     one floor's zone pointer     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A strategy only says *where* to look. Claiming the spot is the
//! allocator's job.

use serde::{Deserialize, Serialize};

use parkline_core::{AllocationContext, FloorId, GateId, ParkingLot, Spot, SpotType, StrategyKind};

use crate::error::{EngineError, EngineResult};
use crate::registry::{SearchScope, SpotRegistry};

/// Configured allocation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocationStrategy {
    NearestToGate,
    ZoneBased,
    /// `exit_gate` is the lot's designated exit unless the arrival names one.
    NearestToExit { exit_gate: Option<GateId> },
}

/// Where one allocation call searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPlan {
    /// Rank by distance to `gate_id`; spots without a distance are skipped.
    Proximity { gate_id: GateId },
    /// Walk zone pointers starting at `start_floor`.
    Zoned { start_floor: FloorId },
}

impl AllocationStrategy {
    /// Resolves the configured kind against the lot.
    ///
    /// A configured exit gate takes precedence over the lot's designation.
    pub fn configure(
        kind: StrategyKind,
        lot: &ParkingLot,
        configured_exit: Option<GateId>,
    ) -> Self {
        match kind {
            StrategyKind::NearestToGate => AllocationStrategy::NearestToGate,
            StrategyKind::ZoneBased => AllocationStrategy::ZoneBased,
            StrategyKind::NearestToExit => AllocationStrategy::NearestToExit {
                exit_gate: configured_exit.or(lot.exit_gate_id),
            },
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            AllocationStrategy::NearestToGate => StrategyKind::NearestToGate,
            AllocationStrategy::ZoneBased => StrategyKind::ZoneBased,
            AllocationStrategy::NearestToExit { .. } => StrategyKind::NearestToExit,
        }
    }

    /// Search plan for one arrival.
    pub fn plan(&self, ctx: &AllocationContext) -> EngineResult<SearchPlan> {
        match self {
            AllocationStrategy::NearestToGate => Ok(SearchPlan::Proximity {
                gate_id: ctx.entry_gate_id,
            }),
            AllocationStrategy::ZoneBased => Ok(SearchPlan::Zoned {
                start_floor: ctx.floor_id,
            }),
            AllocationStrategy::NearestToExit { exit_gate } => ctx
                .exit_gate_id
                .or(*exit_gate)
                .map(|gate_id| SearchPlan::Proximity { gate_id })
                .ok_or_else(|| {
                    EngineError::InvalidConfig(format!(
                        "nearest_to_exit needs an exit gate for lot {}",
                        ctx.lot_id
                    ))
                }),
        }
    }
}

/// The best VACANT spot in `scope`, if any.
pub async fn first_candidate(
    registry: &dyn SpotRegistry,
    spot_type: SpotType,
    scope: SearchScope,
) -> EngineResult<Option<Spot>> {
    let mut candidates = registry.find_candidates(spot_type, scope, 1).await?;
    Ok(candidates.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRegistry;
    use crate::testing;
    use parkline_core::{LotId, SpotId, ZoneId};

    fn ctx() -> AllocationContext {
        AllocationContext {
            lot_id: LotId(1),
            entry_gate_id: GateId(1),
            floor_id: FloorId(1),
            exit_gate_id: None,
        }
    }

    #[test]
    fn test_plans() {
        let lot = testing::two_floor_layout().lot;

        let gate = AllocationStrategy::configure(StrategyKind::NearestToGate, &lot, None);
        assert_eq!(
            gate.plan(&ctx()).unwrap(),
            SearchPlan::Proximity { gate_id: GateId(1) }
        );

        let zoned = AllocationStrategy::configure(StrategyKind::ZoneBased, &lot, None);
        assert_eq!(
            zoned.plan(&ctx()).unwrap(),
            SearchPlan::Zoned { start_floor: FloorId(1) }
        );

        let exit = AllocationStrategy::configure(StrategyKind::NearestToExit, &lot, None);
        assert_eq!(
            exit.plan(&ctx()).unwrap(),
            SearchPlan::Proximity { gate_id: GateId(2) }
        );
        assert_eq!(exit.kind(), StrategyKind::NearestToExit);
    }

    #[test]
    fn test_exit_gate_precedence() {
        let mut lot = testing::two_floor_layout().lot;
        let configured =
            AllocationStrategy::configure(StrategyKind::NearestToExit, &lot, Some(GateId(7)));
        assert_eq!(
            configured.plan(&ctx()).unwrap(),
            SearchPlan::Proximity { gate_id: GateId(7) }
        );

        let per_arrival = AllocationContext {
            exit_gate_id: Some(GateId(9)),
            ..ctx()
        };
        assert_eq!(
            configured.plan(&per_arrival).unwrap(),
            SearchPlan::Proximity { gate_id: GateId(9) }
        );

        lot.exit_gate_id = None;
        let missing = AllocationStrategy::configure(StrategyKind::NearestToExit, &lot, None);
        assert!(missing.plan(&ctx()).unwrap_err().is_config_error());
    }

    #[tokio::test]
    async fn test_first_candidate_respects_scope() {
        let registry = MemoryRegistry::new(testing::two_floor_layout()).unwrap();

        let nearest = first_candidate(&registry, SpotType::Compact, SearchScope::NearestTo(GateId(1)))
            .await
            .unwrap();
        assert_eq!(nearest.map(|s| s.id), Some(SpotId(101)));

        let in_zone = first_candidate(&registry, SpotType::Large, SearchScope::Zone(ZoneId(11)))
            .await
            .unwrap();
        assert!(in_zone.is_none());

        // Only spot 100 has a distance to the exit gate.
        let exit = first_candidate(&registry, SpotType::Compact, SearchScope::NearestTo(GateId(2)))
            .await
            .unwrap();
        assert_eq!(exit.map(|s| s.id), Some(SpotId(100)));
    }
}
