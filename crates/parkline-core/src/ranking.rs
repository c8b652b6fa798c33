//! # Candidate Ranking
//!
//! Pure ordering rules shared by every allocation strategy.
//!
//! ## Ordering Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  nearest_to_gate / nearest_to_exit                                      │
//! │    key = (distance ASC, spot_id ASC)                                    │
//! │    spots without a proximity row to the gate are NOT candidates         │
//! │                                                                         │
//! │  zone_based                                                             │
//! │    key = spot_id ASC inside the active zone                             │
//! │                                                                         │
//! │  Same inputs → same pick. Ties never depend on hash or insert order.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::SpotId;

// =============================================================================
// Strategy Kind
// =============================================================================

/// Which allocation policy the lot runs. Chosen once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Closest vacant spot to the entry gate.
    #[default]
    NearestToGate,

    /// Fill zones one at a time in priority order (traffic control).
    ZoneBased,

    /// Closest vacant spot to the lot's designated exit.
    NearestToExit,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::NearestToGate => write!(f, "nearest_to_gate"),
            StrategyKind::ZoneBased => write!(f, "zone_based"),
            StrategyKind::NearestToExit => write!(f, "nearest_to_exit"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "nearest_to_gate" | "nearest_gate" | "gate" => Ok(StrategyKind::NearestToGate),
            "zone_based" | "zone" | "traffic_control" => Ok(StrategyKind::ZoneBased),
            "nearest_to_exit" | "nearest_exit" | "exit" => Ok(StrategyKind::NearestToExit),
            _ => Err(ValidationError::NotAllowed {
                field: "strategy".to_string(),
                allowed: vec![
                    "nearest_to_gate".into(),
                    "zone_based".into(),
                    "nearest_to_exit".into(),
                ],
            }),
        }
    }
}

// =============================================================================
// Ranking
// =============================================================================

/// A spot paired with its distance to the ranking gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedSpot {
    pub spot_id: SpotId,
    pub distance: u32,
}

/// Orders spots by `(distance, spot_id)`.
///
/// Entries with `None` distance (no proximity row) are dropped.
pub fn rank_by_distance(
    candidates: impl IntoIterator<Item = (SpotId, Option<u32>)>,
) -> Vec<RankedSpot> {
    let mut ranked: Vec<RankedSpot> = candidates
        .into_iter()
        .filter_map(|(spot_id, distance)| distance.map(|distance| RankedSpot { spot_id, distance }))
        .collect();
    ranked.sort_unstable_by_key(|r| (r.distance, r.spot_id));
    ranked
}

/// Orders spots by identity only (zone-based ordering).
pub fn rank_by_identity(candidates: impl IntoIterator<Item = SpotId>) -> Vec<SpotId> {
    let mut ids: Vec<SpotId> = candidates.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!(
            "nearest_to_gate".parse::<StrategyKind>().unwrap(),
            StrategyKind::NearestToGate
        );
        assert_eq!("zone-based".parse::<StrategyKind>().unwrap(), StrategyKind::ZoneBased);
        assert_eq!("EXIT".parse::<StrategyKind>().unwrap(), StrategyKind::NearestToExit);
        assert!("random".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_equal_distance_breaks_on_id() {
        let ranked = rank_by_distance([
            (SpotId(9), Some(4)),
            (SpotId(3), Some(4)),
            (SpotId(7), Some(1)),
        ]);
        let ids: Vec<_> = ranked.iter().map(|r| r.spot_id).collect();
        assert_eq!(ids, vec![SpotId(7), SpotId(3), SpotId(9)]);
    }

    #[test]
    fn test_unknown_distance_excluded() {
        let ranked = rank_by_distance([(SpotId(1), None), (SpotId(2), Some(50))]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].spot_id, SpotId(2));
    }

    proptest! {
        #[test]
        fn ranking_is_independent_of_input_order(
            mut rows in proptest::collection::vec((0i64..500, 0u32..20), 0..60)
        ) {
            rows.sort_unstable_by_key(|r| r.0);
            rows.dedup_by_key(|r| r.0);

            let forward = rank_by_distance(rows.iter().map(|(id, d)| (SpotId(*id), Some(*d))));
            let backward = rank_by_distance(rows.iter().rev().map(|(id, d)| (SpotId(*id), Some(*d))));
            prop_assert_eq!(&forward, &backward);

            for pair in forward.windows(2) {
                prop_assert!((pair[0].distance, pair[0].spot_id) < (pair[1].distance, pair[1].spot_id));
            }
        }
    }
}
