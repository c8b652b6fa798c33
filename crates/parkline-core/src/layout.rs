//! # Lot Layout
//!
//! The administrative description of a lot: floors, zones, spots, gates and
//! the spot↔gate proximity table. Registries are built from a validated
//! layout; the SQLite layer imports it verbatim.
//!
//! ## Usage
//! ```rust
//! use parkline_core::layout::LotLayout;
//! use parkline_core::types::*;
//!
//! let layout = LotLayout::builder(LotId(1), "Central")
//!     .floor(FloorId(1), 0, "Ground")
//!     .zone(ZoneId(10), FloorId(1), "A", 1)
//!     .spots(ZoneId(10), SpotType::Compact, 100..=103)
//!     .gate(GateId(1), FloorId(1), "North", GateType::EntryExit)
//!     .distance(SpotId(100), GateId(1), 5)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(layout.spots.len(), 4);
//! assert_eq!(layout.zones[0].status, ZoneStatus::Active);
//! ```

use std::collections::{BTreeMap, HashSet};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{
    Floor, FloorId, Gate, GateId, GateStatus, GateType, LotId, ParkingLot, Proximity, Spot, SpotId,
    SpotStatus, SpotType, Zone, ZoneId, ZoneStatus,
};
use crate::zone::FloorZones;

/// Complete static description of one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotLayout {
    pub lot: ParkingLot,
    pub floors: Vec<Floor>,
    pub zones: Vec<Zone>,
    pub spots: Vec<Spot>,
    pub gates: Vec<Gate>,
    pub proximity: Vec<Proximity>,
}

impl LotLayout {
    /// Starts a builder for a lot.
    pub fn builder(lot_id: LotId, name: impl Into<String>) -> LotLayoutBuilder {
        LotLayoutBuilder {
            lot: ParkingLot {
                id: lot_id,
                name: name.into(),
                exit_gate_id: None,
            },
            floors: Vec::new(),
            zones: Vec::new(),
            pending_spots: Vec::new(),
            gates: Vec::new(),
            proximity: Vec::new(),
        }
    }

    /// Checks every structural rule of the layout.
    pub fn validate(&self) -> CoreResult<()> {
        let floor_ids = unique_ids("floor", self.floors.iter().map(|f| f.id))?;
        let zone_ids = unique_ids("zone", self.zones.iter().map(|z| z.id))?;
        let spot_ids = unique_ids("spot", self.spots.iter().map(|s| s.id))?;
        let gate_ids = unique_ids("gate", self.gates.iter().map(|g| g.id))?;

        if let Some(floor) = self.floors.iter().find(|f| f.lot_id != self.lot.id) {
            return Err(layout_err(format!(
                "floor {} belongs to lot {}, not {}",
                floor.id, floor.lot_id, self.lot.id
            )));
        }

        for zone in &self.zones {
            if !floor_ids.contains(&zone.floor_id) {
                return Err(layout_err(format!(
                    "zone {} references unknown floor {}",
                    zone.id, zone.floor_id
                )));
            }
        }

        let zone_floor: BTreeMap<ZoneId, FloorId> =
            self.zones.iter().map(|z| (z.id, z.floor_id)).collect();
        for spot in &self.spots {
            match zone_floor.get(&spot.zone_id) {
                None => {
                    return Err(layout_err(format!(
                        "spot {} references unknown zone {}",
                        spot.id, spot.zone_id
                    )))
                }
                Some(floor) if *floor != spot.floor_id => {
                    return Err(layout_err(format!(
                        "spot {} is on floor {} but its zone {} is on floor {}",
                        spot.id, spot.floor_id, spot.zone_id, floor
                    )))
                }
                Some(_) => {}
            }
        }

        for gate in &self.gates {
            if !floor_ids.contains(&gate.floor_id) {
                return Err(layout_err(format!(
                    "gate {} references unknown floor {}",
                    gate.id, gate.floor_id
                )));
            }
        }

        let mut seen_pairs = HashSet::new();
        for row in &self.proximity {
            if !spot_ids.contains(&row.spot_id) || !gate_ids.contains(&row.gate_id) {
                return Err(layout_err(format!(
                    "proximity row ({}, {}) references an unknown spot or gate",
                    row.spot_id, row.gate_id
                )));
            }
            if !seen_pairs.insert((row.spot_id, row.gate_id)) {
                return Err(layout_err(format!(
                    "duplicate proximity row ({}, {})",
                    row.spot_id, row.gate_id
                )));
            }
        }

        if let Some(exit) = self.lot.exit_gate_id {
            let gate = self
                .gates
                .iter()
                .find(|g| g.id == exit)
                .ok_or_else(|| layout_err(format!("designated exit gate {exit} does not exist")))?;
            if !gate.gate_type.allows_exit() {
                return Err(layout_err(format!(
                    "designated exit gate {exit} is an entry-only gate"
                )));
            }
        }

        for floor in &self.floors {
            self.floor_zones(floor.id)?;
        }

        Ok(())
    }

    /// Floors ordered by ascending level.
    pub fn floors_by_level(&self) -> Vec<&Floor> {
        let mut floors: Vec<&Floor> = self.floors.iter().collect();
        floors.sort_by_key(|f| (f.level, f.id));
        floors
    }

    /// Zones of one floor (unordered).
    pub fn zones_on_floor(&self, floor_id: FloorId) -> Vec<Zone> {
        self.zones
            .iter()
            .filter(|z| z.floor_id == floor_id)
            .cloned()
            .collect()
    }

    /// Zone state machine for a floor, restored from the layout statuses.
    pub fn floor_zones(&self, floor_id: FloorId) -> CoreResult<FloorZones> {
        FloorZones::restore(floor_id, &self.zones_on_floor(floor_id))
    }

    pub fn gate(&self, gate_id: GateId) -> Option<&Gate> {
        self.gates.iter().find(|g| g.id == gate_id)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Spot awaiting zone resolution.
#[derive(Debug, Clone)]
struct PendingSpot {
    id: SpotId,
    zone_id: ZoneId,
    spot_type: SpotType,
}

/// Fluent builder for [`LotLayout`]. Used by tests and the seed binary.
#[derive(Debug, Clone)]
pub struct LotLayoutBuilder {
    lot: ParkingLot,
    floors: Vec<Floor>,
    zones: Vec<Zone>,
    pending_spots: Vec<PendingSpot>,
    gates: Vec<Gate>,
    proximity: Vec<Proximity>,
}

impl LotLayoutBuilder {
    pub fn floor(mut self, id: FloorId, level: i32, name: impl Into<String>) -> Self {
        self.floors.push(Floor {
            id,
            lot_id: self.lot.id,
            level,
            name: name.into(),
        });
        self
    }

    pub fn zone(
        mut self,
        id: ZoneId,
        floor_id: FloorId,
        name: impl Into<String>,
        fill_priority: i32,
    ) -> Self {
        self.zones.push(Zone {
            id,
            floor_id,
            name: name.into(),
            fill_priority,
            // Resolved per floor in build()
            status: ZoneStatus::Available,
        });
        self
    }

    pub fn spot(mut self, id: SpotId, zone_id: ZoneId, spot_type: SpotType) -> Self {
        self.pending_spots.push(PendingSpot {
            id,
            zone_id,
            spot_type,
        });
        self
    }

    /// Adds one spot per id in `ids`.
    pub fn spots(mut self, zone_id: ZoneId, spot_type: SpotType, ids: RangeInclusive<i64>) -> Self {
        for id in ids {
            self = self.spot(SpotId(id), zone_id, spot_type);
        }
        self
    }

    pub fn gate(
        mut self,
        id: GateId,
        floor_id: FloorId,
        name: impl Into<String>,
        gate_type: GateType,
    ) -> Self {
        self.gates.push(Gate {
            id,
            floor_id,
            name: name.into(),
            gate_type,
            status: GateStatus::Operational,
        });
        self
    }

    /// Puts a gate under maintenance.
    pub fn gate_under_maintenance(mut self, id: GateId) -> Self {
        if let Some(gate) = self.gates.iter_mut().find(|g| g.id == id) {
            gate.status = GateStatus::UnderMaintenance;
        }
        self
    }

    pub fn distance(mut self, spot_id: SpotId, gate_id: GateId, distance: u32) -> Self {
        self.proximity.push(Proximity {
            spot_id,
            gate_id,
            distance,
        });
        self
    }

    /// Designates the lot's exit gate (nearest-to-exit strategy).
    pub fn exit_gate(mut self, gate_id: GateId) -> Self {
        self.lot.exit_gate_id = Some(gate_id);
        self
    }

    /// Resolves spots, activates the first zone of each floor and validates.
    pub fn build(self) -> CoreResult<LotLayout> {
        let zone_info: BTreeMap<ZoneId, (FloorId, String)> = self
            .zones
            .iter()
            .map(|z| (z.id, (z.floor_id, z.name.clone())))
            .collect();

        let mut spots = Vec::with_capacity(self.pending_spots.len());
        for pending in self.pending_spots {
            let (floor_id, zone_name) = zone_info.get(&pending.zone_id).ok_or_else(|| {
                layout_err(format!(
                    "spot {} references unknown zone {}",
                    pending.id, pending.zone_id
                ))
            })?;
            spots.push(Spot {
                id: pending.id,
                floor_id: *floor_id,
                zone_id: pending.zone_id,
                code: format!("{}-{:03}", zone_name, pending.id),
                spot_type: pending.spot_type,
                status: SpotStatus::Vacant,
                ticket_id: None,
            });
        }

        let mut zones = self.zones;
        let floor_ids: Vec<FloorId> = self.floors.iter().map(|f| f.id).collect();
        for floor_id in floor_ids {
            let fresh = FloorZones::fresh(
                floor_id,
                zones
                    .iter()
                    .filter(|z| z.floor_id == floor_id)
                    .map(|z| (z.id, z.fill_priority)),
            )?;
            for slot in fresh.zones() {
                if let Some(zone) = zones.iter_mut().find(|z| z.id == slot.zone_id) {
                    zone.status = slot.status;
                }
            }
        }

        let layout = LotLayout {
            lot: self.lot,
            floors: self.floors,
            zones,
            spots,
            gates: self.gates,
            proximity: self.proximity,
        };
        layout.validate()?;
        Ok(layout)
    }
}

fn unique_ids<T>(kind: &str, ids: impl Iterator<Item = T>) -> CoreResult<HashSet<T>>
where
    T: std::hash::Hash + Eq + std::fmt::Display + Copy,
{
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(layout_err(format!("duplicate {kind} id {id}")));
        }
    }
    Ok(seen)
}

fn layout_err(message: String) -> CoreError {
    CoreError::InvalidLayout(message)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> LotLayoutBuilder {
        LotLayout::builder(LotId(1), "Test Lot")
            .floor(FloorId(1), 0, "G")
            .floor(FloorId(2), 1, "L1")
            .zone(ZoneId(10), FloorId(1), "A", 1)
            .zone(ZoneId(11), FloorId(1), "B", 2)
            .zone(ZoneId(20), FloorId(2), "C", 5)
            .gate(GateId(1), FloorId(1), "In", GateType::Entry)
            .gate(GateId(2), FloorId(1), "Out", GateType::Exit)
    }

    #[test]
    fn test_build_activates_first_zone_per_floor() {
        let layout = base()
            .spots(ZoneId(10), SpotType::Compact, 1..=2)
            .spots(ZoneId(20), SpotType::Large, 3..=3)
            .build()
            .unwrap();

        let status = |id| layout.zones.iter().find(|z| z.id == ZoneId(id)).unwrap().status;
        assert_eq!(status(10), ZoneStatus::Active);
        assert_eq!(status(11), ZoneStatus::Available);
        assert_eq!(status(20), ZoneStatus::Active);

        let spot = layout.spots.iter().find(|s| s.id == SpotId(3)).unwrap();
        assert_eq!(spot.floor_id, FloorId(2));
        assert_eq!(spot.code, "C-003");
    }

    #[test]
    fn test_unknown_zone_rejected() {
        let err = base().spot(SpotId(1), ZoneId(99), SpotType::Compact).build();
        assert!(matches!(err, Err(CoreError::InvalidLayout(_))));
    }

    #[test]
    fn test_duplicate_spot_rejected() {
        let err = base()
            .spot(SpotId(1), ZoneId(10), SpotType::Compact)
            .spot(SpotId(1), ZoneId(11), SpotType::Compact)
            .build();
        assert!(matches!(err, Err(CoreError::InvalidLayout(_))));
    }

    #[test]
    fn test_entry_only_exit_gate_rejected() {
        let err = base().exit_gate(GateId(1)).build();
        assert!(matches!(err, Err(CoreError::InvalidLayout(_))));
        assert!(base().exit_gate(GateId(2)).build().is_ok());
    }

    #[test]
    fn test_proximity_must_reference_known_rows() {
        let err = base()
            .spot(SpotId(1), ZoneId(10), SpotType::Compact)
            .distance(SpotId(1), GateId(42), 3)
            .build();
        assert!(matches!(err, Err(CoreError::InvalidLayout(_))));
    }

    #[test]
    fn test_floors_by_level() {
        let layout = LotLayout::builder(LotId(1), "Stacked")
            .floor(FloorId(7), 2, "Roof")
            .floor(FloorId(3), -1, "Basement")
            .floor(FloorId(5), 0, "Ground")
            .build()
            .unwrap();
        let order: Vec<_> = layout.floors_by_level().iter().map(|f| f.id).collect();
        assert_eq!(order, vec![FloorId(3), FloorId(5), FloorId(7)]);
    }
}
