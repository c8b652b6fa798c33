//! # Zone State Machine
//!
//! Per-floor zone lifecycle driving the zone-based (traffic control) strategy.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Zone Lifecycle (one floor)                          │
//! │                                                                         │
//! │   priority 1        priority 2        priority 3                        │
//! │   ┌────────┐        ┌─────────┐       ┌─────────┐                       │
//! │   │ ACTIVE │        │AVAILABLE│       │AVAILABLE│      fresh layout     │
//! │   └───┬────┘        └────┬────┘       └─────────┘                       │
//! │       │ search empty     │                                              │
//! │       ▼                  ▼                                              │
//! │   ┌────────┐        ┌─────────┐       ┌─────────┐                       │
//! │   │  FULL  │        │ ACTIVE  │       │AVAILABLE│      after advance()  │
//! │   └────────┘        └─────────┘       └─────────┘                       │
//! │                                                                         │
//! │   FULL stays FULL until an administrative reopen()/reset().             │
//! │   At most ONE zone per floor is ACTIVE at any instant.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `FloorZones` is a plain value. Callers serialise access to it (the engine
//! keeps one per floor behind an async mutex) and persist the returned
//! [`ZoneChange`]s while still holding that exclusion.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{FloorId, Zone, ZoneId, ZoneStatus};

/// One zone as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSlot {
    pub zone_id: ZoneId,
    pub fill_priority: i32,
    pub status: ZoneStatus,
}

/// A status transition to be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneChange {
    pub zone_id: ZoneId,
    pub from: ZoneStatus,
    pub to: ZoneStatus,
}

/// The zone pointer of a single floor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorZones {
    floor_id: FloorId,
    /// Sorted by ascending `fill_priority`.
    slots: Vec<ZoneSlot>,
}

impl FloorZones {
    /// Builds the initial state: lowest priority ACTIVE, everything else AVAILABLE.
    pub fn fresh(
        floor_id: FloorId,
        zones: impl IntoIterator<Item = (ZoneId, i32)>,
    ) -> CoreResult<Self> {
        let mut slots: Vec<ZoneSlot> = zones
            .into_iter()
            .map(|(zone_id, fill_priority)| ZoneSlot {
                zone_id,
                fill_priority,
                status: ZoneStatus::Available,
            })
            .collect();
        slots.sort_by_key(|s| (s.fill_priority, s.zone_id));
        check_priorities(floor_id, &slots)?;

        if let Some(first) = slots.first_mut() {
            first.status = ZoneStatus::Active;
        }

        Ok(FloorZones { floor_id, slots })
    }

    /// Rebuilds the state from persisted zone records.
    ///
    /// Zones belonging to other floors are rejected. A floor with no ACTIVE
    /// zone is accepted as-is; the next `activate_next` repairs it.
    pub fn restore(floor_id: FloorId, zones: &[Zone]) -> CoreResult<Self> {
        if let Some(stray) = zones.iter().find(|z| z.floor_id != floor_id) {
            return Err(CoreError::InvalidLayout(format!(
                "zone {} belongs to floor {}, not {}",
                stray.id, stray.floor_id, floor_id
            )));
        }

        let mut slots: Vec<ZoneSlot> = zones
            .iter()
            .map(|z| ZoneSlot {
                zone_id: z.id,
                fill_priority: z.fill_priority,
                status: z.status,
            })
            .collect();
        slots.sort_by_key(|s| (s.fill_priority, s.zone_id));
        check_priorities(floor_id, &slots)?;

        let active = slots
            .iter()
            .filter(|s| s.status == ZoneStatus::Active)
            .count();
        if active > 1 {
            return Err(CoreError::invariant(format!(
                "floor {floor_id} has {active} ACTIVE zones"
            )));
        }

        Ok(FloorZones { floor_id, slots })
    }

    #[inline]
    pub fn floor_id(&self) -> FloorId {
        self.floor_id
    }

    /// Zones in activation order.
    pub fn zones(&self) -> &[ZoneSlot] {
        &self.slots
    }

    /// The zone currently accepting vehicles, if any.
    pub fn current_active(&self) -> Option<ZoneId> {
        self.slots
            .iter()
            .find(|s| s.status == ZoneStatus::Active)
            .map(|s| s.zone_id)
    }

    pub fn status(&self, zone_id: ZoneId) -> Option<ZoneStatus> {
        self.slot(zone_id).map(|s| s.status)
    }

    /// True once every zone on the floor is FULL.
    pub fn is_exhausted(&self) -> bool {
        self.slots.iter().all(|s| s.status == ZoneStatus::Full)
    }

    /// ACTIVE → FULL.
    ///
    /// Marking an already FULL zone is a no-op (returns `None`). Marking an
    /// AVAILABLE zone is rejected: zones only fill once they were active.
    pub fn mark_full(&mut self, zone_id: ZoneId) -> CoreResult<Option<ZoneChange>> {
        let floor_id = self.floor_id;
        let slot = self
            .slot_mut(zone_id)
            .ok_or(CoreError::ZoneNotFound(zone_id))?;

        match slot.status {
            ZoneStatus::Full => Ok(None),
            ZoneStatus::Active => {
                slot.status = ZoneStatus::Full;
                Ok(Some(ZoneChange {
                    zone_id,
                    from: ZoneStatus::Active,
                    to: ZoneStatus::Full,
                }))
            }
            ZoneStatus::Available => Err(CoreError::invariant(format!(
                "zone {zone_id} on floor {floor_id} marked FULL while AVAILABLE"
            ))),
        }
    }

    /// AVAILABLE → ACTIVE for the lowest-priority AVAILABLE zone.
    ///
    /// Returns `Ok(None)` when no AVAILABLE zone is left (floor exhausted).
    /// Fails if the floor still has an ACTIVE zone.
    pub fn activate_next(&mut self) -> CoreResult<Option<ZoneChange>> {
        if let Some(active) = self.current_active() {
            return Err(CoreError::invariant(format!(
                "floor {} already has ACTIVE zone {active}",
                self.floor_id
            )));
        }

        let next = self
            .slots
            .iter_mut()
            .find(|s| s.status == ZoneStatus::Available);

        Ok(next.map(|slot| {
            slot.status = ZoneStatus::Active;
            ZoneChange {
                zone_id: slot.zone_id,
                from: ZoneStatus::Available,
                to: ZoneStatus::Active,
            }
        }))
    }

    /// Marks the active zone FULL and activates its successor.
    ///
    /// Returns every transition applied, in order. The new active zone (if
    /// any) is `current_active()` afterwards.
    pub fn advance(&mut self) -> CoreResult<Vec<ZoneChange>> {
        let mut changes = Vec::with_capacity(2);
        if let Some(active) = self.current_active() {
            changes.extend(self.mark_full(active)?);
        }
        changes.extend(self.activate_next()?);
        Ok(changes)
    }

    /// Administrative reopen: FULL → AVAILABLE, then activate if the floor
    /// has nothing ACTIVE.
    pub fn reopen(&mut self, zone_id: ZoneId) -> CoreResult<Vec<ZoneChange>> {
        let slot = self
            .slot_mut(zone_id)
            .ok_or(CoreError::ZoneNotFound(zone_id))?;

        let mut changes = Vec::new();
        if slot.status == ZoneStatus::Full {
            slot.status = ZoneStatus::Available;
            changes.push(ZoneChange {
                zone_id,
                from: ZoneStatus::Full,
                to: ZoneStatus::Available,
            });
        }

        if self.current_active().is_none() {
            changes.extend(self.activate_next()?);
        }
        Ok(changes)
    }

    /// Administrative reset of the whole floor back to the fresh state.
    pub fn reset(&mut self) -> Vec<ZoneChange> {
        let mut changes = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let target = if index == 0 {
                ZoneStatus::Active
            } else {
                ZoneStatus::Available
            };
            if slot.status != target {
                changes.push(ZoneChange {
                    zone_id: slot.zone_id,
                    from: slot.status,
                    to: target,
                });
                slot.status = target;
            }
        }
        changes
    }

    fn slot(&self, zone_id: ZoneId) -> Option<&ZoneSlot> {
        self.slots.iter().find(|s| s.zone_id == zone_id)
    }

    fn slot_mut(&mut self, zone_id: ZoneId) -> Option<&mut ZoneSlot> {
        self.slots.iter_mut().find(|s| s.zone_id == zone_id)
    }
}

fn check_priorities(floor_id: FloorId, sorted: &[ZoneSlot]) -> CoreResult<()> {
    for pair in sorted.windows(2) {
        if pair[0].fill_priority == pair[1].fill_priority {
            return Err(CoreError::InvalidLayout(format!(
                "zones {} and {} on floor {floor_id} share fill priority {}",
                pair[0].zone_id, pair[1].zone_id, pair[0].fill_priority
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn three_zones() -> FloorZones {
        // Deliberately unsorted input
        FloorZones::fresh(FloorId(1), [(ZoneId(30), 3), (ZoneId(10), 1), (ZoneId(20), 2)]).unwrap()
    }

    #[test]
    fn test_fresh_activates_lowest_priority() {
        let zones = three_zones();
        assert_eq!(zones.current_active(), Some(ZoneId(10)));
        assert_eq!(zones.status(ZoneId(20)), Some(ZoneStatus::Available));
        assert_eq!(zones.status(ZoneId(30)), Some(ZoneStatus::Available));
    }

    #[test]
    fn test_advance_walks_priorities_in_order() {
        let mut zones = three_zones();

        let changes = zones.advance().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(zones.current_active(), Some(ZoneId(20)));
        assert_eq!(zones.status(ZoneId(10)), Some(ZoneStatus::Full));

        zones.advance().unwrap();
        assert_eq!(zones.current_active(), Some(ZoneId(30)));

        let changes = zones.advance().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(zones.current_active(), None);
        assert!(zones.is_exhausted());

        // Exhausted floor stays exhausted
        assert!(zones.advance().unwrap().is_empty());
    }

    #[test]
    fn test_activate_next_rejects_second_active() {
        let mut zones = three_zones();
        assert!(zones.activate_next().unwrap_err().is_invariant_violation());
    }

    #[test]
    fn test_mark_full_is_idempotent_but_not_from_available() {
        let mut zones = three_zones();
        assert!(zones.mark_full(ZoneId(10)).unwrap().is_some());
        assert!(zones.mark_full(ZoneId(10)).unwrap().is_none());
        assert!(zones.mark_full(ZoneId(30)).is_err());
        assert!(matches!(
            zones.mark_full(ZoneId(99)),
            Err(CoreError::ZoneNotFound(ZoneId(99)))
        ));
    }

    #[test]
    fn test_duplicate_priority_rejected() {
        let result = FloorZones::fresh(FloorId(1), [(ZoneId(1), 1), (ZoneId(2), 1)]);
        assert!(matches!(result, Err(CoreError::InvalidLayout(_))));
    }

    #[test]
    fn test_restore_rejects_two_active() {
        let zone = |id, priority, status| Zone {
            id: ZoneId(id),
            floor_id: FloorId(1),
            name: format!("Z{id}"),
            fill_priority: priority,
            status,
        };
        let zones = [
            zone(1, 1, ZoneStatus::Active),
            zone(2, 2, ZoneStatus::Active),
        ];
        assert!(FloorZones::restore(FloorId(1), &zones)
            .unwrap_err()
            .is_invariant_violation());
    }

    #[test]
    fn test_restore_without_active_self_heals() {
        let zones = [
            Zone {
                id: ZoneId(1),
                floor_id: FloorId(1),
                name: "A".into(),
                fill_priority: 1,
                status: ZoneStatus::Full,
            },
            Zone {
                id: ZoneId(2),
                floor_id: FloorId(1),
                name: "B".into(),
                fill_priority: 2,
                status: ZoneStatus::Available,
            },
        ];
        let mut floor = FloorZones::restore(FloorId(1), &zones).unwrap();
        assert_eq!(floor.current_active(), None);

        let changes = floor.advance().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(floor.current_active(), Some(ZoneId(2)));
    }

    #[test]
    fn test_reopen_and_reset() {
        let mut zones = three_zones();
        zones.advance().unwrap();
        zones.advance().unwrap();
        zones.advance().unwrap();
        assert!(zones.is_exhausted());

        let changes = zones.reopen(ZoneId(20)).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(zones.current_active(), Some(ZoneId(20)));

        // Reopening while another zone is ACTIVE only makes it AVAILABLE
        zones.reopen(ZoneId(10)).unwrap();
        assert_eq!(zones.status(ZoneId(10)), Some(ZoneStatus::Available));
        assert_eq!(zones.current_active(), Some(ZoneId(20)));

        zones.reset();
        assert_eq!(zones.current_active(), Some(ZoneId(10)));
        assert_eq!(zones.status(ZoneId(20)), Some(ZoneStatus::Available));
        assert_eq!(zones.status(ZoneId(30)), Some(ZoneStatus::Available));
    }
}
