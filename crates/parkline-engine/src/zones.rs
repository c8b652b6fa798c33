//! # Zone Board
//!
//! Holds the live [`FloorZones`] of every floor behind one async mutex per
//! floor. The mutex is the exclusion scope of zone-based allocation: the
//! search inside the active zone, the claim, and any "zone is full, advance"
//! decision all happen while it is held.
//!
//! ## Transition Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Zone Transition                                  │
//! │                                                                         │
//! │   FloorLease (floor mutex held)                                        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   clone FloorZones ──► apply rule (advance / reopen / reset)           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   registry.apply_zone_changes(changes)                                 │
//! │        │            └─ conflict ──► reload floor from registry,        │
//! │        │                            re-run the rule once               │
//! │        ▼                                                                │
//! │   commit clone into the lease, publish the active pointer              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Floors are locked one at a time; a floor lease is always taken before any
//! spot is claimed. Another process sharing the database may move a zone
//! pointer behind this board's back; the persisted `from` status catches it
//! and the floor is reloaded instead of failing every later allocation.
//!
//! Readers that only want the active pointers (snapshots) use a published
//! copy and never wait on a floor lease.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use parkline_core::{CoreError, CoreResult, FloorId, FloorZones, ZoneChange, ZoneId};

use crate::error::{EngineError, EngineResult};
use crate::registry::SpotRegistry;

/// Exclusive access to one floor's zone pointer.
pub struct FloorLease {
    floor_id: FloorId,
    guard: OwnedMutexGuard<FloorZones>,
}

impl FloorLease {
    pub fn floor_id(&self) -> FloorId {
        self.floor_id
    }
}

impl Deref for FloorLease {
    type Target = FloorZones;

    fn deref(&self) -> &FloorZones {
        &self.guard
    }
}

/// Per-floor zone state shared by every allocation.
pub struct ZoneBoard {
    registry: Arc<dyn SpotRegistry>,
    floors: BTreeMap<FloorId, Arc<Mutex<FloorZones>>>,
    /// Floors in ascending level order.
    order: Vec<FloorId>,
    zone_floor: HashMap<ZoneId, FloorId>,
    /// Last committed active zone per floor.
    published: RwLock<BTreeMap<FloorId, Option<ZoneId>>>,
    lock_timeout: Duration,
}

impl ZoneBoard {
    /// Restores every floor's zone state from the registry.
    ///
    /// A floor left without an ACTIVE zone while AVAILABLE zones remain is
    /// healed by activating the next one.
    pub async fn load(registry: Arc<dyn SpotRegistry>, lock_timeout: Duration) -> EngineResult<Self> {
        let mut floors = BTreeMap::new();
        let mut order = Vec::new();
        let mut zone_floor = HashMap::new();
        let mut published = BTreeMap::new();

        for floor in registry.floors().await? {
            let zones = registry.zones_on_floor(floor.id).await?;
            let mut state = FloorZones::restore(floor.id, &zones)?;

            if state.current_active().is_none() && !state.is_exhausted() {
                let mut healed = state.clone();
                let changes: Vec<ZoneChange> = healed.activate_next()?.into_iter().collect();
                registry.apply_zone_changes(&changes).await?;
                warn!(floor_id = %floor.id, active = ?healed.current_active(), "Floor had no ACTIVE zone, activated next");
                state = healed;
            }

            for zone in &zones {
                zone_floor.insert(zone.id, floor.id);
            }
            order.push(floor.id);
            published.insert(floor.id, state.current_active());
            floors.insert(floor.id, Arc::new(Mutex::new(state)));
        }

        info!(floors = order.len(), zones = zone_floor.len(), "Zone board loaded");

        Ok(ZoneBoard {
            registry,
            floors,
            order,
            zone_floor,
            published: RwLock::new(published),
            lock_timeout,
        })
    }

    /// Floors in the order zone-based allocation visits them: `start` first,
    /// then the rest by ascending level.
    pub fn spill_order(&self, start: FloorId) -> Vec<FloorId> {
        let mut order = Vec::with_capacity(self.order.len());
        if self.floors.contains_key(&start) {
            order.push(start);
        }
        order.extend(self.order.iter().copied().filter(|f| *f != start));
        order
    }

    /// Floors by ascending level.
    pub fn floors_by_level(&self) -> &[FloorId] {
        &self.order
    }

    pub fn floor_of(&self, zone_id: ZoneId) -> Option<FloorId> {
        self.zone_floor.get(&zone_id).copied()
    }

    /// Waits up to the lock timeout for the floor's zone pointer.
    pub async fn lease(&self, floor_id: FloorId) -> EngineResult<FloorLease> {
        let floor = self
            .floors
            .get(&floor_id)
            .ok_or(EngineError::Core(CoreError::FloorNotFound(floor_id)))?;

        match tokio::time::timeout(self.lock_timeout, Arc::clone(floor).lock_owned()).await {
            Ok(guard) => Ok(FloorLease { floor_id, guard }),
            Err(_) => {
                let waited_ms = self.lock_timeout.as_millis() as u64;
                warn!(%floor_id, waited_ms, "Floor zone lock timed out");
                Err(EngineError::contention(
                    format!("floor {floor_id} zone pointer"),
                    waited_ms,
                ))
            }
        }
    }

    /// Marks the active zone FULL and activates the next one.
    ///
    /// Returns the new active zone, `None` once the floor is exhausted.
    /// If another process already moved the pointer, the reloaded floor is
    /// kept as is and its active zone returned.
    pub async fn advance(&self, lease: &mut FloorLease) -> EngineResult<Option<ZoneId>> {
        let previous = lease.current_active();
        self.transition(lease, |zones| {
            if zones.current_active() != previous {
                return Ok(Vec::new());
            }
            zones.advance()
        })
        .await?;
        let next = lease.current_active();
        info!(floor_id = %lease.floor_id, ?previous, ?next, "Zone pointer advanced");
        Ok(next)
    }

    /// Administrative FULL → AVAILABLE for one zone.
    ///
    /// Administrative changes always start from the persisted floor state.
    pub async fn reopen(&self, zone_id: ZoneId) -> EngineResult<Vec<ZoneChange>> {
        let floor_id = self
            .floor_of(zone_id)
            .ok_or(EngineError::Core(CoreError::ZoneNotFound(zone_id)))?;
        let mut lease = self.lease(floor_id).await?;
        self.reload(&mut lease).await?;
        let changes = self.transition(&mut lease, |zones| zones.reopen(zone_id)).await?;
        info!(%zone_id, %floor_id, changes = changes.len(), "Zone reopened");
        Ok(changes)
    }

    /// Administrative reset: first zone ACTIVE, the rest AVAILABLE.
    pub async fn reset(&self, floor_id: FloorId) -> EngineResult<Vec<ZoneChange>> {
        let mut lease = self.lease(floor_id).await?;
        self.reload(&mut lease).await?;
        let changes = self
            .transition(&mut lease, |zones| Ok(zones.reset()))
            .await?;
        info!(%floor_id, changes = changes.len(), "Floor zones reset");
        Ok(changes)
    }

    /// Active zone of every floor, as last committed.
    ///
    /// Never waits on a floor lease.
    pub fn active_zones(&self) -> BTreeMap<FloorId, Option<ZoneId>> {
        self.published.read().clone()
    }

    /// Replaces the lease's state with what the registry holds now.
    async fn reload(&self, lease: &mut FloorLease) -> EngineResult<()> {
        let zones = self.registry.zones_on_floor(lease.floor_id).await?;
        *lease.guard = FloorZones::restore(lease.floor_id, &zones)?;
        self.publish(lease);
        Ok(())
    }

    fn publish(&self, lease: &FloorLease) {
        self.published
            .write()
            .insert(lease.floor_id, lease.current_active());
    }

    async fn transition<F>(&self, lease: &mut FloorLease, mut rule: F) -> EngineResult<Vec<ZoneChange>>
    where
        F: FnMut(&mut FloorZones) -> CoreResult<Vec<ZoneChange>>,
    {
        let mut reloaded = false;
        loop {
            let mut next = (*lease.guard).clone();
            let changes = rule(&mut next)?;

            if !changes.is_empty() {
                match self.registry.apply_zone_changes(&changes).await {
                    Ok(()) => {
                        for change in &changes {
                            debug!(zone_id = %change.zone_id, from = %change.from, to = %change.to, "Zone transition");
                        }
                    }
                    Err(e) if is_stale_write(&e) && !reloaded => {
                        warn!(floor_id = %lease.floor_id, error = %e, "Zone state moved underneath, reloading floor");
                        self.reload(lease).await?;
                        reloaded = true;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            *lease.guard = next;
            self.publish(lease);
            return Ok(changes);
        }
    }
}

/// A zone write rejected because the persisted floor no longer matches
/// this board: a `from` status mismatch, or the one-active-zone index.
fn is_stale_write(err: &EngineError) -> bool {
    err.is_invariant_violation()
        || matches!(err, EngineError::Db(parkline_db::DbError::UniqueViolation { .. }))
}

// =============================================================================
// Unit Tests
// =============================================================================
