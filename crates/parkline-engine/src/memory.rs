//! # In-Memory Registry
//!
//! [`SpotRegistry`] held entirely in process memory, built from a validated
//! [`LotLayout`].
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MemoryRegistry                                  │
//! │                                                                         │
//! │  spots      SpotId → SpotCell { attributes, Mutex<SpotState> }         │
//! │             one parking_lot mutex per spot = the compare-and-swap      │
//! │                                                                         │
//! │  by_zone    ZoneId → [SpotId]          ascending id                    │
//! │  by_gate    GateId → [SpotId]          ascending (distance, id)        │
//! │                                                                         │
//! │  counters   AtomicU64 per type / zone / floor                          │
//! │             changed only while the spot's mutex is held                │
//! │                                                                         │
//! │  zones      Mutex<ZoneId → Zone>       persisted zone statuses         │
//! │  tickets    Mutex<id → Ticket>                                         │
//! │                                                                         │
//! │  Lock order: spot mutex → tickets mutex. Never two spot mutexes.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use parkline_core::ranking::rank_by_distance;
use parkline_core::{
    CoreError, Floor, FloorId, Gate, GateId, GateStatus, LotLayout, ParkingLot, Spot, SpotId,
    SpotStatus, SpotType, Ticket, TicketClosure, TicketStatus, Zone, ZoneChange, ZoneId,
    ZoneStatus,
};

use crate::error::{EngineError, EngineResult};
use crate::registry::{Counters, SearchScope, SpotRegistry};

#[derive(Debug, Clone)]
struct SpotState {
    status: SpotStatus,
    ticket_id: Option<String>,
}

#[derive(Debug)]
struct SpotCell {
    spot: Spot,
    state: Mutex<SpotState>,
}

impl SpotCell {
    fn snapshot(&self) -> Spot {
        let state = self.state.lock().clone();
        Spot {
            status: state.status,
            ticket_id: state.ticket_id,
            ..self.spot.clone()
        }
    }

    fn is_vacant(&self) -> bool {
        self.state.lock().status == SpotStatus::Vacant
    }
}

#[derive(Debug)]
struct TypeCounter {
    total: u64,
    occupied: AtomicU64,
}

/// Process-local spot registry.
#[derive(Debug)]
pub struct MemoryRegistry {
    lot: ParkingLot,
    floors: Vec<Floor>,
    gates: RwLock<BTreeMap<GateId, Gate>>,
    spots: BTreeMap<SpotId, SpotCell>,
    by_zone: HashMap<ZoneId, Vec<SpotId>>,
    by_gate: HashMap<GateId, Vec<SpotId>>,
    all: Vec<SpotId>,
    zones: Mutex<BTreeMap<ZoneId, Zone>>,
    tickets: Mutex<HashMap<String, Ticket>>,
    type_counters: BTreeMap<SpotType, TypeCounter>,
    zone_counters: BTreeMap<ZoneId, AtomicU64>,
    floor_counters: BTreeMap<FloorId, AtomicU64>,
}

impl MemoryRegistry {
    /// Builds a registry from a layout, including any spot states it carries.
    pub fn new(layout: LotLayout) -> EngineResult<Self> {
        layout.validate()?;

        let LotLayout {
            lot,
            floors,
            zones,
            spots,
            gates,
            proximity,
        } = layout;

        let mut floors = floors;
        floors.sort_by_key(|f| (f.level, f.id));

        let mut by_zone: HashMap<ZoneId, Vec<SpotId>> = HashMap::new();
        let mut type_counters: BTreeMap<SpotType, TypeCounter> = SpotType::ALL
            .into_iter()
            .map(|t| {
                (
                    t,
                    TypeCounter {
                        total: 0,
                        occupied: AtomicU64::new(0),
                    },
                )
            })
            .collect();
        let zone_counters: BTreeMap<ZoneId, AtomicU64> =
            zones.iter().map(|z| (z.id, AtomicU64::new(0))).collect();
        let floor_counters: BTreeMap<FloorId, AtomicU64> =
            floors.iter().map(|f| (f.id, AtomicU64::new(0))).collect();

        for spot in &spots {
            by_zone.entry(spot.zone_id).or_default().push(spot.id);
            if let Some(counter) = type_counters.get_mut(&spot.spot_type) {
                counter.total += 1;
            }
            if spot.status == SpotStatus::Occupied {
                bump(&type_counters, &zone_counters, &floor_counters, spot, 1);
            }
        }
        for ids in by_zone.values_mut() {
            ids.sort_unstable();
        }

        let mut by_gate: HashMap<GateId, Vec<SpotId>> = HashMap::new();
        for gate in &gates {
            let ranked = rank_by_distance(
                proximity
                    .iter()
                    .filter(|p| p.gate_id == gate.id)
                    .map(|p| (p.spot_id, Some(p.distance))),
            );
            by_gate.insert(gate.id, ranked.into_iter().map(|r| r.spot_id).collect());
        }

        let spots: BTreeMap<SpotId, SpotCell> = spots
            .into_iter()
            .map(|spot| {
                let state = SpotState {
                    status: spot.status,
                    ticket_id: spot.ticket_id.clone(),
                };
                (
                    spot.id,
                    SpotCell {
                        spot,
                        state: Mutex::new(state),
                    },
                )
            })
            .collect();
        let all: Vec<SpotId> = spots.keys().copied().collect();

        info!(
            lot_id = %lot.id,
            floors = floors.len(),
            spots = all.len(),
            "In-memory registry ready"
        );

        Ok(MemoryRegistry {
            lot,
            floors,
            gates: RwLock::new(gates.into_iter().map(|g| (g.id, g)).collect()),
            spots,
            by_zone,
            by_gate,
            all,
            zones: Mutex::new(zones.into_iter().map(|z| (z.id, z)).collect()),
            tickets: Mutex::new(HashMap::new()),
            type_counters,
            zone_counters,
            floor_counters,
        })
    }

    /// Puts a gate into or out of maintenance.
    pub fn set_gate_status(&self, gate_id: GateId, status: GateStatus) -> EngineResult<()> {
        let mut gates = self.gates.write();
        let gate = gates
            .get_mut(&gate_id)
            .ok_or_else(|| EngineError::from(parkline_core::ValidationError::UnknownGate(gate_id)))?;
        gate.status = status;
        info!(%gate_id, ?status, "Gate status changed");
        Ok(())
    }

    fn cell(&self, spot_id: SpotId) -> EngineResult<&SpotCell> {
        self.spots
            .get(&spot_id)
            .ok_or(EngineError::Core(CoreError::SpotNotFound(spot_id)))
    }

    fn adjust(&self, spot: &Spot, delta: i64) {
        bump(
            &self.type_counters,
            &self.zone_counters,
            &self.floor_counters,
            spot,
            delta,
        );
    }
}

fn bump(
    types: &BTreeMap<SpotType, TypeCounter>,
    zones: &BTreeMap<ZoneId, AtomicU64>,
    floors: &BTreeMap<FloorId, AtomicU64>,
    spot: &Spot,
    delta: i64,
) {
    let apply = |counter: &AtomicU64| {
        if delta >= 0 {
            counter.fetch_add(delta as u64, Ordering::SeqCst);
        } else {
            counter.fetch_sub(delta.unsigned_abs(), Ordering::SeqCst);
        }
    };

    if let Some(counter) = types.get(&spot.spot_type) {
        apply(&counter.occupied);
    }
    if let Some(counter) = zones.get(&spot.zone_id) {
        apply(counter);
    }
    if let Some(counter) = floors.get(&spot.floor_id) {
        apply(counter);
    }
}

#[async_trait]
impl SpotRegistry for MemoryRegistry {
    async fn lot(&self) -> EngineResult<ParkingLot> {
        Ok(self.lot.clone())
    }

    async fn floors(&self) -> EngineResult<Vec<Floor>> {
        Ok(self.floors.clone())
    }

    async fn zones_on_floor(&self, floor_id: FloorId) -> EngineResult<Vec<Zone>> {
        let zones = self.zones.lock();
        let mut on_floor: Vec<Zone> = zones
            .values()
            .filter(|z| z.floor_id == floor_id)
            .cloned()
            .collect();
        on_floor.sort_by_key(|z| z.fill_priority);
        Ok(on_floor)
    }

    async fn gate(&self, gate_id: GateId) -> EngineResult<Option<Gate>> {
        Ok(self.gates.read().get(&gate_id).cloned())
    }

    async fn spot(&self, spot_id: SpotId) -> EngineResult<Option<Spot>> {
        Ok(self.spots.get(&spot_id).map(SpotCell::snapshot))
    }

    async fn find_candidates(
        &self,
        spot_type: SpotType,
        scope: SearchScope,
        limit: usize,
    ) -> EngineResult<Vec<Spot>> {
        let order: &[SpotId] = match scope {
            SearchScope::Zone(zone_id) => {
                self.by_zone.get(&zone_id).map(Vec::as_slice).unwrap_or(&[])
            }
            SearchScope::NearestTo(gate_id) => {
                self.by_gate.get(&gate_id).map(Vec::as_slice).unwrap_or(&[])
            }
            SearchScope::Anywhere => &self.all,
        };

        let found: Vec<Spot> = order
            .iter()
            .filter_map(|id| self.spots.get(id))
            .filter(|cell| cell.spot.spot_type == spot_type && cell.is_vacant())
            .take(limit)
            .map(SpotCell::snapshot)
            .collect();

        debug!(?scope, %spot_type, found = found.len(), "Vacant spot search");
        Ok(found)
    }

    async fn try_reserve(&self, spot_id: SpotId) -> EngineResult<bool> {
        let mut state = self.cell(spot_id)?.state.lock();
        if state.status != SpotStatus::Vacant {
            return Ok(false);
        }
        state.status = SpotStatus::Reserved;
        Ok(true)
    }

    async fn cancel_reservation(&self, spot_id: SpotId) -> EngineResult<bool> {
        let mut state = self.cell(spot_id)?.state.lock();
        if state.status != SpotStatus::Reserved {
            return Ok(false);
        }
        state.status = SpotStatus::Vacant;
        Ok(true)
    }

    async fn occupy(&self, ticket: &Ticket) -> EngineResult<()> {
        let cell = self.cell(ticket.spot_id)?;
        let mut state = cell.state.lock();

        match (state.status, state.ticket_id.as_deref()) {
            (SpotStatus::Reserved, _) => {}
            (SpotStatus::Occupied, Some(holder)) => {
                return Err(EngineError::invariant(format!(
                    "cannot occupy spot {} with ticket {}: already held by ticket {holder}",
                    ticket.spot_id, ticket.id
                )));
            }
            (status, _) => {
                return Err(EngineError::invariant(format!(
                    "cannot occupy spot {} with ticket {}: spot is {status:?}",
                    ticket.spot_id, ticket.id
                )));
            }
        }

        {
            let mut tickets = self.tickets.lock();
            if tickets.contains_key(&ticket.id) {
                return Err(EngineError::invariant(format!(
                    "ticket {} already exists",
                    ticket.id
                )));
            }
            tickets.insert(ticket.id.clone(), ticket.clone());
        }

        state.status = SpotStatus::Occupied;
        state.ticket_id = Some(ticket.id.clone());
        self.adjust(&cell.spot, 1);

        debug!(spot_id = %ticket.spot_id, ticket_id = %ticket.id, "Spot occupied");
        Ok(())
    }

    async fn free(
        &self,
        spot_id: SpotId,
        closure: Option<&TicketClosure>,
    ) -> EngineResult<Option<String>> {
        let cell = self.cell(spot_id)?;
        let mut state = cell.state.lock();

        match state.status {
            SpotStatus::Vacant => {
                debug!(%spot_id, "Free on vacant spot, nothing to do");
                return Ok(None);
            }
            SpotStatus::Reserved => {
                return Err(EngineError::invariant(format!(
                    "cannot free spot {spot_id}: spot is Reserved without an active ticket"
                )));
            }
            SpotStatus::Occupied => {}
        }

        let holder = state.ticket_id.clone().ok_or_else(|| {
            EngineError::invariant(format!("spot {spot_id} is occupied without a ticket"))
        })?;

        if let Some(c) = closure {
            if c.ticket_id != holder {
                warn!(%spot_id, expected = %c.ticket_id, actual = %holder, "Ticket mismatch on free");
                return Err(EngineError::invariant(format!(
                    "spot {spot_id} is held by ticket {holder}, not {}",
                    c.ticket_id
                )));
            }
        }

        if let Some(ticket) = self.tickets.lock().get_mut(&holder) {
            ticket.status = TicketStatus::Closed;
            match closure {
                Some(c) => {
                    ticket.exit_gate_id = Some(c.exit_gate_id);
                    ticket.exit_time = Some(c.exit_time);
                    ticket.fee_cents = Some(c.fee_cents);
                }
                None => ticket.exit_time = Some(Utc::now()),
            }
        }

        state.status = SpotStatus::Vacant;
        state.ticket_id = None;
        self.adjust(&cell.spot, -1);

        debug!(%spot_id, ticket_id = %holder, "Spot freed");
        Ok(Some(holder))
    }

    async fn ticket(&self, ticket_id: &str) -> EngineResult<Option<Ticket>> {
        Ok(self.tickets.lock().get(ticket_id).cloned())
    }

    async fn reserved_spots(&self) -> EngineResult<Vec<SpotId>> {
        Ok(self
            .spots
            .values()
            .filter(|cell| cell.state.lock().status == SpotStatus::Reserved)
            .map(|cell| cell.spot.id)
            .collect())
    }

    async fn apply_zone_changes(&self, changes: &[ZoneChange]) -> EngineResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut zones = self.zones.lock();
        let mut next = zones.clone();

        for change in changes {
            let zone = next
                .get_mut(&change.zone_id)
                .ok_or(EngineError::Core(CoreError::ZoneNotFound(change.zone_id)))?;
            if zone.status != change.from {
                return Err(EngineError::invariant(format!(
                    "zone {} is no longer {}",
                    change.zone_id, change.from
                )));
            }
            zone.status = change.to;
        }

        for floor in &self.floors {
            let active = next
                .values()
                .filter(|z| z.floor_id == floor.id && z.status == ZoneStatus::Active)
                .count();
            if active > 1 {
                return Err(EngineError::invariant(format!(
                    "floor {} would have {active} ACTIVE zones",
                    floor.id
                )));
            }
        }

        *zones = next;
        Ok(())
    }

    async fn counters(&self) -> EngineResult<Counters> {
        let load = |c: &AtomicU64| c.load(Ordering::SeqCst);
        Ok(Counters {
            per_type: self
                .type_counters
                .iter()
                .map(|(t, c)| (*t, c.total, load(&c.occupied)))
                .collect(),
            zones: self.zone_counters.iter().map(|(id, c)| (*id, load(c))).collect(),
            floors: self.floor_counters.iter().map(|(id, c)| (*id, load(c))).collect(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
