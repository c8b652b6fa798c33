//! # Parking Service
//!
//! The transactional workflow the gates call: validate at the edge, allocate,
//! write the ticket together with the occupancy, and the reverse on exit.
//!
//! ## Park / Exit Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            park(plate, vehicle, gate)                   │
//! │                                                                         │
//! │  validate plate + entry gate ──► Allocator::allocate                    │
//! │                                   │  ContentionTimeout?                 │
//! │                                   │  └─► exponential backoff, retry     │
//! │                                   ▼                                     │
//! │                        Reservation (RESERVED)                           │
//! │                                   │                                     │
//! │                    ledger.occupy(ticket)  ── fails ──► release + error  │
//! │                                   │                                     │
//! │                         commit ──► Ticket                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                          exit(ticket, gate)                             │
//! │                                                                         │
//! │  per-ticket lock ──► ticket ACTIVE? ──► validate exit gate              │
//! │        ──► fee from RateCard ──► FeeSettlement::settle                  │
//! │        ──► ledger.free(spot, closure)  (spot + ticket + counters)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use parkline_core::validation::{
    validate_entry_gate, validate_exit_gate, validate_plate, validate_ticket_id,
};
use parkline_core::{
    AllocationContext, CoreError, FloorId, Gate, GateId, Money, OccupancySnapshot, ParkingLot,
    SpotId, StrategyKind, Ticket, TicketClosure, VehicleType, ZoneChange, ZoneId,
};
use parkline_db::{Database, DbConfig};

use crate::allocator::{Allocator, Reservation};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::OccupancyLedger;
use crate::locks::LockTable;
use crate::registry::SpotRegistry;
use crate::sqlite::SqliteRegistry;
use crate::strategy::AllocationStrategy;
use crate::zones::ZoneBoard;

// =============================================================================
// Fee Settlement
// =============================================================================

/// Payment collaborator consulted before a spot is released on exit.
#[async_trait]
pub trait FeeSettlement: Send + Sync {
    /// Collects `fee` for `ticket`. An `Err` keeps the vehicle parked.
    async fn settle(&self, ticket: &Ticket, fee: Money) -> Result<(), String>;
}

/// Settlement that accepts every fee.
pub struct NoopSettlement;

#[async_trait]
impl FeeSettlement for NoopSettlement {
    async fn settle(&self, _ticket: &Ticket, _fee: Money) -> Result<(), String> {
        Ok(())
    }
}

/// Result of a completed exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReceipt {
    /// The ticket after closing.
    pub ticket: Ticket,
    pub fee: Money,
}

// =============================================================================
// Parking Service
// =============================================================================

pub struct ParkingService {
    config: EngineConfig,
    lot: ParkingLot,
    registry: Arc<dyn SpotRegistry>,
    zones: Arc<ZoneBoard>,
    allocator: Allocator,
    ledger: OccupancyLedger,
    settlement: Arc<dyn FeeSettlement>,
    exits: LockTable<String>,
}

impl ParkingService {
    /// Starts the service over `registry` with fees settled by [`NoopSettlement`].
    pub async fn start(config: EngineConfig, registry: Arc<dyn SpotRegistry>) -> EngineResult<Self> {
        Self::with_settlement(config, registry, Arc::new(NoopSettlement)).await
    }

    /// Starts the service with a payment collaborator.
    ///
    /// Reservations left over from a previous process are released before
    /// the first allocation.
    pub async fn with_settlement(
        config: EngineConfig,
        registry: Arc<dyn SpotRegistry>,
        settlement: Arc<dyn FeeSettlement>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let lot = registry.lot().await?;
        if lot.id != config.lot.id {
            return Err(EngineError::InvalidConfig(format!(
                "configured lot {} but registry serves lot {}",
                config.lot.id, lot.id
            )));
        }

        let strategy =
            AllocationStrategy::configure(config.allocation.strategy, &lot, config.lot.exit_gate);
        if let AllocationStrategy::NearestToExit { exit_gate: None } = strategy {
            return Err(EngineError::InvalidConfig(format!(
                "strategy nearest_to_exit needs an exit gate, lot {} has none",
                lot.id
            )));
        }

        let orphaned = registry.reserved_spots().await?;
        for spot_id in &orphaned {
            registry.cancel_reservation(*spot_id).await?;
        }
        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), spots = ?orphaned, "Released orphaned reservations");
        }

        let lock_timeout = config.allocation.lock_timeout();
        let zones = Arc::new(ZoneBoard::load(Arc::clone(&registry), lock_timeout).await?);
        let allocator = Allocator::new(
            Arc::clone(&registry),
            Arc::clone(&zones),
            strategy,
            config.allocation.max_reservation_retries,
            lock_timeout,
        );
        let ledger = OccupancyLedger::new(Arc::clone(&registry));

        info!(
            lot_id = %lot.id,
            lot = %lot.name,
            strategy = %strategy.kind(),
            "Parking service started"
        );

        Ok(ParkingService {
            config,
            lot,
            registry,
            zones,
            allocator,
            ledger,
            settlement,
            exits: LockTable::new("ticket"),
        })
    }

    /// Opens the SQLite database named by the config and starts over it.
    pub async fn open_sqlite(config: EngineConfig) -> EngineResult<Self> {
        let db_config = DbConfig::new(config.database.path.clone())
            .max_connections(config.database.max_connections)
            .busy_timeout(Duration::from_millis(config.database.busy_timeout_ms));
        let db = Database::new(db_config).await?;
        let registry = SqliteRegistry::open(db, config.lot.id).await?;
        Self::start(config, Arc::new(registry)).await
    }

    pub fn lot(&self) -> &ParkingLot {
        &self.lot
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn strategy(&self) -> StrategyKind {
        self.allocator.strategy().kind()
    }

    pub fn registry(&self) -> &Arc<dyn SpotRegistry> {
        &self.registry
    }

    // =========================================================================
    // Entry
    // =========================================================================

    /// Parks a vehicle arriving now.
    pub async fn park(
        &self,
        plate: &str,
        vehicle_type: VehicleType,
        entry_gate_id: GateId,
    ) -> EngineResult<Ticket> {
        self.park_at(plate, vehicle_type, entry_gate_id, Utc::now()).await
    }

    /// Parks a vehicle, stamping the ticket with `entry_time`.
    ///
    /// On success the spot is OCCUPIED and the ticket ACTIVE; on any error
    /// neither exists.
    pub async fn park_at(
        &self,
        plate: &str,
        vehicle_type: VehicleType,
        entry_gate_id: GateId,
        entry_time: DateTime<Utc>,
    ) -> EngineResult<Ticket> {
        let plate = validate_plate(plate)?;
        let gate = self.entry_gate(entry_gate_id).await?;
        let ctx = AllocationContext::at_gate(self.lot.id, &gate);

        let reservation = self.allocate_with_backoff(vehicle_type, &ctx).await?;
        let ticket = Ticket::open(
            self.lot.id,
            plate,
            vehicle_type,
            reservation.spot_id(),
            gate.id,
            entry_time,
        );

        if let Err(e) = self.ledger.occupy(&ticket).await {
            let spot_id = reservation.spot_id();
            if let Err(release_err) = reservation.release().await {
                error!(%spot_id, error = %release_err, "Failed to release reservation after occupy error");
            }
            return Err(e);
        }
        reservation.commit();

        Ok(ticket)
    }

    /// Claims a spot without writing a ticket.
    ///
    /// The returned reservation must be committed or released; dropping it
    /// releases the spot in the background.
    pub async fn allocate(
        &self,
        vehicle_type: VehicleType,
        entry_gate_id: GateId,
    ) -> EngineResult<Reservation> {
        let gate = self.entry_gate(entry_gate_id).await?;
        let ctx = AllocationContext::at_gate(self.lot.id, &gate);
        self.allocate_with_backoff(vehicle_type, &ctx).await
    }

    async fn entry_gate(&self, gate_id: GateId) -> EngineResult<Gate> {
        let gate = self.registry.gate(gate_id).await?;
        validate_entry_gate(gate_id, gate.as_ref())?;
        gate.ok_or_else(|| EngineError::from(parkline_core::ValidationError::UnknownGate(gate_id)))
    }

    /// Retries the whole allocation while it times out on contention.
    async fn allocate_with_backoff(
        &self,
        vehicle_type: VehicleType,
        ctx: &AllocationContext,
    ) -> EngineResult<Reservation> {
        let mut backoff = self.create_backoff();
        let mut retries = 0;

        loop {
            match self.allocator.allocate(vehicle_type, ctx).await {
                Err(e) if e.is_retryable() && retries < self.config.allocation.contention_retries => {
                    retries += 1;
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_millis(self.config.allocation.max_backoff_ms));
                    warn!(
                        %vehicle_type,
                        gate_id = %ctx.entry_gate_id,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Allocation contended, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.allocation.initial_backoff_ms),
            max_interval: Duration::from_millis(self.config.allocation.max_backoff_ms),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    // =========================================================================
    // Exit
    // =========================================================================

    /// Closes a ticket now.
    pub async fn exit(&self, ticket_id: &str, exit_gate_id: GateId) -> EngineResult<ExitReceipt> {
        self.exit_at(ticket_id, exit_gate_id, Utc::now()).await
    }

    /// Settles the fee and frees the spot, closing the ticket with it.
    ///
    /// Concurrent exits of one ticket are serialized; the second sees
    /// `TicketClosed`.
    pub async fn exit_at(
        &self,
        ticket_id: &str,
        exit_gate_id: GateId,
        exit_time: DateTime<Utc>,
    ) -> EngineResult<ExitReceipt> {
        validate_ticket_id(ticket_id)?;
        let ticket_id = ticket_id.trim();

        self.exits.prune();
        let _exclusive = self
            .exits
            .acquire(ticket_id.to_string(), self.config.allocation.lock_timeout())
            .await?;

        let ticket = self
            .registry
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| CoreError::TicketNotFound(ticket_id.to_string()))?;
        if !ticket.is_active() {
            return Err(CoreError::TicketClosed(ticket.id).into());
        }

        let gate = self.registry.gate(exit_gate_id).await?;
        validate_exit_gate(exit_gate_id, gate.as_ref())?;

        let fee = self
            .config
            .fees
            .fee_for(ticket.vehicle_type, ticket.entry_time, exit_time)?;

        self.settlement
            .settle(&ticket, fee)
            .await
            .map_err(|reason| EngineError::SettlementFailed {
                ticket_id: ticket.id.clone(),
                reason,
            })?;

        let closure = TicketClosure {
            ticket_id: ticket.id.clone(),
            exit_gate_id,
            exit_time,
            fee_cents: fee.cents(),
        };
        if !self.ledger.free(ticket.spot_id, Some(&closure)).await? {
            error!(ticket_id = %ticket.id, spot_id = %ticket.spot_id, "Active ticket on a vacant spot");
            return Err(EngineError::invariant(format!(
                "ticket {} is active but spot {} is vacant",
                ticket.id, ticket.spot_id
            )));
        }

        let closed = self
            .registry
            .ticket(&ticket.id)
            .await?
            .ok_or_else(|| CoreError::TicketNotFound(ticket.id.clone()))?;

        info!(ticket_id = %closed.id, spot_id = %closed.spot_id, %fee, "Vehicle exited");
        Ok(ExitReceipt { ticket: closed, fee })
    }

    /// Frees a spot without a fee (administrative release).
    ///
    /// Idempotent: `false` when the spot was already VACANT.
    pub async fn release(&self, spot_id: SpotId) -> EngineResult<bool> {
        self.ledger.free(spot_id, None).await
    }

    // =========================================================================
    // Occupancy & Administration
    // =========================================================================

    /// Current counters and active zones.
    ///
    /// `active_zone_id` is the active zone of the lowest floor that has one.
    pub async fn snapshot(&self) -> EngineResult<OccupancySnapshot> {
        let counters = self.registry.counters().await?;
        let active = self.zones.active_zones();

        let mut snapshot = OccupancySnapshot::from_counts(counters.per_type, active);
        snapshot.active_zone_id = self
            .zones
            .floors_by_level()
            .iter()
            .find_map(|floor| snapshot.active_zones.get(floor).copied().flatten());

        debug!(
            occupied = snapshot.occupied_spots,
            total = snapshot.total_spots,
            "Occupancy snapshot"
        );
        Ok(snapshot)
    }

    /// Puts a FULL zone back into the fill cycle.
    pub async fn reopen_zone(&self, zone_id: ZoneId) -> EngineResult<Vec<ZoneChange>> {
        self.zones.reopen(zone_id).await
    }

    /// Restores a floor's zones to their initial order.
    pub async fn reset_floor(&self, floor_id: FloorId) -> EngineResult<Vec<ZoneChange>> {
        self.zones.reset(floor_id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRegistry;
    use crate::testing;
    use chrono::Duration as ChronoDuration;
    use parkline_core::{GateStatus, SpotStatus, SpotType, TicketStatus, ZoneStatus};
    use std::collections::HashSet;

    fn config(strategy: StrategyKind) -> EngineConfig {
        let mut config = EngineConfig::new();
        config.allocation.strategy = strategy;
        config
    }

    async fn service(strategy: StrategyKind) -> (Arc<MemoryRegistry>, ParkingService) {
        let registry = Arc::new(MemoryRegistry::new(testing::two_floor_layout()).unwrap());
        let service = ParkingService::start(config(strategy), registry.clone())
            .await
            .unwrap();
        (registry, service)
    }

    struct RefusingSettlement;

    #[async_trait]
    impl FeeSettlement for RefusingSettlement {
        async fn settle(&self, _ticket: &Ticket, _fee: Money) -> Result<(), String> {
            Err("card declined".to_string())
        }
    }

    #[tokio::test]
    async fn test_park_and_exit() {
        let (registry, service) = service(StrategyKind::NearestToGate).await;
        let entry = Utc::now();

        let ticket = service
            .park_at(" ka-01-hh-1234 ", VehicleType::Car, GateId(1), entry)
            .await
            .unwrap();
        assert_eq!(ticket.plate, "KA-01-HH-1234");
        assert_eq!(ticket.spot_id, SpotId(101));
        assert_eq!(
            registry.spot(SpotId(101)).await.unwrap().unwrap().status,
            SpotStatus::Occupied
        );

        let receipt = service
            .exit_at(&ticket.id, GateId(2), entry + ChronoDuration::minutes(90))
            .await
            .unwrap();
        assert_eq!(receipt.fee, Money::from_cents(600));
        assert_eq!(receipt.ticket.status, TicketStatus::Closed);
        assert_eq!(receipt.ticket.exit_gate_id, Some(GateId(2)));
        assert_eq!(receipt.ticket.fee_cents, Some(600));

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.occupied_spots, 0);
    }

    #[tokio::test]
    async fn test_exit_twice_is_ticket_closed() {
        let (_, service) = service(StrategyKind::NearestToGate).await;
        let ticket = service.park("DL-1", VehicleType::Car, GateId(1)).await.unwrap();

        service.exit(&ticket.id, GateId(2)).await.unwrap();
        let err = service.exit(&ticket.id, GateId(2)).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::TicketClosed(_))));

        let unknown = uuid_like();
        let err = service.exit(&unknown, GateId(2)).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::TicketNotFound(_))));
    }

    fn uuid_like() -> String {
        "7f9c1e5a-3b2d-4c8e-9a61-0d4b2e6f8a13".to_string()
    }

    #[tokio::test]
    async fn test_gate_validation_happens_before_allocation() {
        let (registry, service) = service(StrategyKind::NearestToGate).await;

        let err = service.park("DL-1", VehicleType::Car, GateId(2)).await.unwrap_err();
        assert!(err.is_validation(), "exit-only gate: {err}");

        let err = service.park("DL-1", VehicleType::Car, GateId(99)).await.unwrap_err();
        assert!(err.is_validation());

        registry
            .set_gate_status(GateId(1), GateStatus::UnderMaintenance)
            .unwrap();
        let err = service.park("DL-1", VehicleType::Car, GateId(1)).await.unwrap_err();
        assert!(err.is_validation());

        let err = service.park("", VehicleType::Car, GateId(1)).await.unwrap_err();
        assert!(err.is_validation());

        assert_eq!(registry.counters().await.unwrap().occupied(SpotType::Compact), 0);
        assert!(registry.reserved_spots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refused_settlement_keeps_vehicle_parked() {
        let registry = Arc::new(MemoryRegistry::new(testing::two_floor_layout()).unwrap());
        let service = ParkingService::with_settlement(
            config(StrategyKind::NearestToGate),
            registry.clone(),
            Arc::new(RefusingSettlement),
        )
        .await
        .unwrap();

        let ticket = service.park("MH-04", VehicleType::Car, GateId(1)).await.unwrap();
        let err = service.exit(&ticket.id, GateId(2)).await.unwrap_err();
        assert!(matches!(err, EngineError::SettlementFailed { .. }));

        assert!(registry.ticket(&ticket.id).await.unwrap().unwrap().is_active());
        assert_eq!(
            registry.spot(ticket.spot_id).await.unwrap().unwrap().status,
            SpotStatus::Occupied
        );
    }

    #[tokio::test]
    async fn test_idempotent_release() {
        let (registry, service) = service(StrategyKind::NearestToGate).await;
        let ticket = service.park("GJ-5", VehicleType::Car, GateId(1)).await.unwrap();

        assert!(service.release(ticket.spot_id).await.unwrap());
        assert!(!service.release(ticket.spot_id).await.unwrap());

        let counters = registry.counters().await.unwrap();
        assert_eq!(counters.occupied(SpotType::Compact), 0);
        assert_eq!(counters.zones[&ZoneId(10)], 0);
        assert_eq!(counters.floors[&FloorId(1)], 0);
        assert!(!registry.ticket(&ticket.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_startup_sweeps_orphaned_reservations() {
        let registry = Arc::new(MemoryRegistry::new(testing::two_floor_layout()).unwrap());
        registry.try_reserve(SpotId(100)).await.unwrap();

        ParkingService::start(config(StrategyKind::NearestToGate), registry.clone())
            .await
            .unwrap();
        assert!(registry.reserved_spots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_rejects_mismatched_config() {
        let registry = Arc::new(MemoryRegistry::new(testing::two_floor_layout()).unwrap());
        let mut wrong_lot = config(StrategyKind::NearestToGate);
        wrong_lot.lot.id = parkline_core::LotId(7);
        let err = ParkingService::start(wrong_lot, registry.clone())
            .await
            .err()
            .unwrap();
        assert!(err.is_config_error());

        let mut layout = testing::two_floor_layout();
        layout.lot.exit_gate_id = None;
        let registry = Arc::new(MemoryRegistry::new(layout).unwrap());
        let err = ParkingService::start(config(StrategyKind::NearestToExit), registry)
            .await
            .err()
            .unwrap();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_snapshot_and_zone_administration() {
        let (_, service) = service(StrategyKind::ZoneBased).await;

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.total_spots, 5);
        assert_eq!(snapshot.active_zone_id, Some(ZoneId(10)));
        assert_eq!(snapshot.per_type[&SpotType::Compact].available, 4);

        for plate in ["A1", "A2", "A3"] {
            service.park(plate, VehicleType::Car, GateId(1)).await.unwrap();
        }
        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.occupied_spots, 3);
        assert_eq!(snapshot.active_zones[&FloorId(1)], Some(ZoneId(11)));

        // Freeing a spot in a FULL zone does not reopen it.
        service.release(SpotId(100)).await.unwrap();
        assert_eq!(service.snapshot().await.unwrap().active_zone_id, Some(ZoneId(11)));

        let changes = service.reset_floor(FloorId(1)).await.unwrap();
        assert!(changes
            .iter()
            .any(|c| c.zone_id == ZoneId(10) && c.to == ZoneStatus::Active));
        let ticket = service.park("A4", VehicleType::Car, GateId(1)).await.unwrap();
        assert_eq!(ticket.spot_id, SpotId(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_double_assignment_under_load() {
        let registry = Arc::new(MemoryRegistry::new(testing::pool_layout(12)).unwrap());
        let service = Arc::new(
            ParkingService::start(config(StrategyKind::NearestToGate), registry.clone())
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for n in 0..40 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                let gate = if n % 2 == 0 { GateId(1) } else { GateId(3) };
                service.park(&format!("LOAD-{n}"), VehicleType::Car, gate).await
            }));
        }

        let mut spots = HashSet::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(ticket) => assert!(spots.insert(ticket.spot_id), "{} assigned twice", ticket.spot_id),
                Err(e) => assert!(e.is_capacity_exhausted(), "unexpected error: {e}"),
            }
        }

        let counters = registry.counters().await.unwrap();
        assert_eq!(counters.occupied(SpotType::Compact), spots.len() as u64);
        assert!(registry.reserved_spots().await.unwrap().is_empty());
    }
}
