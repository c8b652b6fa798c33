//! # Concurrency-Safe Allocator
//!
//! Turns a strategy's search plan into a claimed spot.
//!
//! ## Claim Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         allocate(vehicle, ctx)                          │
//! │                                                                         │
//! │  Proximity plan                     Zoned plan                          │
//! │  ──────────────                     ──────────                          │
//! │  lock window (type, gate)           for floor in spill order:           │
//! │        │                              lock floor zone pointer           │
//! │        ▼                                    │                           │
//! │  ┌──► best VACANT by (dist, id)       ┌──► best VACANT in ACTIVE zone    │
//! │  │     │ none ──► CapacityExhausted   │     │ none ──► advance pointer   │
//! │  │     ▼                              │     │          (FULL → next)    │
//! │  │   try_reserve (CAS)                │     ▼                           │
//! │  │     │ lost ──► retry (bounded) ────┘   try_reserve (CAS)             │
//! │  └─────┘                                    │ lost ──► retry (bounded)  │
//! │        │ won                                │ won                       │
//! │        ▼                                    ▼                           │
//! │                      Reservation (RESERVED spot)                        │
//! │        commit() after the ticket is written, otherwise dropped          │
//! │        → compensating cancel_reservation on the runtime                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lock order is always exclusion scope first, spot second. Floors are
//! visited one at a time; a floor lease is released before the next floor
//! is locked.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use parkline_core::{
    AllocationContext, FloorId, GateId, Spot, SpotId, SpotStatus, SpotType, VehicleType,
};

use crate::error::{EngineError, EngineResult};
use crate::locks::LockTable;
use crate::registry::{SearchScope, SpotRegistry};
use crate::strategy::{first_candidate, AllocationStrategy, SearchPlan};
use crate::zones::ZoneBoard;

// =============================================================================
// Reservation
// =============================================================================

/// A claimed spot that has no ticket yet.
///
/// Must end in [`Reservation::commit`] (ticket written) or
/// [`Reservation::release`]. Dropping it unsettled, for example when the
/// calling future is abandoned, spawns the release instead.
#[must_use = "an unsettled Reservation releases its spot when dropped"]
pub struct Reservation {
    spot: Spot,
    registry: Arc<dyn SpotRegistry>,
    settled: bool,
}

impl Reservation {
    fn new(mut spot: Spot, registry: Arc<dyn SpotRegistry>) -> Self {
        spot.status = SpotStatus::Reserved;
        Reservation {
            spot,
            registry,
            settled: false,
        }
    }

    pub fn spot(&self) -> &Spot {
        &self.spot
    }

    pub fn spot_id(&self) -> SpotId {
        self.spot.id
    }

    /// The spot is now owned by a ticket; nothing to compensate.
    pub fn commit(mut self) -> Spot {
        self.settled = true;
        self.spot.clone()
    }

    /// Gives the spot back. `false` if it was no longer RESERVED.
    pub async fn release(mut self) -> EngineResult<bool> {
        self.settled = true;
        let released = self.registry.cancel_reservation(self.spot.id).await?;
        debug!(spot_id = %self.spot.id, released, "Reservation released");
        Ok(released)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let spot_id = self.spot.id;
        let registry = Arc::clone(&self.registry);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match registry.cancel_reservation(spot_id).await {
                        Ok(true) => info!(%spot_id, "Abandoned reservation released"),
                        Ok(false) => debug!(%spot_id, "Abandoned reservation already settled"),
                        Err(e) => error!(%spot_id, error = %e, "Failed to release abandoned reservation"),
                    }
                });
            }
            Err(_) => {
                warn!(%spot_id, "Reservation dropped outside a runtime, left for the startup sweep");
            }
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("spot_id", &self.spot.id)
            .field("settled", &self.settled)
            .finish()
    }
}

// =============================================================================
// Allocator
// =============================================================================

enum Claim {
    Won(Reservation),
    Lost(SpotId),
    Exhausted,
}

/// Serializes competing searches and claims spots.
pub struct Allocator {
    registry: Arc<dyn SpotRegistry>,
    zones: Arc<ZoneBoard>,
    windows: LockTable<(SpotType, GateId)>,
    strategy: AllocationStrategy,
    max_reservation_retries: u32,
    lock_timeout: Duration,
}

impl Allocator {
    pub fn new(
        registry: Arc<dyn SpotRegistry>,
        zones: Arc<ZoneBoard>,
        strategy: AllocationStrategy,
        max_reservation_retries: u32,
        lock_timeout: Duration,
    ) -> Self {
        Allocator {
            registry,
            zones,
            windows: LockTable::new("search window"),
            strategy,
            max_reservation_retries,
            lock_timeout,
        }
    }

    pub fn strategy(&self) -> AllocationStrategy {
        self.strategy
    }

    /// Claims a spot for `vehicle_type`.
    ///
    /// # Errors
    /// - `CapacityExhausted` when the strategy finds nothing, or every race
    ///   within the retry bound was lost
    /// - `ContentionTimeout` when the exclusion scope was not acquired in time
    pub async fn allocate(
        &self,
        vehicle_type: VehicleType,
        ctx: &AllocationContext,
    ) -> EngineResult<Reservation> {
        let spot_type = vehicle_type.spot_type();

        let reservation = match self.strategy.plan(ctx)? {
            SearchPlan::Proximity { gate_id } => self.allocate_nearest(spot_type, gate_id).await,
            SearchPlan::Zoned { start_floor } => self.allocate_zoned(spot_type, start_floor).await,
        }?;

        info!(
            spot_id = %reservation.spot_id(),
            %spot_type,
            strategy = %self.strategy.kind(),
            gate_id = %ctx.entry_gate_id,
            "Spot reserved"
        );
        Ok(reservation)
    }

    async fn allocate_nearest(
        &self,
        spot_type: SpotType,
        gate_id: GateId,
    ) -> EngineResult<Reservation> {
        let _window = self
            .windows
            .acquire((spot_type, gate_id), self.lock_timeout)
            .await?;

        let mut lost = 0;
        loop {
            match self.claim(spot_type, SearchScope::NearestTo(gate_id)).await? {
                Claim::Won(reservation) => return Ok(reservation),
                Claim::Exhausted => {
                    debug!(%spot_type, %gate_id, "No ranked vacant spot");
                    return Err(EngineError::capacity_exhausted(spot_type));
                }
                Claim::Lost(spot_id) => {
                    lost += 1;
                    warn!(%spot_id, %gate_id, lost, "Lost reservation race");
                    if lost > self.max_reservation_retries {
                        return Err(EngineError::capacity_exhausted(spot_type));
                    }
                }
            }
        }
    }

    async fn allocate_zoned(
        &self,
        spot_type: SpotType,
        start_floor: FloorId,
    ) -> EngineResult<Reservation> {
        let mut lost = 0;

        for floor_id in self.zones.spill_order(start_floor) {
            let mut lease = self.zones.lease(floor_id).await?;

            while let Some(zone_id) = lease.current_active() {
                match self.claim(spot_type, SearchScope::Zone(zone_id)).await? {
                    Claim::Won(reservation) => return Ok(reservation),
                    Claim::Exhausted => {
                        debug!(%zone_id, %floor_id, %spot_type, "Active zone has no vacant spot");
                        self.zones.advance(&mut lease).await?;
                    }
                    Claim::Lost(spot_id) => {
                        lost += 1;
                        warn!(%spot_id, %zone_id, lost, "Lost reservation race");
                        if lost > self.max_reservation_retries {
                            return Err(EngineError::capacity_exhausted(spot_type));
                        }
                    }
                }
            }

            debug!(%floor_id, %spot_type, "Floor exhausted, spilling over");
        }

        Err(EngineError::capacity_exhausted(spot_type))
    }

    /// Picks the best candidate and tries to reserve it.
    ///
    /// The conditional update runs in its own task, which wraps a won spot in
    /// a [`Reservation`] before handing it back. If the caller is dropped
    /// mid-claim, the task still finishes and the unclaimed reservation is
    /// released by its `Drop`.
    async fn claim(&self, spot_type: SpotType, scope: SearchScope) -> EngineResult<Claim> {
        let Some(spot) = first_candidate(self.registry.as_ref(), spot_type, scope).await? else {
            return Ok(Claim::Exhausted);
        };

        let spot_id = spot.id;
        let registry = Arc::clone(&self.registry);
        let attempt = tokio::spawn(async move {
            if registry.try_reserve(spot.id).await? {
                Ok(Some(Reservation::new(spot, registry)))
            } else {
                Ok::<_, EngineError>(None)
            }
        });

        match attempt.await {
            Ok(Ok(Some(reservation))) => Ok(Claim::Won(reservation)),
            Ok(Ok(None)) => Ok(Claim::Lost(spot_id)),
            Ok(Err(e)) => Err(e),
            Err(e) => {
                error!(%spot_id, error = %e, "Reservation task failed");
                Err(EngineError::Internal(format!("reservation of spot {spot_id} failed: {e}")))
            }
        }
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
    use parkline_core::{LotId, StrategyKind, ZoneId, ZoneStatus};
    use proptest::prelude::Just;
    use std::collections::HashSet;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn allocator_for(
        layout: parkline_core::LotLayout,
        kind: StrategyKind,
    ) -> (Arc<MemoryRegistry>, Arc<Allocator>) {
        let lot = layout.lot.clone();
        let registry = Arc::new(MemoryRegistry::new(layout).unwrap());
        let zones = Arc::new(ZoneBoard::load(registry.clone(), TIMEOUT).await.unwrap());
        let allocator = Allocator::new(
            registry.clone(),
            zones,
            AllocationStrategy::configure(kind, &lot, None),
            3,
            TIMEOUT,
        );
        (registry, Arc::new(allocator))
    }

    fn ctx() -> AllocationContext {
        AllocationContext {
            lot_id: LotId(1),
            entry_gate_id: GateId(1),
            floor_id: FloorId(1),
            exit_gate_id: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_n_callers_k_spots() {
        for kind in [
            StrategyKind::NearestToGate,
            StrategyKind::ZoneBased,
            StrategyKind::NearestToExit,
        ] {
            let (_, allocator) = allocator_for(testing::pool_layout(5), kind).await;

            let mut handles = Vec::new();
            for _ in 0..20 {
                let allocator = Arc::clone(&allocator);
                handles.push(tokio::spawn(async move {
                    allocator
                        .allocate(VehicleType::Car, &ctx())
                        .await
                        .map(Reservation::commit)
                }));
            }

            let mut won = HashSet::new();
            let mut exhausted = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(spot) => assert!(won.insert(spot.id), "{} handed out twice", spot.id),
                    Err(e) => {
                        assert!(e.is_capacity_exhausted(), "unexpected error: {e}");
                        exhausted += 1;
                    }
                }
            }
            assert_eq!(won.len(), 5, "{kind}");
            assert_eq!(exhausted, 15, "{kind}");
        }
    }

    #[tokio::test]
    async fn test_zone_ordering() {
        let (registry, allocator) =
            allocator_for(testing::two_zone_layout(), StrategyKind::ZoneBased).await;

        let first = allocator.allocate(VehicleType::Car, &ctx()).await.unwrap().commit();
        assert_eq!(first.zone_id, ZoneId(1));

        let second = allocator.allocate(VehicleType::Car, &ctx()).await.unwrap().commit();
        assert_eq!(second.zone_id, ZoneId(2));
        let zones = registry.zones_on_floor(FloorId(1)).await.unwrap();
        assert_eq!(zones[0].status, ZoneStatus::Full);
        assert_eq!(zones[1].status, ZoneStatus::Active);

        let third = allocator.allocate(VehicleType::Car, &ctx()).await.unwrap_err();
        assert!(third.is_capacity_exhausted());
    }

    #[tokio::test]
    async fn test_zoned_spills_to_next_floor() {
        let (_, allocator) =
            allocator_for(testing::two_floor_layout(), StrategyKind::ZoneBased).await;

        let mut zones = Vec::new();
        for _ in 0..4 {
            let spot = allocator.allocate(VehicleType::Car, &ctx()).await.unwrap().commit();
            zones.push(spot.zone_id);
        }
        assert_eq!(zones, vec![ZoneId(10), ZoneId(10), ZoneId(11), ZoneId(20)]);
        assert!(allocator
            .allocate(VehicleType::Car, &ctx())
            .await
            .unwrap_err()
            .is_capacity_exhausted());
    }

    #[tokio::test]
    async fn test_proximity_tie_break_is_stable() {
        let (registry, allocator) =
            allocator_for(testing::two_floor_layout(), StrategyKind::NearestToGate).await;

        for _ in 0..3 {
            let reservation = allocator.allocate(VehicleType::Car, &ctx()).await.unwrap();
            assert_eq!(reservation.spot_id(), SpotId(101));
            assert!(reservation.release().await.unwrap());
        }

        let held = allocator.allocate(VehicleType::Car, &ctx()).await.unwrap().commit();
        assert_eq!(held.id, SpotId(101));
        let next = allocator.allocate(VehicleType::Car, &ctx()).await.unwrap().commit();
        assert_eq!(next.id, SpotId(110));
        assert_eq!(registry.reserved_spots().await.unwrap(), vec![SpotId(101), SpotId(110)]);
    }

    #[tokio::test]
    async fn test_nearest_skips_spots_without_distance() {
        let (_, allocator) =
            allocator_for(testing::two_floor_layout(), StrategyKind::NearestToGate).await;

        // The only large spot has no distance to gate 1.
        let err = allocator.allocate(VehicleType::Truck, &ctx()).await.unwrap_err();
        assert!(err.is_capacity_exhausted());
    }

    #[tokio::test]
    async fn test_dropped_reservation_is_compensated() {
        let (registry, allocator) =
            allocator_for(testing::two_floor_layout(), StrategyKind::NearestToGate).await;

        let reservation = allocator.allocate(VehicleType::Car, &ctx()).await.unwrap();
        let spot_id = reservation.spot_id();
        drop(reservation);

        for _ in 0..100 {
            if registry.reserved_spots().await.unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let spot = registry.spot(spot_id).await.unwrap().unwrap();
        assert_eq!(spot.status, SpotStatus::Vacant);
    }

    #[tokio::test]
    async fn test_window_timeout_is_retryable() {
        let (_, allocator) =
            allocator_for(testing::two_floor_layout(), StrategyKind::NearestToGate).await;
        let allocator = Allocator {
            lock_timeout: Duration::from_millis(20),
            ..Arc::try_unwrap(allocator).ok().unwrap()
        };

        let _held = allocator
            .windows
            .acquire((SpotType::Compact, GateId(1)), TIMEOUT)
            .await
            .unwrap();
        let err = allocator.allocate(VehicleType::Car, &ctx()).await.unwrap_err();
        assert!(err.is_retryable());

        // A different spot type uses a different window.
        let bike = allocator.allocate(VehicleType::Motorcycle, &ctx()).await;
        assert!(bike.unwrap_err().is_capacity_exhausted());
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(24))]

        #[test]
        fn prop_no_spot_is_handed_out_twice(
            k in 1i64..8,
            gates in proptest::collection::vec(proptest::prop_oneof![Just(1i64), Just(3i64)], 1..24),
            kind in proptest::prop_oneof![
                Just(StrategyKind::NearestToGate),
                Just(StrategyKind::ZoneBased),
                Just(StrategyKind::NearestToExit),
            ],
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            let spots = runtime.block_on(async {
                let (_, allocator) = allocator_for(testing::pool_layout(k), kind).await;
                let handles: Vec<_> = gates
                    .iter()
                    .map(|&gate| {
                        let allocator = Arc::clone(&allocator);
                        tokio::spawn(async move {
                            let ctx = AllocationContext {
                                entry_gate_id: GateId(gate),
                                ..ctx()
                            };
                            allocator
                                .allocate(VehicleType::Car, &ctx)
                                .await
                                .map(|r| r.commit().id)
                        })
                    })
                    .collect();

                let mut won = Vec::new();
                for handle in handles {
                    match handle.await.unwrap() {
                        Ok(id) => won.push(id),
                        Err(e) => assert!(e.is_capacity_exhausted(), "unexpected {e}"),
                    }
                }
                won
            });

            let distinct: HashSet<_> = spots.iter().collect();
            proptest::prop_assert_eq!(distinct.len(), spots.len());
            proptest::prop_assert_eq!(spots.len() as i64, k.min(gates.len() as i64));
        }
    }
}
