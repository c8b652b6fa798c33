//! # Repository Module
//!
//! Database repository implementations for Parkline.
//!
//! ## Repository Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Repositories                                    │
//! │                                                                         │
//! │  SpotRepository      find_vacant, try_reserve, cancel_reservation,     │
//! │                      occupy_with_ticket, free                          │
//! │  ZoneRepository      list_for_floor, apply_changes                     │
//! │  GateRepository      get, list_for_lot, set_status                     │
//! │  TicketRepository    get, active_for_spot, active_by_plate             │
//! │  LayoutRepository    import, load, occupancy counters                  │
//! │                                                                         │
//! │  Every multi-row transition runs in one transaction whose FIRST        │
//! │  statement is a write. SQLite then takes the write lock up front       │
//! │  (waiting on busy_timeout) instead of failing a read→write upgrade.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Queries use the runtime `sqlx::query` / `query_as` API with `FromRow`
//! records from parkline-core.

pub mod gate;
pub mod layout;
pub mod spot;
pub mod ticket;
pub mod zone;

// =============================================================================
// Test Fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use parkline_core::{
        FloorId, GateId, GateType, LotId, LotLayout, SpotId, SpotType, ZoneId,
    };

    use crate::{Database, DbConfig};

    /// Two floors, two zones on the ground floor, one on level 1.
    ///
    /// ```text
    /// floor 1 (level 0): zone 10 (prio 1) compact 100..=101, large 102
    ///                    zone 11 (prio 2) compact 110
    /// floor 2 (level 1): zone 20 (prio 1) compact 200
    /// gate 1 entry (floor 1), gate 2 exit (floor 1)
    /// ```
    pub fn layout() -> LotLayout {
        LotLayout::builder(LotId(1), "Fixture Lot")
            .floor(FloorId(1), 0, "Ground")
            .floor(FloorId(2), 1, "Level 1")
            .zone(ZoneId(10), FloorId(1), "A", 1)
            .zone(ZoneId(11), FloorId(1), "B", 2)
            .zone(ZoneId(20), FloorId(2), "C", 1)
            .spots(ZoneId(10), SpotType::Compact, 100..=101)
            .spot(SpotId(102), ZoneId(10), SpotType::Large)
            .spot(SpotId(110), ZoneId(11), SpotType::Compact)
            .spot(SpotId(200), ZoneId(20), SpotType::Compact)
            .gate(GateId(1), FloorId(1), "North In", GateType::Entry)
            .gate(GateId(2), FloorId(1), "South Out", GateType::Exit)
            .distance(SpotId(100), GateId(1), 8)
            .distance(SpotId(101), GateId(1), 3)
            .distance(SpotId(110), GateId(1), 3)
            .distance(SpotId(200), GateId(1), 40)
            .distance(SpotId(100), GateId(2), 1)
            .exit_gate(GateId(2))
            .build()
            .expect("fixture layout is valid")
    }

    pub async fn seeded_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.layouts().import(&layout()).await.unwrap();
        db
    }
}
