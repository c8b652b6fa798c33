//! # parkline-engine: Concurrency-Safe Spot Allocation
//!
//! This crate runs the allocation rules of `parkline-core` under true
//! parallelism: many gates park and release vehicles at the same time and no
//! spot is ever handed to two of them.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Parkline Engine                                 │
//! │                                                                         │
//! │   gate handlers (many, concurrent)                                     │
//! │        │ park / exit / release / snapshot                              │
//! │        ▼                                                                │
//! │   ┌──────────────────────────────────────────────────────────────────┐ │
//! │   │                      ParkingService                              │ │
//! │   │  validation ─► backoff ─► Allocator ─► OccupancyLedger           │ │
//! │   │                               │              │                   │ │
//! │   │             ┌─────────────────┼──────┐       │                   │ │
//! │   │             ▼                 ▼      ▼       ▼                   │ │
//! │   │      AllocationStrategy   ZoneBoard  LockTable                   │ │
//! │   │      (gate/exit/zone)     (floor     (type, gate)                │ │
//! │   │                            mutexes)  search windows              │ │
//! │   └──────────────────────────────┬───────────────────────────────────┘ │
//! │                                  ▼                                      │
//! │   ┌──────────────────────────────────────────────────────────────────┐ │
//! │   │ SpotRegistry (async trait)                                       │ │
//! │   │   MemoryRegistry: per-spot mutex CAS, atomic counters            │ │
//! │   │   SqliteRegistry: conditional UPDATEs, transactions              │ │
//! │   └──────────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`service`] - `ParkingService`, the park/exit workflow
//! - [`allocator`] - Claim protocol and the `Reservation` guard
//! - [`strategy`] - Nearest-to-gate, nearest-to-exit and zone-based plans
//! - [`zones`] - Per-floor zone pointers behind async mutexes
//! - [`ledger`] - Occupy/free transitions with counters
//! - [`locks`] - Keyed async locks with bounded waits
//! - [`registry`] - The storage seam
//! - [`memory`] / [`sqlite`] - Registry implementations
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parkline_engine::{EngineConfig, ParkingService};
//! use parkline_core::{GateId, VehicleType};
//!
//! let config = EngineConfig::load(None)?;
//! let service = ParkingService::open_sqlite(config).await?;
//!
//! let ticket = service.park("KA-01-HH-1234", VehicleType::Car, GateId(1)).await?;
//! let receipt = service.exit(&ticket.id, GateId(2)).await?;
//! println!("Fee: {}", receipt.fee);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocator;
pub mod config;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod memory;
pub mod registry;
pub mod service;
pub mod sqlite;
pub mod strategy;
pub mod zones;

// =============================================================================
// Re-exports
// =============================================================================

pub use allocator::{Allocator, Reservation};
pub use config::{AllocationSettings, DatabaseSettings, EngineConfig, LotSettings};
pub use error::{EngineError, EngineResult};
pub use ledger::OccupancyLedger;
pub use memory::MemoryRegistry;
pub use registry::{Counters, SearchScope, SpotRegistry};
pub use service::{ExitReceipt, FeeSettlement, NoopSettlement, ParkingService};
pub use sqlite::SqliteRegistry;
pub use strategy::{AllocationStrategy, SearchPlan};
pub use zones::{FloorLease, ZoneBoard};

// =============================================================================
// Test Fixtures
// =============================================================================
