//! # parkline-db: Database Layer for Parkline
//!
//! SQLite storage for the lot layout, spot states, tickets and occupancy
//! counters, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Parkline Data Flow                               │
//! │                                                                         │
//! │  parkline-engine (SqliteRegistry)                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   parkline-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ SpotRepo      │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ ZoneRepo      │    │ 001_initial  │  │   │
//! │  │   │ WAL, FKs,     │    │ GateRepo      │    │ _schema.sql  │  │   │
//! │  │   │ busy_timeout  │    │ TicketRepo    │    │              │  │   │
//! │  │   │               │    │ LayoutRepo    │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parkline_db::{Database, DbConfig, SpotScope};
//!
//! let db = Database::new(DbConfig::new("parkline.db")).await?;
//! db.layouts().import(&layout).await?;
//!
//! let candidates = db
//!     .spots()
//!     .find_vacant(SpotType::Compact, SpotScope::NearestTo(gate_id), 8)
//!     .await?;
//! if db.spots().try_reserve(candidates[0].id).await? {
//!     db.spots().occupy_with_ticket(&ticket).await?;
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::gate::GateRepository;
pub use repository::layout::LayoutRepository;
pub use repository::spot::{SpotRepository, SpotScope};
pub use repository::ticket::TicketRepository;
pub use repository::zone::ZoneRepository;
