//! # Arrival Simulator
//!
//! Drives a seeded database with concurrent arrivals through every entry
//! gate, then lets part of the lot leave, and prints the occupancy snapshot.
//!
//! ## Usage
//! ```bash
//! # Seed first
//! cargo run -p parkline-db --bin seed -- --db ./parkline_dev.db
//!
//! # 200 arrivals, half of them leave again
//! PARKLINE_DB_PATH=./parkline_dev.db cargo run -p parkline-engine --bin simulate
//!
//! # Zone-based strategy, more traffic
//! PARKLINE_STRATEGY=zone_based cargo run -p parkline-engine --bin simulate -- --arrivals 500
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Duration as StayLength;
use parkline_core::{Gate, VehicleType};
use parkline_db::{Database, DbConfig};
use parkline_engine::{EngineConfig, ParkingService, SpotRegistry, SqliteRegistry};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Tally {
    parked: u64,
    lot_full: u64,
    contended: u64,
    failed: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parkline=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut arrivals: u64 = 200;
    let mut leave_ratio: f64 = 0.5;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "--config" | "-c" => {
                config_path = value.map(PathBuf::from);
                i += 1;
            }
            "--arrivals" | "-n" => {
                arrivals = value.and_then(|v| v.parse().ok()).unwrap_or(arrivals);
                i += 1;
            }
            "--leave" | "-l" => {
                leave_ratio = value.and_then(|v| v.parse().ok()).unwrap_or(leave_ratio);
                i += 1;
            }
            "--help" | "-h" => {
                println!("Parkline Arrival Simulator");
                println!();
                println!("Usage: simulate [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Engine config file (default: platform config dir)");
                println!("  -n, --arrivals <N>   Concurrent arrivals (default: 200)");
                println!("  -l, --leave <R>      Share of parked vehicles that exit (default: 0.5)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let config = EngineConfig::load(config_path)?;
    let db = Database::new(
        DbConfig::new(config.database.path.clone())
            .max_connections(config.database.max_connections)
            .busy_timeout(Duration::from_millis(config.database.busy_timeout_ms)),
    )
    .await?;

    if !db.layouts().exists(config.lot.id).await? {
        println!("⚠ Lot {} not found in {}", config.lot.id, config.database.path.display());
        println!("  Run the seed binary first.");
        return Ok(());
    }

    let registry = Arc::new(SqliteRegistry::open(db, config.lot.id).await?);
    let gates = registry.gates().await?;
    let entries: Vec<Gate> = gates
        .iter()
        .filter(|g| g.is_operational() && g.gate_type.allows_entry())
        .cloned()
        .collect();
    let exit = registry
        .lot()
        .await?
        .exit_gate_id
        .or_else(|| {
            gates
                .iter()
                .find(|g| g.is_operational() && g.gate_type.allows_exit())
                .map(|g| g.id)
        });

    if entries.is_empty() {
        println!("⚠ Lot {} has no operational entry gate", config.lot.id);
        return Ok(());
    }

    let service = Arc::new(ParkingService::start(config, registry.clone()).await?);
    info!(strategy = %service.strategy(), arrivals, gates = entries.len(), "Simulation starting");

    // =========================================================================
    // Arrivals
    // =========================================================================

    let started = Instant::now();
    let mut handles = Vec::with_capacity(arrivals as usize);
    for n in 0..arrivals {
        let service = Arc::clone(&service);
        let gate = entries[(n as usize) % entries.len()].id;
        let vehicle = match n % 10 {
            0 => VehicleType::Motorcycle,
            8 | 9 => VehicleType::Truck,
            _ => VehicleType::Car,
        };
        handles.push(tokio::spawn(async move {
            service.park(&format!("SIM-{n:05}"), vehicle, gate).await
        }));
    }

    let mut tally = Tally::default();
    let mut tickets = Vec::new();
    for handle in handles {
        match handle.await? {
            Ok(ticket) => {
                tally.parked += 1;
                tickets.push(ticket);
            }
            Err(e) if e.is_capacity_exhausted() => tally.lot_full += 1,
            Err(e) if e.is_retryable() => tally.contended += 1,
            Err(e) => {
                warn!(error = %e, "Arrival failed");
                tally.failed += 1;
            }
        }
    }
    let elapsed = started.elapsed();

    // =========================================================================
    // Departures
    // =========================================================================

    let leaving = ((tickets.len() as f64) * leave_ratio.clamp(0.0, 1.0)) as usize;
    let mut revenue = 0i64;
    if let Some(exit_gate) = exit {
        for (n, ticket) in tickets.iter().take(leaving).enumerate() {
            let stay = StayLength::minutes(20 + (n as i64 * 37) % 600);
            match service.exit_at(&ticket.id, exit_gate, ticket.entry_time + stay).await {
                Ok(receipt) => revenue += receipt.fee.cents(),
                Err(e) => warn!(ticket_id = %ticket.id, error = %e, "Exit failed"),
            }
        }
    } else {
        warn!("No exit gate, skipping departures");
    }

    let snapshot = service.snapshot().await?;

    println!("✓ Simulation finished in {:.2?}", elapsed);
    println!(
        "  parked {}, lot full {}, contended {}, failed {}",
        tally.parked, tally.lot_full, tally.contended, tally.failed
    );
    println!("  {} departures, revenue {}", leaving, parkline_core::Money::from_cents(revenue));
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
