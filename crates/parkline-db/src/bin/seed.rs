//! # Seed Data Generator
//!
//! Creates a demo multi-floor lot for development.
//!
//! ## Usage
//! ```bash
//! # 3 floors × 3 zones × 20 spots (default)
//! cargo run -p parkline-db --bin seed
//!
//! # Custom shape
//! cargo run -p parkline-db --bin seed -- --floors 5 --zones 4 --spots 30
//!
//! # Specify database path
//! cargo run -p parkline-db --bin seed -- --db ./data/parkline.db
//!
//! # Also write the layout as JSON
//! cargo run -p parkline-db --bin seed -- --json layout.json
//! ```
//!
//! ## Generated Layout
//! - Floor `n` has level `n`, zones `A`, `B`, ... with priorities 1, 2, ...
//! - Per zone: first 10% motorcycle, last 20% large, the rest compact
//! - Ground floor: one ENTRY gate and one EXIT gate (the designated exit)
//! - Every upper floor: one ENTRY_EXIT ramp gate
//! - Distance = 100 per floor of separation + walking offset inside the floor

use std::env;

use parkline_core::{
    FloorId, GateId, GateType, LotId, LotLayout, SpotId, SpotType, ZoneId, DEFAULT_LOT_ID,
};
use parkline_db::{Database, DbConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parkline=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut floors: i64 = 3;
    let mut zones: i64 = 3;
    let mut spots: i64 = 20;
    let mut db_path = String::from("./parkline_dev.db");
    let mut json_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "--floors" | "-f" => {
                floors = value.and_then(|v| v.parse().ok()).unwrap_or(floors);
                i += 1;
            }
            "--zones" | "-z" => {
                zones = value.and_then(|v| v.parse().ok()).unwrap_or(zones);
                i += 1;
            }
            "--spots" | "-s" => {
                spots = value.and_then(|v| v.parse().ok()).unwrap_or(spots);
                i += 1;
            }
            "--db" | "-d" => {
                if let Some(v) = value {
                    db_path = v;
                }
                i += 1;
            }
            "--json" => {
                json_path = value;
                i += 1;
            }
            "--help" | "-h" => {
                println!("Parkline Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -f, --floors <N>   Floors to generate (default: 3)");
                println!("  -z, --zones <N>    Zones per floor (default: 3)");
                println!("  -s, --spots <N>    Spots per zone (default: 20)");
                println!("  -d, --db <PATH>    Database file path (default: ./parkline_dev.db)");
                println!("      --json <PATH>  Also write the layout as JSON");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let layout = demo_layout(DEFAULT_LOT_ID, floors.max(1), zones.clamp(1, 26), spots.max(1))?;

    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path, "Connected, migrations applied");

    if db.layouts().exists(layout.lot.id).await? {
        println!("⚠ Lot {} already exists in {}", layout.lot.id, db_path);
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    db.layouts().import(&layout).await?;

    if let Some(path) = json_path {
        std::fs::write(&path, serde_json::to_string_pretty(&layout)?)?;
        info!(%path, "Layout written as JSON");
    }

    let counts = db.layouts().type_counts(layout.lot.id).await?;
    println!("✓ Seeded lot '{}' into {}", layout.lot.name, db_path);
    println!(
        "  {} floors, {} zones, {} spots, {} gates",
        layout.floors.len(),
        layout.zones.len(),
        layout.spots.len(),
        layout.gates.len()
    );
    for (spot_type, total, _) in counts {
        println!("  {:<10} {}", spot_type, total);
    }

    Ok(())
}

/// Generates a regular demo layout.
fn demo_layout(
    lot_id: LotId,
    floors: i64,
    zones_per_floor: i64,
    spots_per_zone: i64,
) -> Result<LotLayout, Box<dyn std::error::Error>> {
    let mut builder = LotLayout::builder(lot_id, "Parkline Demo Garage");

    let entry = GateId(1);
    let exit = GateId(2);
    builder = builder
        .floor(FloorId(1), 0, "Ground")
        .gate(entry, FloorId(1), "Ground Entry", GateType::Entry)
        .gate(exit, FloorId(1), "Ground Exit", GateType::Exit)
        .exit_gate(exit);
    for level in 1..floors {
        let floor_id = FloorId(level + 1);
        builder = builder
            .floor(floor_id, level as i32, format!("Level {level}"))
            .gate(GateId(level + 2), floor_id, format!("Ramp {level}"), GateType::EntryExit);
    }

    // (gate, floor index)
    let mut gates = vec![(entry, 0), (exit, 0)];
    gates.extend((1..floors).map(|level| (GateId(level + 2), level)));

    for level in 0..floors {
        let floor_id = FloorId(level + 1);
        for z in 0..zones_per_floor {
            let zone_id = ZoneId(floor_id.get() * 100 + z + 1);
            let letter = (b'A' + z as u8) as char;
            builder = builder.zone(
                zone_id,
                floor_id,
                format!("{}{}", letter, level),
                (z + 1) as i32,
            );

            for n in 0..spots_per_zone {
                let spot_id = SpotId(zone_id.get() * 1000 + n + 1);
                let spot_type = if n < spots_per_zone / 10 {
                    SpotType::Motorcycle
                } else if n >= spots_per_zone - spots_per_zone / 5 {
                    SpotType::Large
                } else {
                    SpotType::Compact
                };
                builder = builder.spot(spot_id, zone_id, spot_type);

                let offset = (z * spots_per_zone + n) as u32;
                for (gate_id, gate_level) in &gates {
                    let floors_apart = (level - gate_level).unsigned_abs() as u32;
                    builder = builder.distance(spot_id, *gate_id, floors_apart * 100 + offset);
                }
            }
        }
    }

    Ok(builder.build()?)
}
