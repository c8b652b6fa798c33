//! # Engine Configuration
//!
//! Configuration management for the allocation engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PARKLINE_STRATEGY=zone_based                                       │
//! │     PARKLINE_DB_PATH=/var/lib/parkline/lot.db                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/parkline/parkline.toml (Linux)                           │
//! │     ~/Library/Application Support/com.parkline.parkline/... (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     lot 1, nearest_to_gate, 2s lock timeout                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # parkline.toml
//! [lot]
//! id = 1
//! exit_gate = 2          # overrides the lot's designated exit
//!
//! [allocation]
//! strategy = "zone_based"  # nearest_to_gate | zone_based | nearest_to_exit
//! max_reservation_retries = 3
//! lock_timeout_ms = 2000
//! contention_retries = 3
//!
//! [fees]
//! grace_minutes = 15
//! motorcycle = { hourly_cents = 100, daily_cap_cents = 800 }
//! car = { hourly_cents = 300, daily_cap_cents = 2000 }
//! truck = { hourly_cents = 600, daily_cap_cents = 4500 }
//!
//! [database]
//! path = "parkline.db"
//! max_connections = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use parkline_core::{
    GateId, LotId, RateCard, StrategyKind, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_LOT_ID,
    DEFAULT_MAX_RESERVATION_RETRIES,
};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Lot Settings
// =============================================================================

/// Which lot this engine serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSettings {
    #[serde(default = "default_lot_id")]
    pub id: LotId,

    /// Exit gate used by nearest-to-exit. `None` = the lot's designated exit.
    #[serde(default)]
    pub exit_gate: Option<GateId>,
}

fn default_lot_id() -> LotId {
    DEFAULT_LOT_ID
}

impl Default for LotSettings {
    fn default() -> Self {
        LotSettings {
            id: default_lot_id(),
            exit_gate: None,
        }
    }
}

// =============================================================================
// Allocation Settings
// =============================================================================

/// Allocator behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSettings {
    /// Active allocation strategy, chosen once at startup.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Lost reservation races tolerated per allocate call.
    #[serde(default = "default_max_reservation_retries")]
    pub max_reservation_retries: u32,

    /// Bound on waiting for a floor or search-window lock (milliseconds).
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Whole-allocation retries after a contention timeout.
    #[serde(default = "default_contention_retries")]
    pub contention_retries: u32,

    /// Initial backoff between contention retries (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between contention retries (milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_reservation_retries() -> u32 {
    DEFAULT_MAX_RESERVATION_RETRIES
}
fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}
fn default_contention_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    25
}
fn default_max_backoff() -> u64 {
    1_000
}

impl Default for AllocationSettings {
    fn default() -> Self {
        AllocationSettings {
            strategy: StrategyKind::default(),
            max_reservation_retries: default_max_reservation_retries(),
            lock_timeout_ms: default_lock_timeout(),
            contention_retries: default_contention_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl AllocationSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Durable registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for SQLite's write lock (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "parkline", "parkline")
        .map(|dirs| dirs.data_dir().join("parkline.db"))
        .unwrap_or_else(|| PathBuf::from("parkline.db"))
}
fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub lot: LotSettings,

    #[serde(default)]
    pub allocation: AllocationSettings,

    /// Rate card used for exit fees.
    #[serde(default)]
    pub fees: RateCard,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (parkline.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.allocation.lock_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "lock_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.allocation.initial_backoff_ms > self.allocation.max_backoff_ms {
            return Err(EngineError::InvalidConfig(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.allocation.initial_backoff_ms, self.allocation.max_backoff_ms
            )));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        for (name, tariff) in [
            ("motorcycle", self.fees.motorcycle),
            ("car", self.fees.car),
            ("truck", self.fees.truck),
        ] {
            if tariff.hourly_cents < 0 || tariff.daily_cap_cents.is_some_and(|cap| cap < 0) {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} tariff must not be negative"
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(id) = var("PARKLINE_LOT_ID") {
            match id.parse::<i64>() {
                Ok(id) => {
                    debug!(lot_id = id, "Overriding lot from environment");
                    self.lot.id = LotId(id);
                }
                Err(_) => warn!(value = %id, "Invalid PARKLINE_LOT_ID"),
            }
        }

        if let Some(gate) = var("PARKLINE_EXIT_GATE") {
            if let Ok(gate) = gate.parse::<i64>() {
                self.lot.exit_gate = Some(GateId(gate));
            }
        }

        if let Some(strategy) = var("PARKLINE_STRATEGY") {
            match strategy.parse() {
                Ok(parsed) => {
                    debug!(strategy = %strategy, "Overriding strategy from environment");
                    self.allocation.strategy = parsed;
                }
                Err(_) => warn!(strategy = %strategy, "Unknown strategy in environment"),
            }
        }

        if let Some(retries) = var("PARKLINE_MAX_RESERVATION_RETRIES") {
            if let Ok(n) = retries.parse::<u32>() {
                self.allocation.max_reservation_retries = n;
            }
        }

        if let Some(timeout) = var("PARKLINE_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                debug!(lock_timeout_ms = ms, "Overriding lock timeout from environment");
                self.allocation.lock_timeout_ms = ms;
            }
        }

        if let Some(retries) = var("PARKLINE_CONTENTION_RETRIES") {
            if let Ok(n) = retries.parse::<u32>() {
                self.allocation.contention_retries = n;
            }
        }

        if let Some(grace) = var("PARKLINE_GRACE_MINUTES") {
            if let Ok(minutes) = grace.parse::<u32>() {
                self.fees.grace_minutes = minutes;
            }
        }

        if let Some(path) = var("PARKLINE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(max) = var("PARKLINE_DB_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse::<u32>() {
                self.database.max_connections = n;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "parkline", "parkline")
            .map(|dirs| dirs.config_dir().join("parkline.toml"))
    }
}
