//! # Fee Module
//!
//! Integer money and the parking rate card.
//!
//! ## Billing Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fee Computation                                  │
//! │                                                                         │
//! │  stay ≤ grace period                  → 0                               │
//! │  otherwise hours = ceil(stay / 1h)                                      │
//! │    full days  = hours / 24  → each charged min(24 × hourly, daily_cap)  │
//! │    remainder  = hours % 24  → charged min(rem × hourly, daily_cap)      │
//! │                                                                         │
//! │  Example: car, $3.00/h, cap $20.00, stay 26h10m                         │
//! │    hours = 27 → 1 day ($20.00) + 3h ($9.00) = $29.00                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All amounts are cents in an `i64`; floating point never touches a fee.

use std::fmt;
use std::ops::{Add, AddAssign, Mul};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, ValidationError};
use crate::types::VehicleType;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Rate Card
// =============================================================================

/// Tariff for one vehicle class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tariff {
    pub hourly_cents: i64,
    /// Upper bound per 24h block. `None` = uncapped.
    #[serde(default)]
    pub daily_cap_cents: Option<i64>,
}

impl Tariff {
    pub const fn hourly(hourly_cents: i64) -> Self {
        Tariff {
            hourly_cents,
            daily_cap_cents: None,
        }
    }

    pub const fn with_daily_cap(mut self, cap_cents: i64) -> Self {
        self.daily_cap_cents = Some(cap_cents);
        self
    }

    fn capped(&self, amount: Money) -> Money {
        match self.daily_cap_cents {
            Some(cap) if amount.cents() > cap => Money::from_cents(cap),
            _ => amount,
        }
    }
}

/// Rates for every vehicle class plus the free grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCard {
    pub motorcycle: Tariff,
    pub car: Tariff,
    pub truck: Tariff,
    /// Stays up to this many minutes are free.
    #[serde(default)]
    pub grace_minutes: u32,
}

impl Default for RateCard {
    fn default() -> Self {
        RateCard {
            motorcycle: Tariff::hourly(100).with_daily_cap(800),
            car: Tariff::hourly(300).with_daily_cap(2000),
            truck: Tariff::hourly(600).with_daily_cap(4500),
            grace_minutes: 15,
        }
    }
}

impl RateCard {
    pub fn tariff(&self, vehicle_type: VehicleType) -> Tariff {
        match vehicle_type {
            VehicleType::Motorcycle => self.motorcycle,
            VehicleType::Car => self.car,
            VehicleType::Truck => self.truck,
        }
    }

    /// Fee owed for a stay from `entry` to `exit`.
    pub fn fee_for(
        &self,
        vehicle_type: VehicleType,
        entry: DateTime<Utc>,
        exit: DateTime<Utc>,
    ) -> CoreResult<Money> {
        let stay = exit.signed_duration_since(entry);
        if stay.num_seconds() < 0 {
            return Err(ValidationError::ExitBeforeEntry.into());
        }

        if stay.num_seconds() <= i64::from(self.grace_minutes) * 60 {
            return Ok(Money::zero());
        }

        let seconds = stay.num_seconds();
        let hours = (seconds + 3599) / 3600;
        let tariff = self.tariff(vehicle_type);
        let hourly = Money::from_cents(tariff.hourly_cents);

        let per_day = tariff.capped(hourly * 24);
        let remainder = tariff.capped(hourly * (hours % 24));

        Ok(per_day * (hours / 24) + remainder)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(2950).to_string(), "$29.50");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-150).to_string(), "-$1.50");
    }

    #[test]
    fn test_grace_period_is_free() {
        let card = RateCard::default();
        assert_eq!(card.fee_for(VehicleType::Car, at(0), at(15)).unwrap(), Money::zero());
        assert_eq!(
            card.fee_for(VehicleType::Car, at(0), at(16)).unwrap(),
            Money::from_cents(300)
        );
    }

    #[test]
    fn test_started_hours_round_up() {
        let card = RateCard::default();
        // 2h01m → 3 hours
        assert_eq!(
            card.fee_for(VehicleType::Truck, at(0), at(121)).unwrap(),
            Money::from_cents(1800)
        );
    }

    #[test]
    fn test_daily_cap_applies_per_block() {
        let card = RateCard::default();
        // 26h10m → 27 hours = 1 day (cap 2000) + 3h (900)
        let fee = card
            .fee_for(VehicleType::Car, at(0), at(26 * 60 + 10))
            .unwrap();
        assert_eq!(fee, Money::from_cents(2900));

        // 10 hours would be 3000 but caps at 2000
        let fee = card.fee_for(VehicleType::Car, at(0), at(600)).unwrap();
        assert_eq!(fee, Money::from_cents(2000));
    }

    #[test]
    fn test_exit_before_entry_rejected() {
        let card = RateCard::default();
        assert!(card.fee_for(VehicleType::Car, at(60), at(0)).is_err());
    }

    proptest! {
        #[test]
        fn fee_never_decreases_with_longer_stay(a in 0i64..10_000, b in 0i64..10_000) {
            let card = RateCard::default();
            let (short, long) = if a <= b { (a, b) } else { (b, a) };
            let fee_short = card.fee_for(VehicleType::Car, at(0), at(short)).unwrap();
            let fee_long = card.fee_for(VehicleType::Car, at(0), at(long)).unwrap();
            prop_assert!(fee_short <= fee_long);
        }
    }
}
