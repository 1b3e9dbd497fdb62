//! Tariff domain entity

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Per-station energy price
#[derive(Debug, Clone, Serialize)]
pub struct Tariff {
    pub id: i32,
    pub station_id: String,
    /// Price per kWh (in smallest currency unit, e.g., cents)
    pub price_per_kwh: i64,
    /// Currency code (ISO 4217)
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl Tariff {
    pub fn new(station_id: impl Into<String>, price_per_kwh: i64, currency: impl Into<String>) -> Self {
        Self {
            id: 0,
            station_id: station_id.into(),
            price_per_kwh,
            currency: currency.into(),
            created_at: Utc::now(),
        }
    }

    /// Cost of `energy_wh` at this tariff, rounded half away from zero to
    /// the smallest currency unit.
    pub fn cost_for(&self, energy_wh: i64) -> i64 {
        cost_for(energy_wh, self.price_per_kwh)
    }
}

/// `energy_wh / 1000 × price_per_kwh` in exact decimal arithmetic.
pub fn cost_for(energy_wh: i64, price_per_kwh: i64) -> i64 {
    let kwh = Decimal::new(energy_wh, 3);
    (kwh * Decimal::from(price_per_kwh))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(i64::MAX)
}

/// Wh to kWh without float drift on the way in.
pub fn wh_to_kwh(energy_wh: i64) -> f64 {
    Decimal::new(energy_wh, 3).to_f64().unwrap_or_default()
}
