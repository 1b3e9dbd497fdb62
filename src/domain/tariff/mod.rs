//! Tariff aggregate
//!
//! Contains the Tariff entity and cost calculation.

pub mod model;
pub mod repository;

pub use model::{cost_for, wh_to_kwh, Tariff};
pub use repository::TariffRepository;
