//! ChargingSession aggregate
//!
//! The persisted billing record spanning remote start to settlement.

pub mod model;
pub mod repository;

pub use model::{ChargingSession, ChargingSessionStatus};
pub use repository::ChargingSessionRepository;
