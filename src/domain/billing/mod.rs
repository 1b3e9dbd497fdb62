//! Billing aggregate
//!
//! The atomic debit-and-close unit used by settlement.

pub mod model;
pub mod repository;

pub use model::{SettlementOutcome, SettlementRecord};
pub use repository::BillingRepository;
