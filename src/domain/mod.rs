pub mod account;
pub mod billing;
pub mod charging_session;
pub mod repositories;
pub mod tariff;

pub use account::{Account, AccountRepository};
pub use billing::{BillingRepository, SettlementOutcome, SettlementRecord};
pub use charging_session::{ChargingSession, ChargingSessionRepository, ChargingSessionStatus};
pub use repositories::{DomainResult, RepositoryProvider};
pub use tariff::{Tariff, TariffRepository};

pub use crate::shared::errors::DomainError;
