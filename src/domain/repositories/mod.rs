//! Repository traits for the domain layer
//!
//! Contains:
//! - `RepositoryProvider`: unified access to all per-aggregate repositories
//! - `DomainResult`: standard result type for domain operations

use super::account::AccountRepository;
use super::billing::BillingRepository;
use super::charging_session::ChargingSessionRepository;
use super::tariff::TariffRepository;
use crate::shared::errors::DomainError;

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;

/// Provides access to all domain repositories.
///
/// Consumers request only the repository they need:
///
/// ```ignore
/// async fn handle(repos: &dyn RepositoryProvider) {
///     let tariff = repos.tariffs().find_for_station("S1").await?;
///     let session = repos.charging_sessions().find_by_id("SESS1").await?;
/// }
/// ```
pub trait RepositoryProvider: Send + Sync {
    fn charging_sessions(&self) -> &dyn ChargingSessionRepository;
    fn tariffs(&self) -> &dyn TariffRepository;
    fn accounts(&self) -> &dyn AccountRepository;
    fn billing(&self) -> &dyn BillingRepository;
}
