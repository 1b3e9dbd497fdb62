//! SeaORM implementation of RepositoryProvider

use sea_orm::DatabaseConnection;

use crate::domain::{
    AccountRepository, BillingRepository, ChargingSessionRepository, RepositoryProvider,
    TariffRepository,
};

use super::account_repository::SeaOrmAccountRepository;
use super::billing_repository::SeaOrmBillingRepository;
use super::charging_session_repository::SeaOrmChargingSessionRepository;
use super::tariff_repository::SeaOrmTariffRepository;

/// Unified repository provider backed by SeaORM.
///
/// Holds one connection pool and exposes per-aggregate repository accessors.
///
/// ```ignore
/// let repos = SeaOrmRepositoryProvider::new(db.clone());
/// let tariff = repos.tariffs().find_for_station("CP001").await?;
/// let outcome = repos.billing().settle(record).await?;
/// ```
pub struct SeaOrmRepositoryProvider {
    charging_sessions: SeaOrmChargingSessionRepository,
    tariffs: SeaOrmTariffRepository,
    accounts: SeaOrmAccountRepository,
    billing: SeaOrmBillingRepository,
}

impl SeaOrmRepositoryProvider {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            charging_sessions: SeaOrmChargingSessionRepository::new(db.clone()),
            tariffs: SeaOrmTariffRepository::new(db.clone()),
            accounts: SeaOrmAccountRepository::new(db.clone()),
            billing: SeaOrmBillingRepository::new(db),
        }
    }
}

impl RepositoryProvider for SeaOrmRepositoryProvider {
    fn charging_sessions(&self) -> &dyn ChargingSessionRepository {
        &self.charging_sessions
    }

    fn tariffs(&self) -> &dyn TariffRepository {
        &self.tariffs
    }

    fn accounts(&self) -> &dyn AccountRepository {
        &self.accounts
    }

    fn billing(&self) -> &dyn BillingRepository {
        &self.billing
    }
}
