//! SeaORM repository implementations

mod account_repository;
mod billing_repository;
mod charging_session_repository;
mod repository_provider;
mod tariff_repository;

pub use account_repository::SeaOrmAccountRepository;
pub use billing_repository::SeaOrmBillingRepository;
pub use charging_session_repository::SeaOrmChargingSessionRepository;
pub use repository_provider::SeaOrmRepositoryProvider;
pub use tariff_repository::SeaOrmTariffRepository;
