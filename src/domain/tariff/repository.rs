//! Tariff repository interface

use async_trait::async_trait;

use super::model::Tariff;
use crate::domain::DomainResult;

#[async_trait]
pub trait TariffRepository: Send + Sync {
    /// First tariff configured for the station (lowest id), if any.
    async fn find_for_station(&self, station_id: &str) -> DomainResult<Option<Tariff>>;
    async fn save(&self, tariff: Tariff) -> DomainResult<Tariff>;
}
