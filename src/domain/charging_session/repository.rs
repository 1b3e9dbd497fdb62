//! ChargingSession repository interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::ChargingSession;
use crate::domain::DomainResult;

#[async_trait]
pub trait ChargingSessionRepository: Send + Sync {
    async fn save(&self, session: ChargingSession) -> DomainResult<()>;
    async fn find_by_id(&self, id: &str) -> DomainResult<Option<ChargingSession>>;
    async fn find_by_station(&self, station_id: &str) -> DomainResult<Vec<ChargingSession>>;

    /// `initiated → started`. Returns `false` when the session was not in
    /// `initiated` (unknown id, or already started).
    async fn mark_started(
        &self,
        id: &str,
        transaction_id: i32,
        start_time: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// `started → error` with the given energy and a zero amount, no debit.
    /// Returns `false` when the session was not in `started`.
    async fn mark_abandoned(
        &self,
        id: &str,
        energy_kwh: f64,
        stop_time: DateTime<Utc>,
    ) -> DomainResult<bool>;
}
