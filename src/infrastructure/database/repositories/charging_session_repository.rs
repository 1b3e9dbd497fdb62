//! SeaORM implementation of ChargingSessionRepository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::domain::{
    ChargingSession, ChargingSessionRepository, ChargingSessionStatus, DomainError, DomainResult,
};
use crate::infrastructure::database::entities::charging_session::{self, Column};

pub(super) fn entity_to_domain(m: charging_session::Model) -> DomainResult<ChargingSession> {
    let status = ChargingSessionStatus::from_str(&m.status)
        .ok_or_else(|| DomainError::Storage(format!("unknown session status '{}'", m.status)))?;
    Ok(ChargingSession {
        id: m.id,
        station_id: m.station_id,
        user_id: m.user_id,
        transaction_id: m.transaction_id,
        energy_limit: m.energy_limit,
        start_time: m.start_time,
        stop_time: m.stop_time,
        energy: m.energy,
        amount: m.amount,
        status,
        created_at: m.created_at,
    })
}

fn domain_to_active(s: ChargingSession) -> charging_session::ActiveModel {
    charging_session::ActiveModel {
        id: Set(s.id),
        station_id: Set(s.station_id),
        user_id: Set(s.user_id),
        transaction_id: Set(s.transaction_id),
        energy_limit: Set(s.energy_limit),
        start_time: Set(s.start_time),
        stop_time: Set(s.stop_time),
        energy: Set(s.energy),
        amount: Set(s.amount),
        status: Set(s.status.as_str().to_string()),
        created_at: Set(s.created_at),
    }
}

pub struct SeaOrmChargingSessionRepository {
    db: DatabaseConnection,
}

impl SeaOrmChargingSessionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChargingSessionRepository for SeaOrmChargingSessionRepository {
    async fn save(&self, session: ChargingSession) -> DomainResult<()> {
        charging_session::Entity::insert(domain_to_active(session))
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::TransactionId,
                        Column::EnergyLimit,
                        Column::StartTime,
                        Column::StopTime,
                        Column::Energy,
                        Column::Amount,
                        Column::Status,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> DomainResult<Option<ChargingSession>> {
        charging_session::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(entity_to_domain)
            .transpose()
    }

    async fn find_by_station(&self, station_id: &str) -> DomainResult<Vec<ChargingSession>> {
        charging_session::Entity::find()
            .filter(Column::StationId.eq(station_id))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(entity_to_domain)
            .collect()
    }

    async fn mark_started(
        &self,
        id: &str,
        transaction_id: i32,
        start_time: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let result = charging_session::Entity::update_many()
            .col_expr(Column::Status, Expr::value(ChargingSessionStatus::Started.as_str()))
            .col_expr(Column::TransactionId, Expr::value(transaction_id))
            .col_expr(Column::StartTime, Expr::value(start_time))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(ChargingSessionStatus::Initiated.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn mark_abandoned(
        &self,
        id: &str,
        energy_kwh: f64,
        stop_time: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let result = charging_session::Entity::update_many()
            .col_expr(Column::Status, Expr::value(ChargingSessionStatus::Error.as_str()))
            .col_expr(Column::Energy, Expr::value(energy_kwh))
            .col_expr(Column::Amount, Expr::value(0i64))
            .col_expr(Column::StopTime, Expr::value(stop_time))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(ChargingSessionStatus::Started.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::repositories::test_support::memory_db;

    #[tokio::test]
    async fn save_and_find() {
        let repo = SeaOrmChargingSessionRepository::new(memory_db().await);
        repo.save(ChargingSession::new("S-1", "CP1", 1, Some(10.0)))
            .await
            .unwrap();

        let found = repo.find_by_id("S-1").await.unwrap().unwrap();
        assert_eq!(found.status, ChargingSessionStatus::Initiated);
        assert_eq!(found.energy_limit, Some(10.0));
        assert_eq!(repo.find_by_station("CP1").await.unwrap().len(), 1);
        assert!(repo.find_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_is_conditional_on_initiated() {
        let repo = SeaOrmChargingSessionRepository::new(memory_db().await);
        repo.save(ChargingSession::new("S-1", "CP1", 1, None))
            .await
            .unwrap();

        assert!(repo.mark_started("S-1", 42, Utc::now()).await.unwrap());
        assert!(!repo.mark_started("S-1", 43, Utc::now()).await.unwrap());

        let found = repo.find_by_id("S-1").await.unwrap().unwrap();
        assert_eq!(found.status, ChargingSessionStatus::Started);
        assert_eq!(found.transaction_id, Some(42));
    }

    #[tokio::test]
    async fn abandon_only_from_started() {
        let repo = SeaOrmChargingSessionRepository::new(memory_db().await);
        repo.save(ChargingSession::new("S-1", "CP1", 1, None))
            .await
            .unwrap();
        assert!(!repo.mark_abandoned("S-1", 1.5, Utc::now()).await.unwrap());

        repo.mark_started("S-1", 1, Utc::now()).await.unwrap();
        assert!(repo.mark_abandoned("S-1", 1.5, Utc::now()).await.unwrap());

        let found = repo.find_by_id("S-1").await.unwrap().unwrap();
        assert_eq!(found.status, ChargingSessionStatus::Error);
        assert_eq!(found.energy, 1.5);
        assert_eq!(found.amount, 0);
    }
}
