//! SeaORM implementation of BillingRepository
//!
//! Debit and session close share one database transaction. Both updates
//! are conditional, so concurrent settlements of the same session cannot
//! debit twice and a balance never goes below zero.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait};
use tracing::debug;

use crate::domain::{
    BillingRepository, ChargingSessionStatus, DomainError, DomainResult, SettlementOutcome,
    SettlementRecord,
};
use crate::infrastructure::database::entities::{charging_session, user};

pub struct SeaOrmBillingRepository {
    db: DatabaseConnection,
}

impl SeaOrmBillingRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BillingRepository for SeaOrmBillingRepository {
    async fn settle(&self, record: SettlementRecord) -> DomainResult<SettlementOutcome> {
        let txn = self.db.begin().await?;

        let Some(session) = charging_session::Entity::find_by_id(record.session_id.clone())
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Err(DomainError::NotFound {
                entity: "ChargingSession",
                field: "id",
                value: record.session_id,
            });
        };

        match ChargingSessionStatus::from_str(&session.status) {
            Some(ChargingSessionStatus::Started) => {}
            Some(status) if status.is_terminal() => {
                txn.rollback().await?;
                return Ok(SettlementOutcome::AlreadySettled);
            }
            _ => {
                txn.rollback().await?;
                return Err(DomainError::InvalidTransition {
                    entity: "ChargingSession",
                    id: record.session_id,
                    from: session.status,
                    to: ChargingSessionStatus::Stopped.to_string(),
                });
            }
        }

        let debit = user::Entity::update_many()
            .col_expr(
                user::Column::Balance,
                Expr::col(user::Column::Balance).sub(record.amount),
            )
            .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(user::Column::Id.eq(session.user_id))
            .filter(user::Column::Balance.gte(record.amount))
            .exec(&txn)
            .await?;
        let debited = debit.rows_affected == 1;

        let status = if debited {
            ChargingSessionStatus::Stopped
        } else {
            ChargingSessionStatus::Error
        };

        let closed = charging_session::Entity::update_many()
            .col_expr(charging_session::Column::Status, Expr::value(status.as_str()))
            .col_expr(charging_session::Column::Energy, Expr::value(record.energy_kwh))
            .col_expr(charging_session::Column::Amount, Expr::value(record.amount))
            .col_expr(charging_session::Column::StopTime, Expr::value(record.stop_time))
            .filter(charging_session::Column::Id.eq(record.session_id.as_str()))
            .filter(charging_session::Column::Status.eq(ChargingSessionStatus::Started.as_str()))
            .exec(&txn)
            .await?;

        if closed.rows_affected == 0 {
            txn.rollback().await?;
            debug!(session_id = record.session_id.as_str(), "Lost settlement race, rolled back");
            return Ok(SettlementOutcome::AlreadySettled);
        }

        txn.commit().await?;

        Ok(if debited {
            SettlementOutcome::Settled {
                amount: record.amount,
            }
        } else {
            SettlementOutcome::InsufficientBalance {
                amount: record.amount,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountRepository, ChargingSession, ChargingSessionRepository};
    use crate::infrastructure::database::repositories::test_support::memory_db;
    use crate::infrastructure::database::repositories::{
        SeaOrmAccountRepository, SeaOrmChargingSessionRepository,
    };

    struct Fixture {
        billing: SeaOrmBillingRepository,
        sessions: SeaOrmChargingSessionRepository,
        accounts: SeaOrmAccountRepository,
        user_id: i32,
    }

    async fn fixture(balance: i64) -> Fixture {
        let db = memory_db().await;
        let accounts = SeaOrmAccountRepository::new(db.clone());
        let sessions = SeaOrmChargingSessionRepository::new(db.clone());
        let user = accounts.create("alice", balance).await.unwrap();
        sessions
            .save(ChargingSession::new("S-1", "CP1", user.id, None))
            .await
            .unwrap();
        sessions.mark_started("S-1", 1, Utc::now()).await.unwrap();
        Fixture {
            billing: SeaOrmBillingRepository::new(db),
            sessions,
            accounts,
            user_id: user.id,
        }
    }

    fn record(amount: i64) -> SettlementRecord {
        SettlementRecord {
            session_id: "S-1".into(),
            energy_kwh: 11.0,
            amount,
            stop_time: Utc::now(),
        }
    }

    async fn balance(f: &Fixture) -> i64 {
        f.accounts.find_by_id(f.user_id).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn debits_and_stops() {
        let f = fixture(10_000).await;
        let outcome = f.billing.settle(record(5_500)).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Settled { amount: 5_500 });
        assert_eq!(balance(&f).await, 4_500);

        let session = f.sessions.find_by_id("S-1").await.unwrap().unwrap();
        assert_eq!(session.status, ChargingSessionStatus::Stopped);
        assert_eq!(session.energy, 11.0);
        assert_eq!(session.amount, 5_500);
        assert!(session.stop_time.is_some());
    }

    #[tokio::test]
    async fn insufficient_balance_marks_error() {
        let f = fixture(1_000).await;
        let outcome = f.billing.settle(record(5_500)).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::InsufficientBalance { amount: 5_500 });
        assert_eq!(balance(&f).await, 1_000);
        let session = f.sessions.find_by_id("S-1").await.unwrap().unwrap();
        assert_eq!(session.status, ChargingSessionStatus::Error);
    }

    #[tokio::test]
    async fn exact_balance_is_enough() {
        let f = fixture(5_500).await;
        f.billing.settle(record(5_500)).await.unwrap();
        assert_eq!(balance(&f).await, 0);
    }

    #[tokio::test]
    async fn second_settle_is_already_settled() {
        let f = fixture(10_000).await;
        f.billing.settle(record(1_000)).await.unwrap();
        let again = f.billing.settle(record(1_000)).await.unwrap();
        assert_eq!(again, SettlementOutcome::AlreadySettled);
        assert_eq!(balance(&f).await, 9_000);
    }

    #[tokio::test]
    async fn unstarted_session_is_not_settled() {
        let f = fixture(10_000).await;
        f.sessions
            .save(ChargingSession::new("S-2", "CP1", f.user_id, None))
            .await
            .unwrap();
        let mut r = record(1_000);
        r.session_id = "S-2".into();

        assert!(matches!(
            f.billing.settle(r).await.unwrap_err(),
            DomainError::InvalidTransition { .. }
        ));
        let session = f.sessions.find_by_id("S-2").await.unwrap().unwrap();
        assert_eq!(session.status, ChargingSessionStatus::Initiated);
        assert_eq!(balance(&f).await, 10_000);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let f = fixture(10_000).await;
        let mut r = record(1);
        r.session_id = "missing".into();
        assert!(matches!(
            f.billing.settle(r).await.unwrap_err(),
            DomainError::NotFound { .. }
        ));
    }
}
