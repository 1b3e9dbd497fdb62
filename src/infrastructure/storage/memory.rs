//! In-memory repository provider for development and testing

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::{
    Account, AccountRepository, BillingRepository, ChargingSession, ChargingSessionRepository,
    ChargingSessionStatus, DomainError, DomainResult, RepositoryProvider, SettlementOutcome,
    SettlementRecord, Tariff, TariffRepository,
};

/// All repositories over process memory. Balance mutations go through a
/// single ledger lock, the in-memory counterpart of a database transaction.
pub struct InMemoryRepositoryProvider {
    sessions: DashMap<String, ChargingSession>,
    tariffs: DashMap<i32, Tariff>,
    accounts: DashMap<i32, Account>,
    ledger: Mutex<()>,
    tariff_counter: AtomicI32,
    account_counter: AtomicI32,
    injected_failures: AtomicU32,
    injected_start_failures: AtomicU32,
}

impl InMemoryRepositoryProvider {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            tariffs: DashMap::new(),
            accounts: DashMap::new(),
            ledger: Mutex::new(()),
            tariff_counter: AtomicI32::new(1),
            account_counter: AtomicI32::new(1),
            injected_failures: AtomicU32::new(0),
            injected_start_failures: AtomicU32::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make the next `n` settlements fail with a storage error.
    #[cfg(test)]
    pub fn inject_settlement_failures(&self, n: u32) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` `mark_started` calls fail with a storage error.
    #[cfg(test)]
    pub fn inject_mark_started_failures(&self, n: u32) {
        self.injected_start_failures.store(n, Ordering::SeqCst);
    }

    fn lock_ledger(&self) -> DomainResult<MutexGuard<'_, ()>> {
        self.ledger
            .lock()
            .map_err(|_| DomainError::Storage("ledger lock poisoned".to_string()))
    }

    fn take_injected_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryRepositoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryProvider for InMemoryRepositoryProvider {
    fn charging_sessions(&self) -> &dyn ChargingSessionRepository {
        self
    }

    fn tariffs(&self) -> &dyn TariffRepository {
        self
    }

    fn accounts(&self) -> &dyn AccountRepository {
        self
    }

    fn billing(&self) -> &dyn BillingRepository {
        self
    }
}

#[async_trait]
impl ChargingSessionRepository for InMemoryRepositoryProvider {
    async fn save(&self, session: ChargingSession) -> DomainResult<()> {
        if self.sessions.contains_key(&session.id) {
            return Err(DomainError::Conflict(format!("ChargingSession {}", session.id)));
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> DomainResult<Option<ChargingSession>> {
        Ok(self.sessions.get(id).map(|s| s.clone()))
    }

    async fn find_by_station(&self, station_id: &str) -> DomainResult<Vec<ChargingSession>> {
        let mut sessions: Vec<ChargingSession> = self
            .sessions
            .iter()
            .filter(|s| s.station_id == station_id)
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn mark_started(
        &self,
        id: &str,
        transaction_id: i32,
        start_time: DateTime<Utc>,
    ) -> DomainResult<bool> {
        if Self::take_injected_failure(&self.injected_start_failures) {
            return Err(DomainError::Storage("injected failure".to_string()));
        }
        let _ledger = self.lock_ledger()?;
        match self.sessions.get_mut(id) {
            Some(mut session) if session.status == ChargingSessionStatus::Initiated => {
                session.start(transaction_id, start_time)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_abandoned(
        &self,
        id: &str,
        energy_kwh: f64,
        stop_time: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let _ledger = self.lock_ledger()?;
        match self.sessions.get_mut(id) {
            Some(mut session) if session.status == ChargingSessionStatus::Started => {
                session.transition(ChargingSessionStatus::Error)?;
                session.energy = energy_kwh;
                session.amount = 0;
                session.stop_time = Some(stop_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TariffRepository for InMemoryRepositoryProvider {
    async fn find_for_station(&self, station_id: &str) -> DomainResult<Option<Tariff>> {
        Ok(self
            .tariffs
            .iter()
            .filter(|t| t.station_id == station_id)
            .min_by_key(|t| t.id)
            .map(|t| t.clone()))
    }

    async fn save(&self, mut tariff: Tariff) -> DomainResult<Tariff> {
        tariff.id = self.tariff_counter.fetch_add(1, Ordering::SeqCst);
        self.tariffs.insert(tariff.id, tariff.clone());
        Ok(tariff)
    }
}

#[async_trait]
impl AccountRepository for InMemoryRepositoryProvider {
    async fn create(&self, username: &str, balance: i64) -> DomainResult<Account> {
        let account = Account {
            id: self.account_counter.fetch_add(1, Ordering::SeqCst),
            username: username.to_string(),
            balance,
            updated_at: Utc::now(),
        };
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_by_id(&self, id: i32) -> DomainResult<Option<Account>> {
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }
}

#[async_trait]
impl BillingRepository for InMemoryRepositoryProvider {
    async fn settle(&self, record: SettlementRecord) -> DomainResult<SettlementOutcome> {
        if Self::take_injected_failure(&self.injected_failures) {
            return Err(DomainError::Storage("injected failure".to_string()));
        }

        let _ledger = self.lock_ledger()?;

        let mut session = match self.sessions.get_mut(&record.session_id) {
            Some(s) if s.status == ChargingSessionStatus::Started => s,
            Some(s) if s.status.is_terminal() => return Ok(SettlementOutcome::AlreadySettled),
            Some(s) => {
                return Err(DomainError::InvalidTransition {
                    entity: "ChargingSession",
                    id: s.id.clone(),
                    from: s.status.to_string(),
                    to: ChargingSessionStatus::Stopped.to_string(),
                })
            }
            None => {
                return Err(DomainError::NotFound {
                    entity: "ChargingSession",
                    field: "id",
                    value: record.session_id,
                })
            }
        };

        let debited = match self.accounts.get_mut(&session.user_id) {
            Some(mut account) if account.balance >= record.amount => {
                account.balance -= record.amount;
                account.updated_at = Utc::now();
                true
            }
            _ => false,
        };

        let status = if debited {
            ChargingSessionStatus::Stopped
        } else {
            ChargingSessionStatus::Error
        };
        session.transition(status)?;
        session.energy = record.energy_kwh;
        session.amount = record.amount;
        session.stop_time = Some(record.stop_time);

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

    async fn started_session(repos: &InMemoryRepositoryProvider, balance: i64) -> (String, i32) {
        let account = repos.accounts().create("alice", balance).await.unwrap();
        let session = ChargingSession::new("SESS1", "S1", account.id, None);
        repos.charging_sessions().save(session).await.unwrap();
        assert!(repos
            .charging_sessions()
            .mark_started("SESS1", 5, Utc::now())
            .await
            .unwrap());
        ("SESS1".to_string(), account.id)
    }

    fn record(amount: i64) -> SettlementRecord {
        SettlementRecord {
            session_id: "SESS1".into(),
            energy_kwh: 11.0,
            amount,
            stop_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn settle_debits_and_stops() {
        let repos = InMemoryRepositoryProvider::new();
        let (sid, uid) = started_session(&repos, 10_000).await;

        let outcome = repos.billing().settle(record(5_500)).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Settled { amount: 5_500 });

        let account = repos.accounts().find_by_id(uid).await.unwrap().unwrap();
        assert_eq!(account.balance, 4_500);
        let session = repos.charging_sessions().find_by_id(&sid).await.unwrap().unwrap();
        assert_eq!(session.status, ChargingSessionStatus::Stopped);
        assert_eq!(session.amount, 5_500);
        assert!(session.stop_time.is_some());
    }

    #[tokio::test]
    async fn insufficient_balance_marks_error_without_debit() {
        let repos = InMemoryRepositoryProvider::new();
        let (sid, uid) = started_session(&repos, 100).await;

        let outcome = repos.billing().settle(record(5_500)).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::InsufficientBalance { amount: 5_500 });
        assert_eq!(repos.accounts().find_by_id(uid).await.unwrap().unwrap().balance, 100);
        let session = repos.charging_sessions().find_by_id(&sid).await.unwrap().unwrap();
        assert_eq!(session.status, ChargingSessionStatus::Error);
    }

    #[tokio::test]
    async fn second_settlement_is_a_no_op() {
        let repos = InMemoryRepositoryProvider::new();
        let (_, uid) = started_session(&repos, 10_000).await;

        repos.billing().settle(record(1_000)).await.unwrap();
        let again = repos.billing().settle(record(1_000)).await.unwrap();
        assert_eq!(again, SettlementOutcome::AlreadySettled);
        assert_eq!(repos.accounts().find_by_id(uid).await.unwrap().unwrap().balance, 9_000);
    }

    #[tokio::test]
    async fn settling_an_unstarted_session_is_an_error() {
        let repos = InMemoryRepositoryProvider::new();
        let account = repos.accounts().create("alice", 10_000).await.unwrap();
        repos
            .charging_sessions()
            .save(ChargingSession::new("SESS1", "S1", account.id, None))
            .await
            .unwrap();

        let err = repos.billing().settle(record(1_000)).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(repos.accounts().find_by_id(account.id).await.unwrap().unwrap().balance, 10_000);
    }

    #[tokio::test]
    async fn mark_started_only_from_initiated() {
        let repos = InMemoryRepositoryProvider::new();
        started_session(&repos, 0).await;
        assert!(!repos
            .charging_sessions()
            .mark_started("SESS1", 6, Utc::now())
            .await
            .unwrap());
        assert!(!repos
            .charging_sessions()
            .mark_started("missing", 6, Utc::now())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn first_tariff_for_station_wins() {
        let repos = InMemoryRepositoryProvider::new();
        repos.tariffs().save(Tariff::new("S1", 500, "UZS")).await.unwrap();
        repos.tariffs().save(Tariff::new("S1", 900, "UZS")).await.unwrap();
        let t = repos.tariffs().find_for_station("S1").await.unwrap().unwrap();
        assert_eq!(t.price_per_kwh, 500);
        assert!(repos.tariffs().find_for_station("S2").await.unwrap().is_none());
    }
}
