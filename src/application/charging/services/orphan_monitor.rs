//! Orphan monitor: sessions whose station dropped mid-charge
//!
//! A station that disconnects with a linked live session leaves billing
//! unresolved. The session is parked here: a StopTransaction for the same
//! transaction id arriving on a reconnected socket within the grace period
//! claims it and settles normally. After the grace period the session is
//! closed as `error` with the last known energy, amount 0 and no debit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::application::charging::session::{FinalizedSession, LiveSessionState};
use crate::application::relay::{CommandRelay, TransactionEvent};
use crate::domain::tariff::wh_to_kwh;
use crate::domain::{DomainResult, RepositoryProvider};
use crate::shared::shutdown::ShutdownSignal;

#[derive(Debug, Clone)]
pub struct OrphanedSession {
    pub session_id: String,
    pub station_id: String,
    pub transaction_id: i32,
    pub meter_start: i64,
    pub last_meter: i64,
    pub energy_wh: i64,
    pub since: DateTime<Utc>,
    deadline: Instant,
}

impl OrphanedSession {
    pub fn finalize(self, meter_stop: i64) -> FinalizedSession {
        FinalizedSession {
            station_id: self.station_id,
            session_id: Some(self.session_id),
            transaction_id: self.transaction_id,
            meter_start: self.meter_start,
            meter_stop,
            energy_wh: (meter_stop - self.meter_start).max(0),
            regressed: meter_stop < self.meter_start,
            stopped_at: Utc::now(),
        }
    }
}

pub struct OrphanMonitor {
    orphans: DashMap<i32, OrphanedSession>,
    grace_period: Duration,
    repos: Arc<dyn RepositoryProvider>,
    relay: Arc<dyn CommandRelay>,
}

pub type SharedOrphanMonitor = Arc<OrphanMonitor>;

impl OrphanMonitor {
    pub fn new(
        repos: Arc<dyn RepositoryProvider>,
        relay: Arc<dyn CommandRelay>,
        grace_period: Duration,
    ) -> Self {
        Self {
            orphans: DashMap::new(),
            grace_period,
            repos,
            relay,
        }
    }

    /// Park a live session torn down by a disconnect. Unlinked sessions
    /// have nothing to bill and are dropped.
    pub async fn adopt(&self, state: LiveSessionState) {
        let Some(session_id) = state.session_id else {
            return;
        };

        warn!(
            station_id = state.station_id.as_str(),
            transaction_id = state.transaction_id,
            session_id = session_id.as_str(),
            energy_wh = state.energy_delivered,
            grace_secs = self.grace_period.as_secs(),
            "Station dropped with an active session, holding for reconnect"
        );

        let event = TransactionEvent::Orphaned {
            session_id: session_id.clone(),
            transaction_id: state.transaction_id,
        };
        if let Err(e) = self.relay.record(&state.station_id, event).await {
            warn!(station_id = state.station_id.as_str(), error = %e, "Failed to record orphan");
        }

        self.orphans.insert(
            state.transaction_id,
            OrphanedSession {
                session_id,
                station_id: state.station_id,
                transaction_id: state.transaction_id,
                meter_start: state.meter_start,
                last_meter: state.last_meter,
                energy_wh: state.energy_delivered,
                since: Utc::now(),
                deadline: Instant::now() + self.grace_period,
            },
        );
    }

    /// Take the orphan for `transaction_id` on `station_id`, if it is still
    /// within its grace period.
    pub fn claim(&self, station_id: &str, transaction_id: i32) -> Option<OrphanedSession> {
        let (_, orphan) = self.orphans.remove_if(&transaction_id, |_, o| {
            o.station_id == station_id && Instant::now() < o.deadline
        })?;
        info!(
            station_id,
            transaction_id,
            session_id = orphan.session_id.as_str(),
            "Orphaned session claimed by reconnected station"
        );
        Some(orphan)
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    /// Close every orphan past its grace period. Returns how many sessions
    /// were marked `error`.
    pub async fn expire_overdue(&self) -> DomainResult<usize> {
        let now = Instant::now();
        let overdue: Vec<i32> = self
            .orphans
            .iter()
            .filter(|o| o.deadline <= now)
            .map(|o| *o.key())
            .collect();

        let mut closed = 0;
        for transaction_id in overdue {
            let Some((_, orphan)) = self.orphans.remove(&transaction_id) else {
                continue;
            };

            let marked = self
                .repos
                .charging_sessions()
                .mark_abandoned(&orphan.session_id, wh_to_kwh(orphan.energy_wh), Utc::now())
                .await;

            match marked {
                Ok(true) => {
                    closed += 1;
                    warn!(
                        station_id = orphan.station_id.as_str(),
                        transaction_id,
                        session_id = orphan.session_id.as_str(),
                        energy_wh = orphan.energy_wh,
                        "Orphaned session expired, marked error without debit"
                    );
                    let event = TransactionEvent::OrphanExpired {
                        session_id: orphan.session_id.clone(),
                        energy_wh: orphan.energy_wh,
                    };
                    if let Err(e) = self.relay.record(&orphan.station_id, event).await {
                        warn!(error = %e, "Failed to record orphan expiry");
                    }
                }
                Ok(false) => {
                    info!(
                        session_id = orphan.session_id.as_str(),
                        "Orphaned session already closed"
                    );
                }
                Err(e) => {
                    // Put it back so the next sweep retries.
                    self.orphans.insert(transaction_id, orphan);
                    return Err(e);
                }
            }
        }

        Ok(closed)
    }

    pub fn spawn(self: &Arc<Self>, check_interval: Duration, shutdown: ShutdownSignal) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                check_interval_secs = check_interval.as_secs(),
                "🕓 Orphan monitor started"
            );

            let mut interval = tokio::time::interval(check_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = monitor.expire_overdue().await {
                            warn!(error = %e, "Orphan sweep error");
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("🕓 Orphan monitor shutting down");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::charging::session::PendingStart;
    use crate::application::relay::InMemoryCommandRelay;
    use crate::domain::{ChargingSession, ChargingSessionStatus};
    use crate::infrastructure::storage::InMemoryRepositoryProvider;

    async fn setup(grace: Duration) -> (Arc<InMemoryRepositoryProvider>, OrphanMonitor, LiveSessionState) {
        let repos = InMemoryRepositoryProvider::shared();
        let relay = InMemoryCommandRelay::shared(20);
        let user = repos.accounts().create("bob", 1_000).await.unwrap();
        repos
            .charging_sessions()
            .save(ChargingSession::new("SESS1", "S1", user.id, None))
            .await
            .unwrap();
        repos
            .charging_sessions()
            .mark_started("SESS1", 42, Utc::now())
            .await
            .unwrap();

        let mut live = LiveSessionState::new(
            "S1",
            1,
            42,
            1,
            "TAG",
            1_000,
            Some(PendingStart {
                session_id: "SESS1".into(),
                energy_limit: None,
            }),
        );
        live.apply_reading(3_500);

        let monitor = OrphanMonitor::new(repos.clone(), relay, grace);
        (repos, monitor, live)
    }

    #[tokio::test]
    async fn claim_within_grace_period() {
        let (_, monitor, live) = setup(Duration::from_secs(60)).await;
        monitor.adopt(live).await;
        assert!(monitor.claim("S2", 42).is_none());

        let orphan = monitor.claim("S1", 42).unwrap();
        assert_eq!(orphan.energy_wh, 2_500);
        assert!(monitor.is_empty());

        let done = orphan.finalize(4_000);
        assert_eq!(done.energy_wh, 3_000);
        assert_eq!(done.session_id.as_deref(), Some("SESS1"));
    }

    #[tokio::test]
    async fn expiry_marks_error_with_last_energy() {
        let (repos, monitor, live) = setup(Duration::ZERO).await;
        monitor.adopt(live).await;
        assert!(monitor.claim("S1", 42).is_none());

        assert_eq!(monitor.expire_overdue().await.unwrap(), 1);
        let session = repos.charging_sessions().find_by_id("SESS1").await.unwrap().unwrap();
        assert_eq!(session.status, ChargingSessionStatus::Error);
        assert_eq!(session.energy, 2.5);
        assert_eq!(session.amount, 0);
        assert_eq!(repos.accounts().find_by_id(1).await.unwrap().unwrap().balance, 1_000);
    }

    #[tokio::test]
    async fn unlinked_sessions_are_not_held() {
        let (_, monitor, _) = setup(Duration::from_secs(60)).await;
        let live = LiveSessionState::new("S1", 1, 7, 1, "TAG", 0, None);
        monitor.adopt(live).await;
        assert!(monitor.is_empty());
    }
}
