//! Settlement service: turns a stopped session into a debit
//!
//! Runs detached from the station socket: a disconnect after StopTransaction
//! does not cancel an in-flight settlement.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::charging::session::FinalizedSession;
use crate::application::relay::{CommandRelay, TransactionEvent};
use crate::domain::tariff::{cost_for, wh_to_kwh};
use crate::domain::{DomainError, DomainResult, RepositoryProvider, SettlementOutcome, SettlementRecord};
use crate::shared::retry::{retry_with_backoff, RetryConfig};

pub struct SettlementService {
    repos: Arc<dyn RepositoryProvider>,
    relay: Arc<dyn CommandRelay>,
    retry: RetryConfig,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

pub type SharedSettlementService = Arc<SettlementService>;

impl SettlementService {
    pub fn new(
        repos: Arc<dyn RepositoryProvider>,
        relay: Arc<dyn CommandRelay>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            repos,
            relay,
            retry,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Settle `session` against its linked ChargingSession, retrying
    /// transient storage failures. Returns `None` when the session was
    /// never linked to a ChargingSession (device-initiated start).
    pub async fn settle(&self, session: &FinalizedSession) -> DomainResult<Option<SettlementOutcome>> {
        let Some(session_id) = session.session_id.as_deref() else {
            info!(
                station_id = session.station_id.as_str(),
                transaction_id = session.transaction_id,
                energy_wh = session.energy_wh,
                "No linked charging session, nothing to settle"
            );
            return Ok(None);
        };

        if session.regressed {
            warn!(
                station_id = session.station_id.as_str(),
                transaction_id = session.transaction_id,
                session_id,
                meter_start = session.meter_start,
                meter_stop = session.meter_stop,
                "Meter regression at stop, energy floored at zero"
            );
        }

        let result = retry_with_backoff(
            &self.retry,
            || self.settle_once(session_id, session),
            DomainError::is_transient,
            "settlement",
        )
        .await;

        let event = match &result {
            Ok(outcome) => {
                metrics::counter!("gateway_settlements_total", "outcome" => outcome.label())
                    .increment(1);
                let amount = match outcome {
                    SettlementOutcome::Settled { amount }
                    | SettlementOutcome::InsufficientBalance { amount } => *amount,
                    SettlementOutcome::AlreadySettled => 0,
                };
                info!(
                    station_id = session.station_id.as_str(),
                    transaction_id = session.transaction_id,
                    session_id,
                    energy_wh = session.energy_wh,
                    outcome = outcome.label(),
                    amount,
                    "Session settled"
                );
                TransactionEvent::Settled {
                    session_id: session_id.to_string(),
                    outcome: outcome.label().to_string(),
                    amount,
                }
            }
            Err(e) => {
                metrics::counter!("gateway_settlements_total", "outcome" => "failed").increment(1);
                error!(
                    station_id = session.station_id.as_str(),
                    transaction_id = session.transaction_id,
                    session_id,
                    error = %e,
                    "Settlement failed"
                );
                TransactionEvent::SettlementFailed {
                    session_id: session_id.to_string(),
                    error: e.to_string(),
                }
            }
        };

        if let Err(e) = self.relay.record(&session.station_id, event).await {
            warn!(station_id = session.station_id.as_str(), error = %e, "Failed to record settlement");
        }

        result.map(Some)
    }

    async fn settle_once(
        &self,
        session_id: &str,
        session: &FinalizedSession,
    ) -> DomainResult<SettlementOutcome> {
        let price_per_kwh = match self.repos.tariffs().find_for_station(&session.station_id).await? {
            Some(tariff) => tariff.price_per_kwh,
            None => {
                warn!(
                    station_id = session.station_id.as_str(),
                    "No tariff for station, settling at zero rate"
                );
                0
            }
        };

        let record = SettlementRecord {
            session_id: session_id.to_string(),
            energy_kwh: wh_to_kwh(session.energy_wh),
            amount: cost_for(session.energy_wh, price_per_kwh),
            stop_time: session.stopped_at,
        };

        self.repos.billing().settle(record).await
    }

    /// Settle in the background. The handle is kept so shutdown and tests
    /// can wait for completion.
    pub fn spawn(self: &Arc<Self>, session: FinalizedSession) {
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // Failures are already logged and recorded.
            let _ = service.settle(&session).await;
        });

        match self.in_flight.lock() {
            Ok(mut in_flight) => {
                in_flight.retain(|h| !h.is_finished());
                in_flight.push(handle);
            }
            Err(_) => error!("Settlement tracker lock poisoned"),
        }
    }

    /// Wait for every settlement spawned so far.
    pub async fn wait_for_settlements(&self) {
        let handles: Vec<JoinHandle<()>> = match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}
