//! Command dispatcher: the API tier's entry point for station commands.
//!
//! Holds no sockets: every command goes through the [`CommandRelay`] to
//! whichever process holds the station, and the dispatcher waits for the
//! outcome that process reports back. Status queries read the relay and
//! the session repository only.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::relay::{
    CommandOutcome, CommandRelay, RelayCommand, RelayError, TransactionLogEntry,
};
use crate::domain::{ChargingSession, DomainError, RepositoryProvider};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Station not connected: {0}")]
    NotConnected(String),
    #[error("Command could not be delivered to station {0}")]
    Undeliverable(String),
    #[error("No outcome reported within {0:?}")]
    Timeout(Duration),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Relay error: {0}")]
    Relay(String),
}

impl DispatchError {
    fn from_relay(e: RelayError, timeout: Duration) -> Self {
        match e {
            RelayError::NotConnected(station) => Self::NotConnected(station),
            RelayError::Undeliverable(station) => Self::Undeliverable(station),
            RelayError::Timeout => Self::Timeout(timeout),
            other => Self::Relay(other.to_string()),
        }
    }
}

/// Parameters of a remote start issued on behalf of a user.
#[derive(Debug, Clone, Default)]
pub struct RemoteStartParams {
    pub user_id: i32,
    /// kWh
    pub energy_limit: Option<f64>,
    pub id_tag: Option<String>,
    pub connector_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReceipt {
    pub correlation_id: Uuid,
    #[serde(flatten)]
    pub outcome: CommandOutcome,
    /// ChargingSession created for a remote start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub station_id: String,
    pub connected: bool,
    pub last_event: Option<TransactionLogEntry>,
}

pub struct CommandDispatcher {
    relay: Arc<dyn CommandRelay>,
    repos: Arc<dyn RepositoryProvider>,
    outcome_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        relay: Arc<dyn CommandRelay>,
        repos: Arc<dyn RepositoryProvider>,
        outcome_timeout: Duration,
    ) -> Self {
        Self {
            relay,
            repos,
            outcome_timeout,
        }
    }

    async fn dispatch(
        &self,
        station_id: &str,
        command: RelayCommand,
    ) -> Result<(Uuid, CommandOutcome), DispatchError> {
        let name = command.name();
        let ticket = self
            .relay
            .publish_command(station_id, command)
            .await
            .map_err(|e| DispatchError::from_relay(e, self.outcome_timeout))?;

        let outcome = self
            .relay
            .await_outcome(&ticket, self.outcome_timeout)
            .await
            .map_err(|e| DispatchError::from_relay(e, self.outcome_timeout))?;

        info!(
            station_id,
            command = name,
            correlation_id = %ticket.correlation_id,
            outcome = outcome.label(),
            "Command dispatched"
        );
        Ok((ticket.correlation_id, outcome))
    }

    // ─── Commands ──────────────────────────────────────────────────────

    /// Create an `initiated` ChargingSession, then ask the station to start.
    pub async fn remote_start(
        &self,
        station_id: &str,
        params: RemoteStartParams,
    ) -> Result<CommandReceipt, DispatchError> {
        if let Some(limit) = params.energy_limit {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(DispatchError::Validation(format!(
                    "energy_limit must be a positive number of kWh, got {}",
                    limit
                )));
            }
        }

        let connected = self
            .relay
            .is_connected(station_id)
            .await
            .map_err(|e| DispatchError::from_relay(e, self.outcome_timeout))?;
        if !connected {
            return Err(DispatchError::NotConnected(station_id.to_string()));
        }

        let session = ChargingSession::new(
            Uuid::new_v4().to_string(),
            station_id,
            params.user_id,
            params.energy_limit,
        );
        let session_id = session.id.clone();
        self.repos.charging_sessions().save(session).await?;

        info!(
            station_id,
            session_id = session_id.as_str(),
            user_id = params.user_id,
            energy_limit_kwh = ?params.energy_limit,
            "Charging session created"
        );

        let command = RelayCommand::RemoteStartTransaction {
            session_id: session_id.clone(),
            energy_limit: params.energy_limit,
            id_tag: params.id_tag,
            connector_id: params.connector_id,
        };

        let (correlation_id, outcome) = match self.dispatch(station_id, command).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    station_id,
                    session_id = session_id.as_str(),
                    error = %e,
                    "Remote start not delivered, session stays initiated"
                );
                return Err(e);
            }
        };

        Ok(CommandReceipt {
            correlation_id,
            outcome,
            session_id: Some(session_id),
        })
    }

    pub async fn remote_stop(&self, station_id: &str) -> Result<CommandReceipt, DispatchError> {
        let (correlation_id, outcome) = self
            .dispatch(station_id, RelayCommand::RemoteStopTransaction {})
            .await?;
        Ok(CommandReceipt {
            correlation_id,
            outcome,
            session_id: None,
        })
    }

    pub async fn disconnect(&self, station_id: &str) -> Result<CommandReceipt, DispatchError> {
        let (correlation_id, outcome) = self
            .dispatch(station_id, RelayCommand::Disconnect {})
            .await?;
        Ok(CommandReceipt {
            correlation_id,
            outcome,
            session_id: None,
        })
    }

    // ─── Queries ───────────────────────────────────────────────────────

    pub async fn connected_stations(&self) -> Result<BTreeSet<String>, DispatchError> {
        self.relay
            .list_connected_stations()
            .await
            .map_err(|e| DispatchError::from_relay(e, self.outcome_timeout))
    }

    pub async fn station_status(&self, station_id: &str) -> Result<StationStatus, DispatchError> {
        let relay_err = |e| DispatchError::from_relay(e, self.outcome_timeout);
        let connected = self.relay.is_connected(station_id).await.map_err(relay_err)?;
        let last_event = self
            .relay
            .transaction_log(station_id)
            .await
            .map_err(relay_err)?
            .pop();

        if !connected && last_event.is_none() {
            return Err(DomainError::NotFound {
                entity: "Station",
                field: "id",
                value: station_id.to_string(),
            }
            .into());
        }

        Ok(StationStatus {
            station_id: station_id.to_string(),
            connected,
            last_event,
        })
    }

    pub async fn transaction_log(
        &self,
        station_id: &str,
    ) -> Result<Vec<TransactionLogEntry>, DispatchError> {
        self.relay
            .transaction_log(station_id)
            .await
            .map_err(|e| DispatchError::from_relay(e, self.outcome_timeout))
    }

    pub async fn session(&self, session_id: &str) -> Result<ChargingSession, DispatchError> {
        self.repos
            .charging_sessions()
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound {
                    entity: "ChargingSession",
                    field: "id",
                    value: session_id.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::relay::{DuplicatePolicy, InMemoryCommandRelay};
    use crate::domain::ChargingSessionStatus;
    use crate::infrastructure::storage::InMemoryRepositoryProvider;

    fn dispatcher(
        timeout: Duration,
    ) -> (
        CommandDispatcher,
        Arc<InMemoryCommandRelay>,
        Arc<InMemoryRepositoryProvider>,
    ) {
        let relay = InMemoryCommandRelay::shared(20);
        let repos = InMemoryRepositoryProvider::shared();
        (
            CommandDispatcher::new(relay.clone(), repos.clone(), timeout),
            relay,
            repos,
        )
    }

    /// Plays the gateway side: answers every command with `outcome`.
    async fn station(relay: &Arc<InMemoryCommandRelay>, station_id: &str, outcome: CommandOutcome) {
        let registration = relay.register(station_id, DuplicatePolicy::Evict).await.unwrap();
        let mut commands = relay.subscribe_commands(&registration).await.unwrap();
        let relay = relay.clone();
        tokio::spawn(async move {
            while let Some(envelope) = commands.recv().await {
                relay
                    .report_outcome(envelope.correlation_id, outcome.clone())
                    .await
                    .unwrap();
            }
        });
    }

    #[tokio::test]
    async fn remote_start_creates_initiated_session() {
        let (dispatcher, relay, repos) = dispatcher(Duration::from_secs(1));
        station(&relay, "S1", CommandOutcome::Accepted).await;

        let receipt = dispatcher
            .remote_start(
                "S1",
                RemoteStartParams {
                    user_id: 7,
                    energy_limit: Some(10.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.outcome, CommandOutcome::Accepted);

        let session_id = receipt.session_id.unwrap();
        let session = repos.charging_sessions().find_by_id(&session_id).await.unwrap().unwrap();
        assert_eq!(session.status, ChargingSessionStatus::Initiated);
        assert_eq!(session.user_id, 7);
        assert_eq!(session.energy_limit, Some(10.0));
        assert_eq!(dispatcher.session(&session_id).await.unwrap().id, session_id);
    }

    #[tokio::test]
    async fn remote_start_to_unknown_station_creates_nothing() {
        let (dispatcher, _, repos) = dispatcher(Duration::from_secs(1));
        let err = dispatcher
            .remote_start("ghost", RemoteStartParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotConnected(_)));
        assert!(repos.charging_sessions().find_by_station("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_limit_is_rejected() {
        let (dispatcher, relay, _) = dispatcher(Duration::from_secs(1));
        station(&relay, "S1", CommandOutcome::Accepted).await;
        let err = dispatcher
            .remote_start(
                "S1",
                RemoteStartParams {
                    energy_limit: Some(-1.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn device_rejection_is_an_outcome() {
        let (dispatcher, relay, _) = dispatcher(Duration::from_secs(1));
        let rejected = CommandOutcome::Rejected {
            status: "Rejected".into(),
        };
        station(&relay, "S1", rejected.clone()).await;
        assert_eq!(dispatcher.remote_stop("S1").await.unwrap().outcome, rejected);
    }

    #[tokio::test]
    async fn silent_station_times_out() {
        let (dispatcher, relay, _) = dispatcher(Duration::from_millis(30));
        let registration = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();
        let _commands = relay.subscribe_commands(&registration).await.unwrap();

        let err = dispatcher.disconnect("S1").await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_undeliverable() {
        let (dispatcher, relay, _) = dispatcher(Duration::from_secs(1));
        let registration = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();
        drop(relay.subscribe_commands(&registration).await.unwrap());

        let err = dispatcher.remote_stop("S1").await.unwrap_err();
        assert!(matches!(err, DispatchError::Undeliverable(_)));
    }

    #[tokio::test]
    async fn status_queries() {
        let (dispatcher, relay, _) = dispatcher(Duration::from_secs(1));
        station(&relay, "S1", CommandOutcome::Accepted).await;

        assert!(dispatcher.connected_stations().await.unwrap().contains("S1"));
        let status = dispatcher.station_status("S1").await.unwrap();
        assert!(status.connected);

        assert!(matches!(
            dispatcher.station_status("S2").await.unwrap_err(),
            DispatchError::Domain(DomainError::NotFound { .. })
        ));
        assert!(matches!(
            dispatcher.session("nope").await.unwrap_err(),
            DispatchError::Domain(DomainError::NotFound { .. })
        ));
    }
}
