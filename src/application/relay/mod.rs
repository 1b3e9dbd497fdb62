//! Command relay
//!
//! ## Architecture
//!
//! ```text
//! API tier ──► CommandRelay::publish_command(S, cmd) ──► CommandTicket
//!                       │                                     │
//!               (holder of S only)                    await_outcome(ticket)
//!                       ▼                                     ▲
//!  gateway actor for S ◄── CommandSubscription         report_outcome
//!         │                                                   │
//!         └── outbound Call on the live socket ───────────────┘
//! ```
//!
//! A gateway process `register`s each station it holds and takes exactly one
//! [`CommandSubscription`] per [`Registration`]. Commands for one station are
//! delivered in publish order to that single subscriber. Publishing to a
//! station nobody holds fails with [`RelayError::NotConnected`]; the relay is
//! not a durable queue.
//!
//! [`InMemoryCommandRelay`] serves a single process. A cross-process
//! transport implements the same trait.

pub mod log;
pub mod memory;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use log::{TransactionEvent, TransactionLogEntry};
pub use memory::InMemoryCommandRelay;

/// Commands on the relay wire: `{"command": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum RelayCommand {
    RemoteStartTransaction {
        session_id: String,
        /// kWh
        #[serde(default)]
        energy_limit: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id_tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connector_id: Option<u32>,
    },
    RemoteStopTransaction {},
    Disconnect {},
}

impl RelayCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RemoteStartTransaction { .. } => "RemoteStartTransaction",
            Self::RemoteStopTransaction {} => "RemoteStopTransaction",
            Self::Disconnect {} => "Disconnect",
        }
    }
}

/// A command in flight, tagged for outcome correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub correlation_id: Uuid,
    pub command: RelayCommand,
    pub issued_at: DateTime<Utc>,
}

/// What happened to a relayed command on the station side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Accepted,
    Rejected { status: String },
    /// No reply from the device within the call timeout
    Timeout,
    NotConnected,
    CallError { code: String, description: String },
    /// The gateway could not act on the command (no active transaction, etc.)
    Failed { reason: String },
}

impl CommandOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::Timeout => "timeout",
            Self::NotConnected => "not_connected",
            Self::CallError { .. } => "call_error",
            Self::Failed { .. } => "failed",
        }
    }
}

/// What to do when a station that is already registered connects again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Newer connection wins; the older subscription ends.
    #[default]
    Evict,
    /// Refuse the newer connection while the station is registered.
    Reject,
}

/// Proof of holding a station. Generation-guarded: a stale registration can
/// neither subscribe nor unregister its successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub station_id: String,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTicket {
    pub station_id: String,
    pub correlation_id: Uuid,
}

/// Live, cancellable stream of commands for one registration. Dropping it
/// cancels the subscription; later publishes report `Undeliverable`.
#[derive(Debug)]
pub struct CommandSubscription {
    station_id: String,
    receiver: mpsc::UnboundedReceiver<RelayEnvelope>,
}

impl CommandSubscription {
    pub(crate) fn new(
        station_id: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<RelayEnvelope>,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            receiver,
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    /// Next command, or `None` once the registration is gone (unregistered
    /// or evicted by a newer connection).
    pub async fn recv(&mut self) -> Option<RelayEnvelope> {
        self.receiver.recv().await
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Station not connected: {0}")]
    NotConnected(String),
    #[error("Station {0} registered but its subscriber is gone")]
    Undeliverable(String),
    #[error("Station already registered: {0}")]
    AlreadyRegistered(String),
    #[error("Station {0} already has an active subscription")]
    AlreadySubscribed(String),
    #[error("Registration for {0} was superseded")]
    StaleRegistration(String),
    #[error("No outcome reported within the timeout")]
    Timeout,
    #[error("Relay closed")]
    Closed,
}

#[async_trait]
pub trait CommandRelay: Send + Sync {
    /// Announce that this process holds `station_id`.
    async fn register(
        &self,
        station_id: &str,
        policy: DuplicatePolicy,
    ) -> Result<Registration, RelayError>;

    /// Withdraw a registration. Returns `false` if it was already superseded.
    async fn unregister(&self, registration: &Registration) -> Result<bool, RelayError>;

    async fn list_connected_stations(&self) -> Result<BTreeSet<String>, RelayError>;

    async fn is_connected(&self, station_id: &str) -> Result<bool, RelayError>;

    async fn publish_command(
        &self,
        station_id: &str,
        command: RelayCommand,
    ) -> Result<CommandTicket, RelayError>;

    /// At most one subscription per registration. Commands published between
    /// `register` and `subscribe_commands` are buffered for it.
    async fn subscribe_commands(
        &self,
        registration: &Registration,
    ) -> Result<CommandSubscription, RelayError>;

    async fn report_outcome(
        &self,
        correlation_id: Uuid,
        outcome: CommandOutcome,
    ) -> Result<(), RelayError>;

    async fn await_outcome(
        &self,
        ticket: &CommandTicket,
        timeout: Duration,
    ) -> Result<CommandOutcome, RelayError>;

    /// Append to the station's bounded transaction log.
    async fn record(&self, station_id: &str, event: TransactionEvent) -> Result<(), RelayError>;

    /// Oldest first.
    async fn transaction_log(&self, station_id: &str) -> Result<Vec<TransactionLogEntry>, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relay_command_wire_shape() {
        let cmd = RelayCommand::RemoteStartTransaction {
            session_id: "SESS1".into(),
            energy_limit: Some(10.0),
            id_tag: None,
            connector_id: None,
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({
                "command": "RemoteStartTransaction",
                "payload": {"session_id": "SESS1", "energy_limit": 10.0}
            })
        );

        let stop: RelayCommand = serde_json::from_value(json!({
            "command": "RemoteStopTransaction",
            "payload": {}
        }))
        .unwrap();
        assert_eq!(stop, RelayCommand::RemoteStopTransaction {});
    }

    #[test]
    fn unknown_relay_command_is_rejected() {
        let parsed = serde_json::from_value::<RelayCommand>(json!({
            "command": "Reset",
            "payload": {}
        }));
        assert!(parsed.is_err());
    }
}
