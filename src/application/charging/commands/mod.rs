//! Outbound calls from the gateway to a station
//!
//! ## Architecture
//!
//! ```text
//! relay command ──► station actor ──► remote_start / remote_stop
//!                                              │
//!                                     build typed rust_ocpp request
//!                                              │
//!                                     CommandSender (raw `[2, id, action, payload]`)
//!                                              │
//!                     ConnectionRegistry::send_to(station, connection)
//! ```
//!
//! [`CommandSender`] correlates CallResult/CallError frames back to the
//! awaiting caller by `(connection_id, message_id)`, so a reconnect under
//! the same station id never receives its predecessor's replies.

pub mod dispatcher;
pub mod remote_start;
pub mod remote_stop;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{info, warn};

use super::session::SharedConnectionRegistry;
use crate::application::relay::CommandOutcome;
use crate::shared::ocpp_frame::OcppFrame;

pub use dispatcher::{
    CommandDispatcher, CommandReceipt, DispatchError, RemoteStartParams, StationStatus,
};
pub use remote_start::remote_start_transaction;
pub use remote_stop::remote_stop_transaction;

/// Addresses one specific connection of a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub station_id: String,
    pub connection_id: u64,
}

struct PendingRequest {
    action_name: String,
    response_sender: oneshot::Sender<Result<Value, CommandError>>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Station not connected: {0}")]
    NotConnected(String),
    #[error("Failed to send: {0}")]
    SendFailed(String),
    #[error("Response timeout")]
    Timeout,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("CallError {code}: {description}")]
    CallError { code: String, description: String },
    #[error("Connection closed before the station replied")]
    ConnectionClosed,
}

impl From<CommandError> for CommandOutcome {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotConnected(_) | CommandError::ConnectionClosed => {
                CommandOutcome::NotConnected
            }
            CommandError::Timeout => CommandOutcome::Timeout,
            CommandError::CallError { code, description } => {
                CommandOutcome::CallError { code, description }
            }
            CommandError::SendFailed(reason) | CommandError::InvalidResponse(reason) => {
                CommandOutcome::Failed { reason }
            }
        }
    }
}

/// Command sender for gateway → station calls
pub struct CommandSender {
    registry: SharedConnectionRegistry,
    pending_requests: DashMap<(u64, String), PendingRequest>,
    message_counter: AtomicU64,
    call_timeout: Duration,
}

pub type SharedCommandSender = Arc<CommandSender>;

impl CommandSender {
    pub fn new(registry: SharedConnectionRegistry, call_timeout: Duration) -> Self {
        Self {
            registry,
            pending_requests: DashMap::new(),
            message_counter: AtomicU64::new(1),
            call_timeout,
        }
    }

    pub fn shared(registry: SharedConnectionRegistry, call_timeout: Duration) -> SharedCommandSender {
        Arc::new(Self::new(registry, call_timeout))
    }

    fn generate_message_id(&self) -> String {
        let id = self.message_counter.fetch_add(1, Ordering::SeqCst);
        format!("GW-{}", id)
    }

    /// Send a Call and wait (bounded by the call timeout) for its reply.
    pub async fn send_command(
        &self,
        target: &CallTarget,
        action: &str,
        payload: Value,
    ) -> Result<Value, CommandError> {
        let station_id = target.station_id.as_str();
        let message_id = self.generate_message_id();
        let frame = OcppFrame::Call {
            unique_id: message_id.clone(),
            action: action.to_string(),
            payload,
        };

        let (tx, rx) = oneshot::channel();
        let key = (target.connection_id, message_id.clone());
        self.pending_requests.insert(
            key.clone(),
            PendingRequest {
                action_name: action.to_string(),
                response_sender: tx,
            },
        );

        info!(station_id, action, message_id = message_id.as_str(), "Sending command");
        metrics::counter!("gateway_commands_total", "command" => action.to_string()).increment(1);
        let started = Instant::now();

        if !self
            .registry
            .send_to(station_id, target.connection_id, frame.serialize())
        {
            self.pending_requests.remove(&key);
            return Err(CommandError::NotConnected(station_id.to_string()));
        }

        let result = match timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CommandError::ConnectionClosed),
            Err(_) => {
                self.pending_requests.remove(&key);
                warn!(station_id, action, message_id = message_id.as_str(), "Command timed out");
                Err(CommandError::Timeout)
            }
        };

        metrics::histogram!("gateway_command_latency_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    pub fn handle_response(&self, connection_id: u64, message_id: &str, payload: Value) {
        let key = (connection_id, message_id.to_string());
        if let Some((_, pending)) = self.pending_requests.remove(&key) {
            info!(
                connection_id,
                action = pending.action_name.as_str(),
                message_id,
                "Received response"
            );
            let _ = pending.response_sender.send(Ok(payload));
        } else {
            warn!(connection_id, message_id, "Response for unknown request");
        }
    }

    pub fn handle_error(
        &self,
        connection_id: u64,
        message_id: &str,
        error_code: &str,
        error_description: &str,
    ) {
        let key = (connection_id, message_id.to_string());
        if let Some((_, pending)) = self.pending_requests.remove(&key) {
            warn!(
                connection_id,
                action = pending.action_name.as_str(),
                message_id,
                error_code,
                error_description,
                "Received error"
            );
            let _ = pending.response_sender.send(Err(CommandError::CallError {
                code: error_code.to_string(),
                description: error_description.to_string(),
            }));
        }
    }

    /// Fail every call still waiting on `connection_id`.
    pub fn fail_pending(&self, connection_id: u64) -> usize {
        let keys: Vec<(u64, String)> = self
            .pending_requests
            .iter()
            .filter(|e| e.key().0 == connection_id)
            .map(|e| e.key().clone())
            .collect();

        let mut failed = 0;
        for key in keys {
            if let Some((_, pending)) = self.pending_requests.remove(&key) {
                let _ = pending
                    .response_sender
                    .send(Err(CommandError::ConnectionClosed));
                failed += 1;
            }
        }
        failed
    }

    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }
}
