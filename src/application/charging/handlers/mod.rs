//! Per-connection protocol session
//!
//! One [`ProtocolSession`] per station socket, driven by that socket's actor
//! task. It is the only writer of the station's live session state:
//!
//! ```text
//!            BootNotification          StartTransaction
//!   Idle ───────────────────► Booted ───────────────────► Charging
//!    │  ▲                                                  │
//!    │  └──────────────────── StopTransaction ─────────────┘
//!    │          StartTransaction (boot skipped)            ▲
//!    └─────────────────────────────────────────────────────┘
//!   any ── socket closed / evicted / Disconnect ──► Disconnected
//! ```

pub mod ocpp_v16;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::commands::{remote_start_transaction, remote_stop_transaction, CallTarget};
use super::context::SharedGatewayContext;
use super::session::PendingStart;
use crate::application::relay::{CommandOutcome, RelayCommand, RelayEnvelope, TransactionEvent};
use crate::shared::ocpp_frame::{normalize_call_payload, OcppFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    Idle,
    Booted,
    Charging,
    Disconnected,
}

/// Results of work the session spawned off its actor, fed back through the
/// actor's inbox so state changes stay single-writer.
#[derive(Debug)]
pub enum Completion {
    RemoteStart {
        session_id: String,
        outcome: CommandOutcome,
    },
}

/// What the actor does after a relay command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirective {
    Continue,
    Close,
}

pub struct ProtocolSession {
    station_id: String,
    connection_id: u64,
    state: StationState,
    pending_start: Option<PendingStart>,
    ctx: SharedGatewayContext,
    completions: mpsc::UnboundedSender<Completion>,
}

impl ProtocolSession {
    pub fn new(
        station_id: impl Into<String>,
        connection_id: u64,
        ctx: SharedGatewayContext,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            connection_id,
            state: StationState::Idle,
            pending_start: None,
            ctx,
            completions,
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn state(&self) -> StationState {
        self.state
    }

    fn target(&self) -> CallTarget {
        CallTarget {
            station_id: self.station_id.clone(),
            connection_id: self.connection_id,
        }
    }

    async fn record(&self, event: TransactionEvent) {
        if let Err(e) = self.ctx.relay.record(&self.station_id, event).await {
            warn!(station_id = self.station_id.as_str(), error = %e, "Failed to record transaction log entry");
        }
    }

    /// Handle one inbound text frame. Returns the reply frame for Calls.
    pub async fn handle_text(&mut self, text: &str) -> Option<String> {
        if self.state == StationState::Disconnected {
            return None;
        }

        debug!(station_id = self.station_id.as_str(), raw = text, "Inbound frame");

        let frame = match OcppFrame::parse_lenient(text) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    station_id = self.station_id.as_str(),
                    error = %e,
                    "Unparseable OCPP frame ignored"
                );
                return None;
            }
        };

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                mut payload,
            } => {
                normalize_call_payload(&action, &mut payload);
                let frame = match ocpp_v16::action_matcher(self, &action, &payload).await {
                    Ok(response) => OcppFrame::CallResult {
                        unique_id,
                        payload: response,
                    },
                    Err(fault) => {
                        warn!(
                            station_id = self.station_id.as_str(),
                            action = action.as_str(),
                            code = fault.code,
                            "Call refused: {}",
                            fault.description
                        );
                        OcppFrame::CallError {
                            unique_id,
                            error_code: fault.code.to_string(),
                            error_description: fault.description,
                            error_details: serde_json::json!({}),
                        }
                    }
                };
                Some(frame.serialize())
            }
            OcppFrame::CallResult { unique_id, payload } => {
                self.ctx
                    .command_sender
                    .handle_response(self.connection_id, &unique_id, payload);
                None
            }
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                self.ctx.command_sender.handle_error(
                    self.connection_id,
                    &unique_id,
                    &error_code,
                    &error_description,
                );
                None
            }
        }
    }

    /// Turn a relay-delivered command into an outbound call. The call is
    /// awaited off the actor; its outcome goes back through the relay.
    pub async fn handle_relay_command(&mut self, envelope: RelayEnvelope) -> RelayDirective {
        let RelayEnvelope {
            correlation_id,
            command,
            ..
        } = envelope;

        info!(
            station_id = self.station_id.as_str(),
            command = command.name(),
            %correlation_id,
            "Relay command"
        );

        match command {
            RelayCommand::RemoteStartTransaction {
                session_id,
                energy_limit,
                id_tag,
                connector_id,
            } => {
                if let Some(active) = self.ctx.store.get(&self.station_id) {
                    let outcome = CommandOutcome::Failed {
                        reason: format!("transaction {} already active", active.transaction_id),
                    };
                    report_outcome(&self.ctx, &self.station_id, correlation_id, "RemoteStartTransaction", outcome).await;
                    return RelayDirective::Continue;
                }

                let pending = PendingStart {
                    session_id: session_id.clone(),
                    energy_limit,
                };
                if let Some(previous) = self.pending_start.replace(pending) {
                    warn!(
                        station_id = self.station_id.as_str(),
                        superseded = previous.session_id.as_str(),
                        session_id = session_id.as_str(),
                        "Pending remote start superseded"
                    );
                }

                let id_tag = id_tag.unwrap_or_else(|| self.ctx.settings.remote_id_tag.clone());
                let ctx = self.ctx.clone();
                let target = self.target();
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let outcome =
                        remote_start_transaction(&ctx.command_sender, &target, &id_tag, connector_id)
                            .await
                            .unwrap_or_else(CommandOutcome::from);
                    report_outcome(&ctx, &target.station_id, correlation_id, "RemoteStartTransaction", outcome.clone()).await;
                    let _ = completions.send(Completion::RemoteStart { session_id, outcome });
                });
                RelayDirective::Continue
            }

            RelayCommand::RemoteStopTransaction {} => {
                let active = self
                    .ctx
                    .store
                    .get(&self.station_id)
                    .filter(|s| s.connection_id == self.connection_id);

                match active {
                    Some(live) => {
                        let ctx = self.ctx.clone();
                        let target = self.target();
                        tokio::spawn(async move {
                            let outcome =
                                remote_stop_transaction(&ctx.command_sender, &target, live.transaction_id)
                                    .await
                                    .unwrap_or_else(CommandOutcome::from);
                            report_outcome(&ctx, &target.station_id, correlation_id, "RemoteStopTransaction", outcome).await;
                        });
                    }
                    None => {
                        let outcome = CommandOutcome::Failed {
                            reason: "no active transaction".to_string(),
                        };
                        report_outcome(&self.ctx, &self.station_id, correlation_id, "RemoteStopTransaction", outcome).await;
                    }
                }
                RelayDirective::Continue
            }

            RelayCommand::Disconnect {} => {
                report_outcome(&self.ctx, &self.station_id, correlation_id, "Disconnect", CommandOutcome::Accepted).await;
                RelayDirective::Close
            }
        }
    }

    pub fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::RemoteStart {
                session_id,
                outcome,
            } => {
                if outcome == CommandOutcome::Accepted {
                    return;
                }
                let matches = self
                    .pending_start
                    .as_ref()
                    .is_some_and(|p| p.session_id == session_id);
                if matches {
                    self.pending_start = None;
                    warn!(
                        station_id = self.station_id.as_str(),
                        session_id = session_id.as_str(),
                        outcome = outcome.label(),
                        "Remote start not accepted, pending start dropped"
                    );
                }
            }
        }
    }

    /// Mandatory teardown: discards live state (handing a linked session to
    /// the orphan monitor) and fails pending outbound calls.
    pub async fn close(&mut self, reason: &str) {
        if self.state == StationState::Disconnected {
            return;
        }
        self.state = StationState::Disconnected;
        self.pending_start = None;

        if let Some(live) = self.ctx.store.remove(&self.station_id, self.connection_id) {
            self.ctx.orphans.adopt(live).await;
        }

        let failed = self.ctx.command_sender.fail_pending(self.connection_id);
        info!(
            station_id = self.station_id.as_str(),
            connection_id = self.connection_id,
            reason,
            failed_calls = failed,
            "Protocol session closed"
        );

        self.record(TransactionEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await;
    }
}

async fn report_outcome(
    ctx: &SharedGatewayContext,
    station_id: &str,
    correlation_id: Uuid,
    command: &str,
    outcome: CommandOutcome,
) {
    info!(station_id, command, outcome = outcome.label(), %correlation_id, "Command outcome");
    let event = TransactionEvent::Command {
        command: command.to_string(),
        outcome: outcome.label().to_string(),
    };
    if let Err(e) = ctx.relay.report_outcome(correlation_id, outcome).await {
        warn!(station_id, error = %e, "Failed to report command outcome");
    }
    if let Err(e) = ctx.relay.record(station_id, event).await {
        warn!(station_id, error = %e, "Failed to record command outcome");
    }
}
