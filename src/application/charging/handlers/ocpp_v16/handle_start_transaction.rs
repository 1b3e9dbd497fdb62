//! StartTransaction handler

use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::{error, info, warn};

use super::{ActionResult, CallFault};
use crate::application::charging::handlers::{ProtocolSession, StationState};
use crate::application::charging::session::LiveSessionState;
use crate::application::relay::TransactionEvent;
use crate::domain::DomainError;
use crate::shared::retry::retry_with_backoff;

fn reply(transaction_id: i32, status: AuthorizationStatus) -> Value {
    let response = StartTransactionResponse {
        transaction_id,
        id_tag_info: IdTagInfo {
            status,
            expiry_date: None,
            parent_id_tag: None,
        },
    };
    serde_json::to_value(&response).unwrap_or_default()
}

pub async fn handle_start_transaction(session: &mut ProtocolSession, payload: &Value) -> ActionResult {
    let req: StartTransactionRequest = serde_json::from_value(payload.clone()).map_err(|e| {
        error!(station_id = session.station_id.as_str(), error = %e, "Failed to parse StartTransaction");
        CallFault::formation_violation("StartTransaction", e)
    })?;

    info!(
        station_id = session.station_id.as_str(),
        connector_id = req.connector_id,
        id_tag = req.id_tag.as_str(),
        meter_start = req.meter_start,
        "StartTransaction"
    );

    if let Some(active) = session.ctx.store.get(&session.station_id) {
        warn!(
            station_id = session.station_id.as_str(),
            transaction_id = active.transaction_id,
            "StartTransaction while a transaction is active"
        );
        return Ok(reply(active.transaction_id, AuthorizationStatus::ConcurrentTx));
    }

    let transaction_id = session.ctx.transaction_ids.next_id();
    let pending = session.pending_start.take();
    let live = LiveSessionState::new(
        session.station_id.clone(),
        session.connection_id,
        transaction_id,
        req.connector_id,
        req.id_tag.clone(),
        i64::from(req.meter_start),
        pending.clone(),
    );

    if let Err(active) = session.ctx.store.create_if_absent(live) {
        session.pending_start = pending;
        return Ok(reply(active.transaction_id, AuthorizationStatus::ConcurrentTx));
    }
    let previous_state = std::mem::replace(&mut session.state, StationState::Charging);

    if let Some(id) = pending.as_ref().map(|p| p.session_id.as_str()) {
        let repos = session.ctx.repos.clone();
        let marked = retry_with_backoff(
            &session.ctx.storage_retry,
            || repos.charging_sessions().mark_started(id, transaction_id, req.timestamp),
            DomainError::is_transient,
            "mark_started",
        )
        .await;

        match marked {
            Ok(true) => {}
            Ok(false) => {
                // Not in `initiated` any more: do not bill against it.
                warn!(
                    station_id = session.station_id.as_str(),
                    transaction_id,
                    session_id = id,
                    "Charging session not startable, transaction left unlinked"
                );
                session
                    .ctx
                    .store
                    .update(&session.station_id, session.connection_id, |s| s.session_id = None);
            }
            Err(e) => {
                // Charging on a session that cannot be recorded would go unbilled.
                error!(
                    station_id = session.station_id.as_str(),
                    transaction_id,
                    session_id = id,
                    error = %e,
                    "Failed to mark charging session started, start refused"
                );
                session
                    .ctx
                    .store
                    .remove(&session.station_id, session.connection_id);
                session.state = previous_state;
                session
                    .record(TransactionEvent::StartRefused {
                        transaction_id,
                        session_id: id.to_string(),
                        error: e.to_string(),
                    })
                    .await;
                return Ok(reply(transaction_id, AuthorizationStatus::Invalid));
            }
        }
    }

    let linked = session
        .ctx
        .store
        .get(&session.station_id)
        .and_then(|s| s.session_id);

    info!(
        station_id = session.station_id.as_str(),
        transaction_id,
        session_id = ?linked,
        "Transaction started"
    );

    session
        .record(TransactionEvent::Start {
            transaction_id,
            connector_id: req.connector_id,
            id_tag: req.id_tag.clone(),
            meter_start: i64::from(req.meter_start),
            session_id: linked,
        })
        .await;

    Ok(reply(transaction_id, AuthorizationStatus::Accepted))
}
