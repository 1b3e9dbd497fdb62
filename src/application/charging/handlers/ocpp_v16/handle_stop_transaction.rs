//! StopTransaction handler
//!
//! Stop is idempotent: only the first StopTransaction for the live
//! transaction (or for an orphan held from a dropped connection) settles.
//! Every other one is acknowledged and ignored.

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::stop_transaction::StopTransactionResponse;
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo, Reason};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::{ActionResult, CallFault};
use crate::application::charging::handlers::{ProtocolSession, StationState};
use crate::application::relay::TransactionEvent;

/// StopTransaction.req fields the gateway acts on. `meterStop` is required
/// by OCPP but some firmware omits it or sends `null`; the last metered
/// reading stands in for it then.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopTransactionPayload {
    transaction_id: i32,
    meter_stop: Option<i32>,
    timestamp: DateTime<Utc>,
    reason: Option<Reason>,
}

fn accepted() -> Value {
    let response = StopTransactionResponse {
        id_tag_info: Some(IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        }),
    };
    serde_json::to_value(&response).unwrap_or_default()
}

pub async fn handle_stop_transaction(session: &mut ProtocolSession, payload: &Value) -> ActionResult {
    let req: StopTransactionPayload = serde_json::from_value(payload.clone()).map_err(|e| {
        error!(station_id = session.station_id.as_str(), error = %e, "Failed to parse StopTransaction");
        CallFault::formation_violation("StopTransaction", e)
    })?;

    let transaction_id = req.transaction_id;
    let reported_stop = req.meter_stop.map(i64::from);
    let reason = req.reason.as_ref().map(|r| format!("{:?}", r));

    info!(
        station_id = session.station_id.as_str(),
        transaction_id,
        meter_stop = ?reported_stop,
        stopped_at = %req.timestamp,
        reason = ?reason,
        "StopTransaction"
    );

    let matches_live = session
        .ctx
        .store
        .get(&session.station_id)
        .is_some_and(|s| s.connection_id == session.connection_id && s.transaction_id == transaction_id);

    let finalized = if matches_live {
        let Some(live) = session
            .ctx
            .store
            .remove(&session.station_id, session.connection_id)
        else {
            return Ok(accepted());
        };
        session.state = StationState::Idle;
        let meter_stop = stop_reading(session, reported_stop, live.last_meter);
        live.finalize(meter_stop)
    } else if let Some(orphan) = session
        .ctx
        .orphans
        .claim(&session.station_id, transaction_id)
    {
        let meter_stop = stop_reading(session, reported_stop, orphan.last_meter);
        orphan.finalize(meter_stop)
    } else {
        warn!(
            station_id = session.station_id.as_str(),
            transaction_id,
            "StopTransaction for unknown or already stopped transaction, ignored"
        );
        return Ok(accepted());
    };

    session
        .record(TransactionEvent::Stop {
            transaction_id,
            meter_stop: finalized.meter_stop,
            energy_wh: finalized.energy_wh,
            reason,
        })
        .await;

    session.ctx.settlement.spawn(finalized);

    Ok(accepted())
}

fn stop_reading(session: &ProtocolSession, reported: Option<i64>, last_meter: i64) -> i64 {
    reported.unwrap_or_else(|| {
        warn!(
            station_id = session.station_id.as_str(),
            last_meter,
            "StopTransaction without meterStop, using last metered reading"
        );
        last_meter
    })
}
