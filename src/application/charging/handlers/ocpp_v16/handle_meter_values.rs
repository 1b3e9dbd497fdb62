//! MeterValues handler

use rust_ocpp::v1_6::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v1_6::types::{Measurand, UnitOfMeasure};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::application::charging::handlers::{ProtocolSession, StationState};
use crate::application::relay::{RelayCommand, TransactionEvent};

/// Last `Energy.Active.Import.Register` reading in the request, in Wh.
/// Samples without a measurand default to that register.
fn energy_register_wh(req: &MeterValuesRequest) -> Option<i64> {
    let mut reading = None;
    for meter_value in &req.meter_value {
        for sampled in &meter_value.sampled_value {
            if !matches!(
                sampled.measurand,
                None | Some(Measurand::EnergyActiveImportRegister)
            ) {
                continue;
            }
            let Ok(value) = sampled.value.trim().parse::<f64>() else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            let wh = match sampled.unit.as_ref() {
                Some(UnitOfMeasure::KWh) => value * 1000.0,
                _ => value,
            };
            reading = Some(wh.round() as i64);
        }
    }
    reading
}

pub async fn handle_meter_values(session: &mut ProtocolSession, payload: &Value) -> Value {
    let empty = || serde_json::json!({});

    let req: MeterValuesRequest = match serde_json::from_value(payload.clone()) {
        Ok(r) => r,
        Err(e) => {
            error!(station_id = session.station_id.as_str(), error = %e, "Failed to parse MeterValues");
            return empty();
        }
    };

    if session.state != StationState::Charging {
        debug!(
            station_id = session.station_id.as_str(),
            "MeterValues outside a transaction ignored"
        );
        return empty();
    }

    let Some(reading) = energy_register_wh(&req) else {
        debug!(
            station_id = session.station_id.as_str(),
            samples = req.meter_value.len(),
            "MeterValues without a usable energy register sample"
        );
        return empty();
    };

    let Some((update, live)) = session
        .ctx
        .store
        .update(&session.station_id, session.connection_id, |s| {
            (s.apply_reading(reading), s.clone())
        })
    else {
        return empty();
    };

    if let Some(tx) = req.transaction_id {
        if tx != live.transaction_id {
            warn!(
                station_id = session.station_id.as_str(),
                reported = tx,
                transaction_id = live.transaction_id,
                "MeterValues transaction id differs from the live transaction"
            );
        }
    }

    info!(
        station_id = session.station_id.as_str(),
        transaction_id = live.transaction_id,
        reading,
        energy_wh = update.energy_wh,
        "MeterValues"
    );

    if update.regressed {
        metrics::counter!("gateway_meter_regressions_total").increment(1);
        warn!(
            station_id = session.station_id.as_str(),
            transaction_id = live.transaction_id,
            meter_start = live.meter_start,
            reading,
            "Meter reading went backwards"
        );
        session
            .record(TransactionEvent::MeterRegression {
                transaction_id: live.transaction_id,
                meter_start: live.meter_start,
                reading,
            })
            .await;
    }

    if update.stop_due {
        warn!(
            station_id = session.station_id.as_str(),
            transaction_id = live.transaction_id,
            energy_wh = update.energy_wh,
            energy_limit_kwh = ?live.energy_limit,
            "Energy limit reached, requesting RemoteStop"
        );
        session
            .record(TransactionEvent::AutoStopRequested {
                transaction_id: live.transaction_id,
                energy_wh: update.energy_wh,
            })
            .await;

        if let Err(e) = session
            .ctx
            .relay
            .publish_command(&session.station_id, RelayCommand::RemoteStopTransaction {})
            .await
        {
            error!(
                station_id = session.station_id.as_str(),
                transaction_id = live.transaction_id,
                error = %e,
                "Failed to publish auto-stop"
            );
        }
    }

    empty()
}
