//! BootNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use serde_json::Value;
use tracing::{error, info};

use crate::application::charging::handlers::{ProtocolSession, StationState};
use crate::application::relay::TransactionEvent;

pub async fn handle_boot_notification(session: &mut ProtocolSession, payload: &Value) -> Value {
    let req: BootNotificationRequest = match serde_json::from_value(payload.clone()) {
        Ok(r) => r,
        Err(e) => {
            error!(
                station_id = session.station_id.as_str(),
                error = %e,
                "Failed to deserialize BootNotificationRequest"
            );
            return serde_json::json!({});
        }
    };

    info!(
        station_id = session.station_id.as_str(),
        vendor = req.charge_point_vendor.as_str(),
        model = req.charge_point_model.as_str(),
        firmware = ?req.firmware_version,
        "BootNotification"
    );

    // A reboot mid-charge keeps the live transaction; only Idle moves.
    if session.state == StationState::Idle {
        session.state = StationState::Booted;
    }

    session
        .record(TransactionEvent::Booted {
            vendor: req.charge_point_vendor.clone(),
            model: req.charge_point_model.clone(),
        })
        .await;

    let response = BootNotificationResponse {
        current_time: Utc::now(),
        interval: session
            .ctx
            .settings
            .heartbeat_interval
            .try_into()
            .unwrap_or(300),
        status: RegistrationStatus::Accepted,
    };

    serde_json::to_value(&response).unwrap_or_default()
}
