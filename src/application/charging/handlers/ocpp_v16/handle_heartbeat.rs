//! Heartbeat handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::heart_beat::HeartbeatResponse;
use serde_json::Value;
use tracing::debug;

use crate::application::charging::handlers::ProtocolSession;

pub async fn handle_heartbeat(session: &mut ProtocolSession, _payload: &Value) -> Value {
    debug!(station_id = session.station_id.as_str(), "Heartbeat");

    let response = HeartbeatResponse {
        current_time: Utc::now(),
    };

    serde_json::to_value(&response).unwrap_or_default()
}
