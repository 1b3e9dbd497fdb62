//! OCPP 1.6 Action handlers
//!
//! Routes the action name of an inbound `OcppFrame::Call` to its handler.
//! Payloads are deserialized into `rust_ocpp::v1_6` types within each handler.
//! A transaction payload that does not parse is answered with a
//! `FormationViolation` CallError; the connection stays up either way.

use serde_json::Value;
use tracing::{error, warn};

use super::ProtocolSession;

mod handle_boot_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_stop_transaction;

pub use handle_boot_notification::handle_boot_notification;
pub use handle_heartbeat::handle_heartbeat;
pub use handle_meter_values::handle_meter_values;
pub use handle_start_transaction::handle_start_transaction;
pub use handle_stop_transaction::handle_stop_transaction;

/// A Call answered with a CallError instead of a CallResult.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFault {
    pub code: &'static str,
    pub description: String,
}

impl CallFault {
    pub fn formation_violation(action: &str, error: impl std::fmt::Display) -> Self {
        Self {
            code: "FormationViolation",
            description: format!("{} payload: {}", action, error),
        }
    }
}

/// CallResult payload, or the CallError to send instead.
pub type ActionResult = Result<Value, CallFault>;

pub async fn action_matcher(session: &mut ProtocolSession, action: &str, payload: &Value) -> ActionResult {
    match action {
        "BootNotification" => Ok(handle_boot_notification(session, payload).await),
        "Heartbeat" => Ok(handle_heartbeat(session, payload).await),
        "MeterValues" => Ok(handle_meter_values(session, payload).await),
        "StartTransaction" => handle_start_transaction(session, payload).await,
        "StopTransaction" => handle_stop_transaction(session, payload).await,

        unknown => {
            if is_cs_to_cp_action(unknown) {
                warn!(
                    station_id = session.station_id.as_str(),
                    action = unknown,
                    "Received CS→CP action from station (protocol error)"
                );
            } else {
                error!(
                    station_id = session.station_id.as_str(),
                    action = unknown,
                    "Unsupported OCPP 1.6 action"
                );
            }
            Ok(serde_json::json!({}))
        }
    }
}

/// Actions only the central system may send.
fn is_cs_to_cp_action(action: &str) -> bool {
    matches!(
        action,
        "CancelReservation"
            | "ChangeAvailability"
            | "ChangeConfiguration"
            | "ClearCache"
            | "ClearChargingProfile"
            | "GetCompositeSchedule"
            | "GetConfiguration"
            | "GetDiagnostics"
            | "GetLocalListVersion"
            | "RemoteStartTransaction"
            | "RemoteStopTransaction"
            | "ReserveNow"
            | "Reset"
            | "SendLocalList"
            | "SetChargingProfile"
            | "TriggerMessage"
            | "UnlockConnector"
            | "UpdateFirmware"
    )
}
