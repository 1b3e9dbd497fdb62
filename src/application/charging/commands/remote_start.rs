//! Remote Start Transaction command

use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use rust_ocpp::v1_6::types::RemoteStartStopStatus;
use tracing::info;

use super::{CallTarget, CommandError, CommandSender};
use crate::application::relay::CommandOutcome;

pub async fn remote_start_transaction(
    command_sender: &CommandSender,
    target: &CallTarget,
    id_tag: &str,
    connector_id: Option<u32>,
) -> Result<CommandOutcome, CommandError> {
    info!(
        station_id = target.station_id.as_str(),
        id_tag,
        ?connector_id,
        "RemoteStartTransaction"
    );

    let request = RemoteStartTransactionRequest {
        connector_id,
        id_tag: id_tag.to_string(),
        charging_profile: None,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(target, "RemoteStartTransaction", payload)
        .await?;

    let response: RemoteStartTransactionResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    Ok(match response.status {
        RemoteStartStopStatus::Accepted => CommandOutcome::Accepted,
        other => CommandOutcome::Rejected {
            status: format!("{:?}", other),
        },
    })
}
