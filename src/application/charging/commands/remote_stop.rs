//! Remote Stop Transaction command

use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use rust_ocpp::v1_6::types::RemoteStartStopStatus;
use tracing::info;

use super::{CallTarget, CommandError, CommandSender};
use crate::application::relay::CommandOutcome;

pub async fn remote_stop_transaction(
    command_sender: &CommandSender,
    target: &CallTarget,
    transaction_id: i32,
) -> Result<CommandOutcome, CommandError> {
    info!(
        station_id = target.station_id.as_str(),
        transaction_id,
        "RemoteStopTransaction"
    );

    let request = RemoteStopTransactionRequest { transaction_id };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(target, "RemoteStopTransaction", payload)
        .await?;

    let response: RemoteStopTransactionResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    Ok(match response.status {
        RemoteStartStopStatus::Accepted => CommandOutcome::Accepted,
        other => CommandOutcome::Rejected {
            status: format!("{:?}", other),
        },
    })
}
