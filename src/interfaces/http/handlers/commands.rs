//! Remote command handlers
//!
//! Each call blocks until the station's gateway reports an outcome or the
//! relay outcome timeout elapses. A device that answers `Rejected` is a
//! successful call with `"outcome": "rejected"`; delivery failures map to
//! 404/502/504. Remote starts bill the caller's own account unless the token
//! carries the admin role.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::application::charging::commands::{CommandReceipt, RemoteStartParams};
use crate::interfaces::http::common::{ApiResult, ValidatedJson};
use crate::interfaces::http::middleware::AuthenticatedUser;
use crate::interfaces::http::router::ApiState;

#[derive(Debug, Deserialize, Validate)]
pub struct RemoteStartRequest {
    /// kWh; the station is stopped once this much has been delivered
    #[validate(range(exclusive_min = 0.0, message = "must be a positive number of kWh"))]
    pub energy_limit: Option<f64>,
    #[validate(length(min = 1, max = 20))]
    pub id_tag: Option<String>,
    #[validate(range(min = 1))]
    pub connector_id: Option<u32>,
    /// Defaults to the token subject; only admins may name another account
    #[validate(range(min = 1))]
    pub user_id: Option<i32>,
}

pub async fn remote_start(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
    Extension(caller): Extension<AuthenticatedUser>,
    ValidatedJson(request): ValidatedJson<RemoteStartRequest>,
) -> ApiResult<Json<CommandReceipt>> {
    let user_id = caller.billable_account(request.user_id)?;

    info!(
        station_id = station_id.as_str(),
        user_id,
        caller = caller.subject.as_str(),
        energy_limit = ?request.energy_limit,
        "Remote start requested"
    );

    let receipt = state
        .dispatcher
        .remote_start(
            &station_id,
            RemoteStartParams {
                user_id,
                energy_limit: request.energy_limit,
                id_tag: request.id_tag,
                connector_id: request.connector_id,
            },
        )
        .await?;
    Ok(Json(receipt))
}

pub async fn remote_stop(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
    Extension(caller): Extension<AuthenticatedUser>,
) -> ApiResult<Json<CommandReceipt>> {
    info!(
        station_id = station_id.as_str(),
        caller = caller.subject.as_str(),
        "Remote stop requested"
    );
    Ok(Json(state.dispatcher.remote_stop(&station_id).await?))
}

pub async fn disconnect(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
    Extension(caller): Extension<AuthenticatedUser>,
) -> ApiResult<Json<CommandReceipt>> {
    info!(
        station_id = station_id.as_str(),
        caller = caller.subject.as_str(),
        "Disconnect requested"
    );
    Ok(Json(state.dispatcher.disconnect(&station_id).await?))
}
