use axum::{
    extract::{Path, State},
    Json,
};

use crate::domain::ChargingSession;
use crate::interfaces::http::common::ApiResult;
use crate::interfaces::http::router::ApiState;

pub async fn get_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ChargingSession>> {
    Ok(Json(state.dispatcher.session(&session_id).await?))
}
