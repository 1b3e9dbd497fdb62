//! Station queries

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::application::charging::commands::StationStatus;
use crate::application::relay::TransactionLogEntry;
use crate::interfaces::http::common::ApiResult;
use crate::interfaces::http::router::ApiState;

#[derive(Debug, Serialize)]
pub struct StationList {
    pub stations: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TransactionLog {
    pub station_id: String,
    /// Oldest first
    pub entries: Vec<TransactionLogEntry>,
}

pub async fn list_stations(State(state): State<ApiState>) -> ApiResult<Json<StationList>> {
    let stations = state.dispatcher.connected_stations().await?;
    Ok(Json(StationList {
        stations: stations.into_iter().collect(),
    }))
}

pub async fn get_station(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
) -> ApiResult<Json<StationStatus>> {
    Ok(Json(state.dispatcher.station_status(&station_id).await?))
}

pub async fn station_transactions(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
) -> ApiResult<Json<TransactionLog>> {
    let entries = state.dispatcher.transaction_log(&station_id).await?;
    Ok(Json(TransactionLog {
        station_id,
        entries,
    }))
}
