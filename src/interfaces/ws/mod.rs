//! WebSocket interfaces
//!
//! - `gateway`: station-facing OCPP 1.6 WebSocket endpoint

pub mod gateway;

pub use gateway::{GatewayError, OcppGateway};
