//! Outer surfaces: the station-facing WebSocket gateway and the HTTP API

pub mod http;
pub mod ws;

pub use http::{create_api_router, ApiState};
pub use ws::{GatewayError, OcppGateway};
