//! HTTP interfaces
//!
//! - `middleware`: bearer token authentication
//! - `handlers`: station queries, commands, sessions, health and metrics
//! - `router`: route table and shared state

pub mod common;
pub mod handlers;
pub mod middleware;
pub mod router;

pub use router::{create_api_router, ApiState};
