//! # Charge gateway
//!
//! OCPP 1.6 charge-point session gateway: keeps one live session per
//! connected station, enforces per-session energy limits, settles finished
//! sessions against user balances and relays operator commands to whichever
//! process holds the station.
//!
//! ## Layout
//!
//! - **domain**: accounts, tariffs, charging sessions and repository traits
//! - **application**: protocol state machine, session store, settlement,
//!   orphan monitor, command relay and dispatcher
//! - **infrastructure**: SeaORM persistence, in-memory repositories, JWT
//! - **interfaces**: station WebSocket gateway and HTTP API
//! - **server**: process runtime and shutdown

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod server;
pub mod shared;

pub use config::{default_config_path, AppConfig, ConfigError};
pub use infrastructure::{init_database, DatabaseConfig, InMemoryRepositoryProvider, SeaOrmRepositoryProvider};
pub use interfaces::{create_api_router, OcppGateway};
pub use server::{init_tracing, ServerHandle};
