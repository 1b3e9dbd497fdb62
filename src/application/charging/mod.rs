pub mod commands;
pub mod context;
pub mod handlers;
pub mod services;
pub mod session;

pub use commands::{
    CallTarget, CommandDispatcher, CommandError, CommandReceipt, CommandSender, DispatchError,
    RemoteStartParams, SharedCommandSender, StationStatus,
};
pub use context::{GatewayContext, GatewaySettings, SharedGatewayContext};
pub use handlers::{Completion, ProtocolSession, RelayDirective, StationState};
pub use services::{OrphanMonitor, SettlementService, SharedOrphanMonitor, SharedSettlementService};
pub use session::{
    ConnectionRegistry, LiveSessionState, SessionStore, SharedConnectionRegistry,
    SharedSessionStore,
};
