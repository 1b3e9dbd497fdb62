pub mod charging;
pub mod relay;

// Re-export key types for convenience
pub use charging::{
    CommandDispatcher, CommandSender, DispatchError, GatewayContext, GatewaySettings,
    ProtocolSession, RemoteStartParams, SharedGatewayContext,
};
pub use relay::{
    CommandOutcome, CommandRelay, DuplicatePolicy, InMemoryCommandRelay, RelayCommand, RelayError,
};
