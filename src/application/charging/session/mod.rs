pub mod connection;
pub mod live;
pub mod registry;
pub mod store;

pub use connection::{Connection, ConnectionInfo};
pub use live::{FinalizedSession, LiveSessionState, MeterUpdate, PendingStart, TransactionIdGenerator};
pub use registry::{ConnectionRegistry, SharedConnectionRegistry};
pub use store::{SessionStore, SharedSessionStore};
