pub mod orphan_monitor;
pub mod settlement;

pub use orphan_monitor::{OrphanMonitor, OrphanedSession, SharedOrphanMonitor};
pub use settlement::{SettlementService, SharedSettlementService};
