//! Shared dependencies of every station actor in this process

use std::sync::Arc;
use std::time::Duration;

use super::commands::{CommandSender, SharedCommandSender};
use super::services::{OrphanMonitor, SettlementService, SharedOrphanMonitor, SharedSettlementService};
use super::session::{
    ConnectionRegistry, SessionStore, SharedConnectionRegistry, SharedSessionStore,
    TransactionIdGenerator,
};
use crate::application::relay::{CommandRelay, DuplicatePolicy};
use crate::domain::RepositoryProvider;
use crate::shared::retry::RetryConfig;

/// Tunables for the protocol layer.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Seconds, sent in BootNotification replies
    pub heartbeat_interval: u32,
    /// Bound on waiting for a device reply to an outbound call
    pub call_timeout: Duration,
    pub duplicate_policy: DuplicatePolicy,
    pub orphan_grace_period: Duration,
    /// idTag used for remote starts that do not name one
    pub remote_id_tag: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: 300,
            call_timeout: Duration::from_secs(30),
            duplicate_policy: DuplicatePolicy::Evict,
            orphan_grace_period: Duration::from_secs(600),
            remote_id_tag: "GATEWAY".to_string(),
        }
    }
}

pub struct GatewayContext {
    pub settings: GatewaySettings,
    pub relay: Arc<dyn CommandRelay>,
    pub repos: Arc<dyn RepositoryProvider>,
    pub store: SharedSessionStore,
    pub registry: SharedConnectionRegistry,
    pub command_sender: SharedCommandSender,
    pub settlement: SharedSettlementService,
    pub orphans: SharedOrphanMonitor,
    pub transaction_ids: TransactionIdGenerator,
    /// Backoff for persistence writes made on behalf of a station
    pub storage_retry: RetryConfig,
}

pub type SharedGatewayContext = Arc<GatewayContext>;

impl GatewayContext {
    pub fn new(
        settings: GatewaySettings,
        relay: Arc<dyn CommandRelay>,
        repos: Arc<dyn RepositoryProvider>,
        settlement_retry: RetryConfig,
    ) -> SharedGatewayContext {
        let registry = ConnectionRegistry::shared();
        let command_sender = CommandSender::shared(registry.clone(), settings.call_timeout);
        let settlement = Arc::new(SettlementService::new(
            repos.clone(),
            relay.clone(),
            settlement_retry.clone(),
        ));
        let orphans = Arc::new(OrphanMonitor::new(
            repos.clone(),
            relay.clone(),
            settings.orphan_grace_period,
        ));

        Arc::new(Self {
            settings,
            relay,
            repos,
            store: SessionStore::shared(),
            registry,
            command_sender,
            settlement,
            orphans,
            transaction_ids: TransactionIdGenerator::new(),
            storage_retry: settlement_retry,
        })
    }
}
