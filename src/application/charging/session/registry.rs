//! Connection registry: station sockets held by this process

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::connection::{Connection, ConnectionInfo};

/// Thread-safe registry of live station connections
pub struct ConnectionRegistry {
    connections: DashMap<String, Connection>,
    next_connection_id: AtomicU64,
}

pub type SharedConnectionRegistry = Arc<ConnectionRegistry>;

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn shared() -> SharedConnectionRegistry {
        Arc::new(Self::new())
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a connection, replacing any previous one for the station.
    /// Returns the replaced connection's id.
    pub fn register(
        &self,
        connection_id: u64,
        station_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> Option<u64> {
        info!(station_id, connection_id, "Registering station connection");
        self.connections
            .insert(
                station_id.to_string(),
                Connection::new(connection_id, station_id, sender),
            )
            .map(|old| old.connection_id)
    }

    /// Remove the station's entry if `connection_id` still owns it.
    pub fn unregister(&self, station_id: &str, connection_id: u64) -> bool {
        let removed = self
            .connections
            .remove_if(station_id, |_, c| c.connection_id == connection_id)
            .is_some();
        if !removed {
            debug!(station_id, connection_id, "Connection already replaced");
        }
        removed
    }

    /// Queue a text frame on a specific connection. Fails if the station
    /// is gone or now held by a different connection.
    pub fn send_to(&self, station_id: &str, connection_id: u64, message: String) -> bool {
        match self.connections.get(station_id) {
            Some(conn) if conn.connection_id == connection_id => conn.send(message).is_ok(),
            _ => false,
        }
    }

    pub fn touch(&self, station_id: &str, connection_id: u64) {
        if let Some(mut conn) = self.connections.get_mut(station_id) {
            if conn.connection_id == connection_id {
                conn.touch();
            }
        }
    }

    pub fn is_connected(&self, station_id: &str) -> bool {
        self.connections.contains_key(station_id)
    }

    pub fn info(&self, station_id: &str) -> Option<ConnectionInfo> {
        self.connections.get(station_id).map(|c| c.info())
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaced_connection_cannot_send_or_unregister() {
        let registry = ConnectionRegistry::new();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        assert_eq!(registry.register(1, "S1", old_tx), None);
        assert_eq!(registry.register(2, "S1", new_tx), Some(1));

        assert!(!registry.send_to("S1", 1, "stale".into()));
        assert!(registry.send_to("S1", 2, "fresh".into()));
        assert_eq!(new_rx.try_recv().unwrap(), "fresh");

        assert!(!registry.unregister("S1", 1));
        assert!(registry.is_connected("S1"));
        assert!(registry.unregister("S1", 2));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn connection_ids_are_unique() {
        let registry = ConnectionRegistry::new();
        let a = registry.next_connection_id();
        let b = registry.next_connection_id();
        assert_ne!(a, b);
    }
}
