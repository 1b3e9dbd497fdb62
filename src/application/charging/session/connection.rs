//! WebSocket connection abstraction

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// An accepted station socket, as seen from outside its actor
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection instance
    pub connection_id: u64,
    pub station_id: String,
    /// Outbound text frames, drained by the actor's writer
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Snapshot for status queries
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: u64,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        connection_id: u64,
        station_id: impl Into<String>,
        sender: mpsc::UnboundedSender<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            station_id: station_id.into(),
            sender,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn send(&self, message: String) -> Result<(), mpsc::error::SendError<String>> {
        self.sender.send(message)
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: self.connection_id,
            connected_at: self.connected_at,
            last_activity: self.last_activity,
        }
    }
}
