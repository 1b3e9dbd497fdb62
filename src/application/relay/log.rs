//! Per-station transaction log entries
//!
//! Observability only: the log is a bounded ring and nothing replays it.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionEvent {
    Connected {
        connection_id: u64,
    },
    Booted {
        vendor: String,
        model: String,
    },
    Start {
        transaction_id: i32,
        connector_id: u32,
        id_tag: String,
        meter_start: i64,
        session_id: Option<String>,
    },
    /// The linked ChargingSession could not be marked started
    StartRefused {
        transaction_id: i32,
        session_id: String,
        error: String,
    },
    MeterRegression {
        transaction_id: i32,
        meter_start: i64,
        reading: i64,
    },
    AutoStopRequested {
        transaction_id: i32,
        energy_wh: i64,
    },
    Stop {
        transaction_id: i32,
        meter_stop: i64,
        energy_wh: i64,
        reason: Option<String>,
    },
    Settled {
        session_id: String,
        outcome: String,
        amount: i64,
    },
    SettlementFailed {
        session_id: String,
        error: String,
    },
    Orphaned {
        session_id: String,
        transaction_id: i32,
    },
    OrphanExpired {
        session_id: String,
        energy_wh: i64,
    },
    Command {
        command: String,
        outcome: String,
    },
    Disconnected {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionLogEntry {
    pub station_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TransactionEvent,
}

impl TransactionLogEntry {
    pub fn new(station_id: impl Into<String>, event: TransactionEvent) -> Self {
        Self {
            station_id: station_id.into(),
            at: Utc::now(),
            event,
        }
    }
}
