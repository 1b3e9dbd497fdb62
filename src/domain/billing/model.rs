//! Settlement input/outcome types

use chrono::{DateTime, Utc};

/// Everything the billing store needs to close one session.
#[derive(Debug, Clone)]
pub struct SettlementRecord {
    pub session_id: String,
    /// Delivered energy (kWh)
    pub energy_kwh: f64,
    /// Amount to debit (smallest currency unit)
    pub amount: i64,
    pub stop_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Balance debited, session `stopped`
    Settled { amount: i64 },
    /// Balance below amount, session `error`, nothing debited
    InsufficientBalance { amount: i64 },
    /// Session already left `started`; nothing changed
    AlreadySettled,
}

impl SettlementOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Settled { .. } => "settled",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::AlreadySettled => "already_settled",
        }
    }
}
