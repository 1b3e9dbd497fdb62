//! ChargingSession domain entity

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::shared::errors::DomainError;

/// Billing lifecycle of a charging session. Only moves forward:
/// `Initiated → Started → {Stopped | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargingSessionStatus {
    /// Created by the API tier, remote start not yet confirmed by a StartTransaction
    Initiated,
    /// Device reported StartTransaction for this session
    Started,
    /// Settled and debited
    Stopped,
    /// Settlement refused (insufficient balance) or the session was abandoned
    Error,
}

impl ChargingSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(Self::Initiated),
            "started" => Some(Self::Started),
            "stopped" => Some(Self::Stopped),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether `next` is the immediate forward step from `self`.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initiated, Self::Started)
                | (Self::Started, Self::Stopped)
                | (Self::Started, Self::Error)
        )
    }
}

impl std::fmt::Display for ChargingSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted billing record for one charging transaction
#[derive(Debug, Clone, Serialize)]
pub struct ChargingSession {
    pub id: String,
    pub station_id: String,
    pub user_id: i32,
    /// Transaction id minted by the gateway on StartTransaction
    pub transaction_id: Option<i32>,
    /// Requested energy cap (kWh)
    pub energy_limit: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    /// Delivered energy (kWh), written at settlement
    pub energy: f64,
    /// Charged amount (smallest currency unit), written at settlement
    pub amount: i64,
    pub status: ChargingSessionStatus,
    pub created_at: DateTime<Utc>,
}

impl ChargingSession {
    pub fn new(
        id: impl Into<String>,
        station_id: impl Into<String>,
        user_id: i32,
        energy_limit: Option<f64>,
    ) -> Self {
        Self {
            id: id.into(),
            station_id: station_id.into(),
            user_id,
            transaction_id: None,
            energy_limit,
            start_time: None,
            stop_time: None,
            energy: 0.0,
            amount: 0,
            status: ChargingSessionStatus::Initiated,
            created_at: Utc::now(),
        }
    }

    /// Apply a status change, refusing anything but a forward step.
    pub fn transition(&mut self, next: ChargingSessionStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                entity: "ChargingSession",
                id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self, transaction_id: i32, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(ChargingSessionStatus::Started)?;
        self.transaction_id = Some(transaction_id);
        self.start_time = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_initiated() {
        let s = ChargingSession::new("SESS1", "S1", 7, Some(10.0));
        assert_eq!(s.status, ChargingSessionStatus::Initiated);
        assert_eq!(s.amount, 0);
        assert!(s.transaction_id.is_none());
    }

    #[test]
    fn start_moves_forward_once() {
        let mut s = ChargingSession::new("SESS1", "S1", 7, None);
        s.start(42, Utc::now()).unwrap();
        assert_eq!(s.status, ChargingSessionStatus::Started);
        assert_eq!(s.transaction_id, Some(42));

        let err = s.start(43, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(s.transaction_id, Some(42));
    }

    #[test]
    fn status_never_skips_or_goes_back() {
        use ChargingSessionStatus::*;
        assert!(!Initiated.can_transition_to(Stopped));
        assert!(!Initiated.can_transition_to(Error));
        assert!(!Stopped.can_transition_to(Started));
        assert!(!Error.can_transition_to(Stopped));
        assert!(Started.can_transition_to(Error));
        assert!(Stopped.is_terminal() && Error.is_terminal());
    }

    #[test]
    fn status_string_roundtrip() {
        for s in ["initiated", "started", "stopped", "error"] {
            assert_eq!(ChargingSessionStatus::from_str(s).unwrap().as_str(), s);
        }
        assert!(ChargingSessionStatus::from_str("active").is_none());
    }
}
