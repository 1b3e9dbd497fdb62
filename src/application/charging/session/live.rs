//! In-memory state of the transaction currently running on a connection

use std::sync::atomic::{AtomicI32, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Parameters of a relayed RemoteStartTransaction waiting for the device's
/// StartTransaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStart {
    pub session_id: String,
    /// kWh
    pub energy_limit: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveSessionState {
    pub station_id: String,
    /// Connection that owns this entry
    pub connection_id: u64,
    pub transaction_id: i32,
    pub connector_id: u32,
    pub id_tag: String,
    /// Linked ChargingSession, when the start came through the relay
    pub session_id: Option<String>,
    /// Wh
    pub meter_start: i64,
    /// Wh
    pub last_meter: i64,
    /// Wh, never negative
    pub energy_delivered: i64,
    /// kWh
    pub energy_limit: Option<f64>,
    pub stop_requested: bool,
    pub started_at: DateTime<Utc>,
}

/// Result of feeding one meter reading into a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterUpdate {
    pub energy_wh: i64,
    /// Reading went backwards
    pub regressed: bool,
    /// Limit reached and no stop requested before; the caller must request it
    pub stop_due: bool,
}

/// A stopped session handed to settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedSession {
    pub station_id: String,
    pub session_id: Option<String>,
    pub transaction_id: i32,
    pub meter_start: i64,
    pub meter_stop: i64,
    /// Wh, floored at zero
    pub energy_wh: i64,
    pub regressed: bool,
    pub stopped_at: DateTime<Utc>,
}

impl LiveSessionState {
    pub fn new(
        station_id: impl Into<String>,
        connection_id: u64,
        transaction_id: i32,
        connector_id: u32,
        id_tag: impl Into<String>,
        meter_start: i64,
        pending: Option<PendingStart>,
    ) -> Self {
        let (session_id, energy_limit) = match pending {
            Some(p) => (Some(p.session_id), p.energy_limit),
            None => (None, None),
        };
        Self {
            station_id: station_id.into(),
            connection_id,
            transaction_id,
            connector_id,
            id_tag: id_tag.into(),
            session_id,
            meter_start,
            last_meter: meter_start,
            energy_delivered: 0,
            energy_limit,
            stop_requested: false,
            started_at: Utc::now(),
        }
    }

    /// Record a reading (Wh). Energy is `reading - meter_start`, floored at 0.
    pub fn apply_reading(&mut self, reading: i64) -> MeterUpdate {
        let regressed = reading < self.last_meter;
        self.last_meter = reading;
        self.energy_delivered = (reading - self.meter_start).max(0);

        let stop_due = self.limit_reached() && !self.stop_requested;
        if stop_due {
            self.stop_requested = true;
        }

        MeterUpdate {
            energy_wh: self.energy_delivered,
            regressed,
            stop_due,
        }
    }

    pub fn limit_reached(&self) -> bool {
        self.energy_limit
            .is_some_and(|limit_kwh| self.energy_delivered as f64 >= limit_kwh * 1000.0)
    }

    pub fn finalize(mut self, meter_stop: i64) -> FinalizedSession {
        let update = self.apply_reading(meter_stop);
        FinalizedSession {
            station_id: self.station_id,
            session_id: self.session_id,
            transaction_id: self.transaction_id,
            meter_start: self.meter_start,
            meter_stop,
            energy_wh: update.energy_wh,
            regressed: meter_stop < self.meter_start,
            stopped_at: Utc::now(),
        }
    }
}

/// Process-wide transaction id source: monotonic, seeded from wall-clock
/// seconds so ids do not repeat across restarts.
#[derive(Debug)]
pub struct TransactionIdGenerator {
    next: AtomicI32,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(seed_from_unix(Utc::now().timestamp()))
    }

    pub fn starting_at(seed: i32) -> Self {
        Self {
            next: AtomicI32::new(seed.max(1)),
        }
    }

    pub fn next_id(&self) -> i32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Wall-clock seconds folded into the positive `i32` range OCPP ids use.
fn seed_from_unix(secs: i64) -> i32 {
    i32::try_from(secs.rem_euclid(i64::from(i32::MAX))).unwrap_or(1)
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(limit: Option<f64>) -> LiveSessionState {
        LiveSessionState::new(
            "S1",
            1,
            77,
            1,
            "TAG",
            100_000,
            Some(PendingStart {
                session_id: "SESS1".into(),
                energy_limit: limit,
            }),
        )
    }

    #[test]
    fn energy_follows_reading() {
        let mut s = session(None);
        let u = s.apply_reading(104_000);
        assert_eq!(u.energy_wh, 4_000);
        assert!(!u.regressed);
        assert!(!u.stop_due);
    }

    #[test]
    fn regression_floors_energy_at_zero() {
        let mut s = session(None);
        let u = s.apply_reading(99_000);
        assert_eq!(u.energy_wh, 0);
        assert!(u.regressed);
        assert_eq!(s.energy_delivered, 0);
    }

    #[test]
    fn stop_is_due_exactly_once() {
        let mut s = session(Some(10.0));
        for _ in 0..3 {
            assert!(!s.apply_reading(104_000).stop_due);
        }
        assert!(s.apply_reading(111_000).stop_due);
        assert!(!s.apply_reading(112_000).stop_due);
        assert!(s.stop_requested);
    }

    #[test]
    fn limit_is_inclusive() {
        let mut s = session(Some(10.0));
        assert!(s.apply_reading(110_000).stop_due);
    }

    #[test]
    fn finalize_uses_meter_stop() {
        let s = session(Some(10.0));
        let done = s.finalize(111_000);
        assert_eq!(done.energy_wh, 11_000);
        assert_eq!(done.session_id.as_deref(), Some("SESS1"));
        assert!(!done.regressed);

        let done = session(None).finalize(50);
        assert_eq!(done.energy_wh, 0);
        assert!(done.regressed);
    }

    #[test]
    fn transaction_ids_are_monotonic() {
        let ids = TransactionIdGenerator::starting_at(1_000);
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!((a, b), (1_000, 1_001));
        assert!(TransactionIdGenerator::new().next_id() > 1_600_000_000);
    }

    #[test]
    fn seed_stays_positive_past_2038() {
        let jan_2040 = 2_208_988_800;
        let seed = seed_from_unix(jan_2040);
        assert!(seed > 1);
        assert_eq!(i64::from(seed), jan_2040 - i64::from(i32::MAX));
        assert!(seed_from_unix(jan_2040 + 60) > seed);
    }
}
