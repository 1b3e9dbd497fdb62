//! Session store: live charging sessions held by this process

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::live::LiveSessionState;

/// At most one [`LiveSessionState`] per station. Mutations are guarded by
/// the owning connection id so a superseded connection cannot touch its
/// successor's session.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, LiveSessionState>,
}

pub type SharedSessionStore = Arc<SessionStore>;

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSessionStore {
        Arc::new(Self::new())
    }

    /// Insert `state` unless the station already has a live session, in
    /// which case the existing one is returned untouched.
    pub fn create_if_absent(&self, state: LiveSessionState) -> Result<(), LiveSessionState> {
        match self.sessions.entry(state.station_id.clone()) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(state);
                Ok(())
            }
        }
    }

    pub fn get(&self, station_id: &str) -> Option<LiveSessionState> {
        self.sessions.get(station_id).map(|s| s.clone())
    }

    /// Apply `f` to the station's session if `connection_id` owns it.
    pub fn update<R>(
        &self,
        station_id: &str,
        connection_id: u64,
        f: impl FnOnce(&mut LiveSessionState) -> R,
    ) -> Option<R> {
        let mut entry = self.sessions.get_mut(station_id)?;
        if entry.connection_id != connection_id {
            return None;
        }
        Some(f(&mut entry))
    }

    pub fn remove(&self, station_id: &str, connection_id: u64) -> Option<LiveSessionState> {
        self.sessions
            .remove_if(station_id, |_, s| s.connection_id == connection_id)
            .map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(station: &str, connection_id: u64, tx: i32) -> LiveSessionState {
        LiveSessionState::new(station, connection_id, tx, 1, "TAG", 0, None)
    }

    #[test]
    fn second_create_returns_existing() {
        let store = SessionStore::new();
        store.create_if_absent(live("S1", 1, 10)).unwrap();
        let existing = store.create_if_absent(live("S1", 1, 11)).unwrap_err();
        assert_eq!(existing.transaction_id, 10);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_and_remove_are_owner_guarded() {
        let store = SessionStore::new();
        store.create_if_absent(live("S1", 2, 10)).unwrap();

        assert!(store.update("S1", 1, |s| s.apply_reading(500)).is_none());
        assert!(store.remove("S1", 1).is_none());

        let update = store.update("S1", 2, |s| s.apply_reading(500)).unwrap();
        assert_eq!(update.energy_wh, 500);
        assert_eq!(store.get("S1").unwrap().last_meter, 500);

        assert!(store.remove("S1", 2).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn stations_are_independent() {
        let store = SessionStore::new();
        store.create_if_absent(live("S1", 1, 10)).unwrap();
        store.create_if_absent(live("S2", 2, 11)).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get("S3").is_none());
    }
}
