//! In-process command relay

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CommandOutcome, CommandRelay, CommandSubscription, CommandTicket, DuplicatePolicy,
    Registration, RelayCommand, RelayEnvelope, RelayError, TransactionEvent,
    TransactionLogEntry,
};

/// Outcome slots nobody awaited (self-addressed commands) are dropped after this.
const OUTCOME_RETENTION: Duration = Duration::from_secs(300);

pub const DEFAULT_LOG_CAPACITY: usize = 200;

struct StationSlot {
    generation: u64,
    sender: mpsc::UnboundedSender<RelayEnvelope>,
    /// Held until the registration subscribes.
    pending_receiver: Option<mpsc::UnboundedReceiver<RelayEnvelope>>,
}

struct OutcomeSlot {
    sender: Option<oneshot::Sender<CommandOutcome>>,
    receiver: Option<oneshot::Receiver<CommandOutcome>>,
    created: Instant,
}

pub struct InMemoryCommandRelay {
    stations: DashMap<String, StationSlot>,
    next_generation: AtomicU64,
    outcomes: DashMap<Uuid, OutcomeSlot>,
    logs: DashMap<String, VecDeque<TransactionLogEntry>>,
    log_capacity: usize,
}

impl InMemoryCommandRelay {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            stations: DashMap::new(),
            next_generation: AtomicU64::new(1),
            outcomes: DashMap::new(),
            logs: DashMap::new(),
            log_capacity: log_capacity.max(1),
        }
    }

    pub fn shared(log_capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(log_capacity))
    }

    fn prune_outcomes(&self) {
        self.outcomes
            .retain(|_, slot| slot.created.elapsed() < OUTCOME_RETENTION);
    }
}

impl Default for InMemoryCommandRelay {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[async_trait]
impl CommandRelay for InMemoryCommandRelay {
    async fn register(
        &self,
        station_id: &str,
        policy: DuplicatePolicy,
    ) -> Result<Registration, RelayError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        let slot = StationSlot {
            generation,
            sender,
            pending_receiver: Some(receiver),
        };

        match self.stations.entry(station_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if policy == DuplicatePolicy::Reject {
                    return Err(RelayError::AlreadyRegistered(station_id.to_string()));
                }
                let evicted = occupied.get().generation;
                // Dropping the old sender ends the old subscription.
                occupied.insert(slot);
                info!(
                    station_id,
                    evicted_generation = evicted,
                    generation,
                    "Station re-registered, previous holder evicted"
                );
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                info!(station_id, generation, "Station registered");
            }
        }

        Ok(Registration {
            station_id: station_id.to_string(),
            generation,
        })
    }

    async fn unregister(&self, registration: &Registration) -> Result<bool, RelayError> {
        let removed = self
            .stations
            .remove_if(&registration.station_id, |_, slot| {
                slot.generation == registration.generation
            })
            .is_some();

        if removed {
            info!(
                station_id = registration.station_id.as_str(),
                generation = registration.generation,
                "Station unregistered"
            );
        } else {
            debug!(
                station_id = registration.station_id.as_str(),
                generation = registration.generation,
                "Unregister skipped, registration superseded"
            );
        }
        Ok(removed)
    }

    async fn list_connected_stations(&self) -> Result<BTreeSet<String>, RelayError> {
        Ok(self.stations.iter().map(|e| e.key().clone()).collect())
    }

    async fn is_connected(&self, station_id: &str) -> Result<bool, RelayError> {
        Ok(self.stations.contains_key(station_id))
    }

    async fn publish_command(
        &self,
        station_id: &str,
        command: RelayCommand,
    ) -> Result<CommandTicket, RelayError> {
        self.prune_outcomes();

        let slot = self
            .stations
            .get(station_id)
            .ok_or_else(|| RelayError::NotConnected(station_id.to_string()))?;

        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.outcomes.insert(
            correlation_id,
            OutcomeSlot {
                sender: Some(tx),
                receiver: Some(rx),
                created: Instant::now(),
            },
        );

        let name = command.name();
        let envelope = RelayEnvelope {
            correlation_id,
            command,
            issued_at: Utc::now(),
        };

        if slot.sender.send(envelope).is_err() {
            drop(slot);
            self.outcomes.remove(&correlation_id);
            warn!(station_id, command = name, "Relay subscriber gone, command undeliverable");
            return Err(RelayError::Undeliverable(station_id.to_string()));
        }

        debug!(station_id, command = name, %correlation_id, "Command published");
        Ok(CommandTicket {
            station_id: station_id.to_string(),
            correlation_id,
        })
    }

    async fn subscribe_commands(
        &self,
        registration: &Registration,
    ) -> Result<CommandSubscription, RelayError> {
        let station_id = registration.station_id.as_str();
        let mut slot = self
            .stations
            .get_mut(station_id)
            .ok_or_else(|| RelayError::NotConnected(station_id.to_string()))?;

        if slot.generation != registration.generation {
            return Err(RelayError::StaleRegistration(station_id.to_string()));
        }

        let receiver = slot
            .pending_receiver
            .take()
            .ok_or_else(|| RelayError::AlreadySubscribed(station_id.to_string()))?;

        Ok(CommandSubscription::new(station_id, receiver))
    }

    async fn report_outcome(
        &self,
        correlation_id: Uuid,
        outcome: CommandOutcome,
    ) -> Result<(), RelayError> {
        let sender = self
            .outcomes
            .get_mut(&correlation_id)
            .and_then(|mut slot| slot.sender.take());

        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => debug!(%correlation_id, "Outcome for unknown or expired command"),
        }
        Ok(())
    }

    async fn await_outcome(
        &self,
        ticket: &CommandTicket,
        timeout: Duration,
    ) -> Result<CommandOutcome, RelayError> {
        let receiver = self
            .outcomes
            .get_mut(&ticket.correlation_id)
            .and_then(|mut slot| slot.receiver.take())
            .ok_or(RelayError::Closed)?;

        let result = tokio::time::timeout(timeout, receiver).await;
        self.outcomes.remove(&ticket.correlation_id);

        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(RelayError::Closed),
            Err(_) => Err(RelayError::Timeout),
        }
    }

    async fn record(&self, station_id: &str, event: TransactionEvent) -> Result<(), RelayError> {
        let mut log = self.logs.entry(station_id.to_string()).or_default();
        if log.len() >= self.log_capacity {
            log.pop_front();
        }
        log.push_back(TransactionLogEntry::new(station_id, event));
        Ok(())
    }

    async fn transaction_log(
        &self,
        station_id: &str,
    ) -> Result<Vec<TransactionLogEntry>, RelayError> {
        Ok(self
            .logs
            .get(station_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop() -> RelayCommand {
        RelayCommand::RemoteStopTransaction {}
    }

    fn start(session: &str) -> RelayCommand {
        RelayCommand::RemoteStartTransaction {
            session_id: session.into(),
            energy_limit: None,
            id_tag: None,
            connector_id: None,
        }
    }

    #[tokio::test]
    async fn publish_to_unregistered_station_is_not_connected() {
        let relay = InMemoryCommandRelay::default();
        let err = relay.publish_command("S1", stop()).await.unwrap_err();
        assert_eq!(err, RelayError::NotConnected("S1".into()));
    }

    #[tokio::test]
    async fn commands_arrive_in_publish_order() {
        let relay = InMemoryCommandRelay::default();
        let reg = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();

        // Published before subscribing: buffered for the registration.
        relay.publish_command("S1", start("A")).await.unwrap();
        let mut sub = relay.subscribe_commands(&reg).await.unwrap();
        relay.publish_command("S1", start("B")).await.unwrap();
        relay.publish_command("S1", stop()).await.unwrap();

        let got: Vec<RelayCommand> = vec![
            sub.recv().await.unwrap().command,
            sub.recv().await.unwrap().command,
            sub.recv().await.unwrap().command,
        ];
        assert_eq!(got, vec![start("A"), start("B"), stop()]);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_undeliverable() {
        let relay = InMemoryCommandRelay::default();
        let reg = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();
        let sub = relay.subscribe_commands(&reg).await.unwrap();
        drop(sub);

        let err = relay.publish_command("S1", stop()).await.unwrap_err();
        assert_eq!(err, RelayError::Undeliverable("S1".into()));
    }

    #[tokio::test]
    async fn second_subscription_is_refused() {
        let relay = InMemoryCommandRelay::default();
        let reg = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();
        let _sub = relay.subscribe_commands(&reg).await.unwrap();
        let err = relay.subscribe_commands(&reg).await.unwrap_err();
        assert_eq!(err, RelayError::AlreadySubscribed("S1".into()));
    }

    #[tokio::test]
    async fn evict_ends_old_subscription_and_guards_unregister() {
        let relay = InMemoryCommandRelay::default();
        let old = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();
        let mut old_sub = relay.subscribe_commands(&old).await.unwrap();

        let new = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();
        assert!(new.generation > old.generation);
        assert!(old_sub.recv().await.is_none());

        // The stale holder's teardown must not remove the new registration.
        assert!(!relay.unregister(&old).await.unwrap());
        assert!(relay.is_connected("S1").await.unwrap());
        assert_eq!(
            relay.subscribe_commands(&old).await.unwrap_err(),
            RelayError::StaleRegistration("S1".into())
        );

        assert!(relay.unregister(&new).await.unwrap());
        assert!(!relay.is_connected("S1").await.unwrap());
    }

    #[tokio::test]
    async fn reject_policy_refuses_second_registration() {
        let relay = InMemoryCommandRelay::default();
        let first = relay.register("S1", DuplicatePolicy::Reject).await.unwrap();
        let err = relay.register("S1", DuplicatePolicy::Reject).await.unwrap_err();
        assert_eq!(err, RelayError::AlreadyRegistered("S1".into()));

        relay.unregister(&first).await.unwrap();
        assert!(relay.register("S1", DuplicatePolicy::Reject).await.is_ok());
    }

    #[tokio::test]
    async fn outcome_reaches_the_publisher() {
        let relay = Arc::new(InMemoryCommandRelay::default());
        let reg = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();
        let mut sub = relay.subscribe_commands(&reg).await.unwrap();

        let ticket = relay.publish_command("S1", stop()).await.unwrap();
        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.correlation_id, ticket.correlation_id);

        relay
            .report_outcome(envelope.correlation_id, CommandOutcome::Accepted)
            .await
            .unwrap();
        let outcome = relay
            .await_outcome(&ticket, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Accepted);
    }

    #[tokio::test]
    async fn unanswered_command_times_out() {
        let relay = InMemoryCommandRelay::default();
        let _reg = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();
        let ticket = relay.publish_command("S1", stop()).await.unwrap();
        let err = relay
            .await_outcome(&ticket, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::Timeout);
    }

    #[tokio::test]
    async fn connected_set_tracks_registrations() {
        let relay = InMemoryCommandRelay::default();
        relay.register("S2", DuplicatePolicy::Evict).await.unwrap();
        let s1 = relay.register("S1", DuplicatePolicy::Evict).await.unwrap();
        let set = relay.list_connected_stations().await.unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["S1", "S2"]);

        relay.unregister(&s1).await.unwrap();
        assert!(!relay.is_connected("S1").await.unwrap());
    }

    #[tokio::test]
    async fn transaction_log_is_bounded() {
        let relay = InMemoryCommandRelay::new(2);
        for id in 1..=3 {
            relay
                .record("S1", TransactionEvent::Connected { connection_id: id })
                .await
                .unwrap();
        }
        let log = relay.transaction_log("S1").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].event, TransactionEvent::Connected { connection_id: 2 });
        assert!(relay.transaction_log("S9").await.unwrap().is_empty());
    }
}
