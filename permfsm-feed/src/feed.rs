//! Event broadcasting to subscribers.

use crate::error::FeedError;
use dashmap::DashMap;
use permfsm_core::{Account, EmittedEvent, EventKind, EventSink, MachineEvent, StateId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event data sent through broadcast channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    /// Name the emitting machine was registered under.
    pub machine_id: String,
    pub timestamp: u64,
    #[serde(flatten)]
    pub event: MachineEvent,
}

/// Filter for feed-wide subscriptions. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub machines: Vec<String>,
    pub kinds: Vec<EventKind>,
    /// Only transitions out of these states.
    pub from_states: Vec<StateId>,
    /// Only transitions into these states.
    pub to_states: Vec<StateId>,
    /// Only events caused by these accounts.
    pub actors: Vec<Account>,
}

impl EventFilter {
    /// Returns true if the event matches this filter.
    ///
    /// State filters only ever match transitions.
    pub fn matches(&self, event: &FeedEvent) -> bool {
        let (from, to) = match event.event {
            MachineEvent::Transition {
                from_state,
                to_state,
                ..
            } => (Some(from_state), Some(to_state)),
            _ => (None, None),
        };

        (self.machines.is_empty() || self.machines.contains(&event.machine_id))
            && (self.kinds.is_empty() || self.kinds.contains(&event.event.kind()))
            && (self.from_states.is_empty() || from.is_some_and(|s| self.from_states.contains(&s)))
            && (self.to_states.is_empty() || to.is_some_and(|s| self.to_states.contains(&s)))
            && (self.actors.is_empty()
                || event
                    .event
                    .sender()
                    .is_some_and(|a| self.actors.contains(&a)))
    }
}

/// Subscription type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionType {
    /// Watch one machine.
    Machine { machine_id: String },
    /// Watch every machine, filtered.
    All { filter: EventFilter },
}

/// Subscription info.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub subscription_type: SubscriptionType,
}

/// Receiving half of a subscription.
#[derive(Debug)]
pub struct FeedReceiver {
    receiver: broadcast::Receiver<FeedEvent>,
    filter: Option<EventFilter>,
}

impl FeedReceiver {
    /// Waits for the next matching event.
    pub async fn recv(&mut self) -> Result<FeedEvent, FeedError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.as_ref().map_or(true, |f| f.matches(&event)) {
                return Ok(event);
            }
        }
    }

    /// Returns the next matching event if one is already queued.
    ///
    /// A lagged receiver skips ahead to the oldest event still queued.
    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.as_ref().map_or(true, |f| f.matches(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "feed receiver lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Fans machine events out to subscribers.
pub struct EventFeed {
    /// Per-machine broadcast channels.
    channels: DashMap<String, broadcast::Sender<FeedEvent>>,

    /// Channel every event goes to.
    global_sender: broadcast::Sender<FeedEvent>,

    subscriptions: DashMap<String, Subscription>,

    channel_capacity: usize,
}

impl EventFeed {
    pub fn new(channel_capacity: usize) -> Self {
        let (global_sender, _) = broadcast::channel(channel_capacity);
        Self {
            channels: DashMap::new(),
            global_sender,
            subscriptions: DashMap::new(),
            channel_capacity,
        }
    }

    /// Subscribes to one machine's events.
    pub fn subscribe_machine(&self, machine_id: &str) -> (String, FeedReceiver) {
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());

        let receiver = self
            .channels
            .entry(machine_id.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe();

        self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                subscription_id: subscription_id.clone(),
                subscription_type: SubscriptionType::Machine {
                    machine_id: machine_id.to_string(),
                },
            },
        );
        tracing::debug!(%subscription_id, machine_id, "machine subscription added");

        (
            subscription_id,
            FeedReceiver {
                receiver,
                filter: None,
            },
        )
    }

    /// Subscribes to every machine's events that pass `filter`.
    pub fn subscribe_all(&self, filter: EventFilter) -> (String, FeedReceiver) {
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());
        let receiver = self.global_sender.subscribe();

        self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                subscription_id: subscription_id.clone(),
                subscription_type: SubscriptionType::All {
                    filter: filter.clone(),
                },
            },
        );
        tracing::debug!(%subscription_id, "feed-wide subscription added");

        (
            subscription_id,
            FeedReceiver {
                receiver,
                filter: Some(filter),
            },
        )
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Result<Subscription, FeedError> {
        self.subscriptions
            .remove(subscription_id)
            .map(|(_, sub)| sub)
            .ok_or_else(|| FeedError::SubscriptionNotFound {
                subscription_id: subscription_id.to_string(),
            })
    }

    /// Sends to the machine's channel and the global channel.
    pub fn notify(&self, event: FeedEvent) {
        if let Some(sender) = self.channels.get(&event.machine_id) {
            // No receivers is not an error.
            let _ = sender.send(event.clone());
        }
        let _ = self.global_sender.send(event);
    }

    pub fn get_subscription(&self, subscription_id: &str) -> Option<Subscription> {
        self.subscriptions.get(subscription_id).map(|r| r.clone())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Sink that publishes a machine's events under `machine_id`.
    pub fn sink(self: &Arc<Self>, machine_id: impl Into<String>) -> MachineSink {
        MachineSink {
            feed: Arc::clone(self),
            machine_id: machine_id.into(),
        }
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// [`EventSink`] bridging one machine into an [`EventFeed`].
pub struct MachineSink {
    feed: Arc<EventFeed>,
    machine_id: String,
}

impl MachineSink {
    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }
}

impl EventSink for MachineSink {
    fn emit(&self, event: EmittedEvent) {
        self.feed.notify(FeedEvent {
            machine_id: self.machine_id.clone(),
            timestamp: event.timestamp,
            event: event.event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: StateId = StateId::literal("STATE_ONE");
    const TWO: StateId = StateId::literal("STATE_TWO");

    fn transition(machine_id: &str) -> FeedEvent {
        FeedEvent {
            machine_id: machine_id.to_string(),
            timestamp: 10,
            event: MachineEvent::Transition {
                actor: Account::repeat_byte(1),
                from_state: ONE,
                to_state: TWO,
            },
        }
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let feed = EventFeed::new(16);
        let (sub1, _rx1) = feed.subscribe_machine("machine-1");
        let (sub2, _rx2) = feed.subscribe_all(EventFilter::default());

        assert!(sub1.starts_with("sub-"));
        assert_eq!(feed.subscription_count(), 2);
        assert_eq!(
            feed.get_subscription(&sub1).unwrap().subscription_type,
            SubscriptionType::Machine {
                machine_id: "machine-1".to_string()
            }
        );

        assert!(feed.unsubscribe(&sub1).is_ok());
        assert!(matches!(
            feed.unsubscribe(&sub1),
            Err(FeedError::SubscriptionNotFound { .. })
        ));
        feed.unsubscribe(&sub2).unwrap();
        assert_eq!(feed.subscription_count(), 0);
    }

    #[test]
    fn test_event_filter_matches() {
        let event = transition("m-1");
        assert!(EventFilter::default().matches(&event));

        let filter = EventFilter {
            machines: vec!["m-2".to_string()],
            ..Default::default()
        };
        assert!(!filter.matches(&event));

        let filter = EventFilter {
            to_states: vec![TWO],
            kinds: vec![EventKind::Transition],
            ..Default::default()
        };
        assert!(filter.matches(&event));

        let filter = EventFilter {
            from_states: vec![TWO],
            ..Default::default()
        };
        assert!(!filter.matches(&event));

        let filter = EventFilter {
            actors: vec![Account::repeat_byte(2)],
            ..Default::default()
        };
        assert!(!filter.matches(&event));

        let grant = FeedEvent {
            event: MachineEvent::RoleGranted {
                role: permfsm_core::RoleId::literal("ROLE_ONE"),
                account: Account::repeat_byte(3),
                sender: Account::repeat_byte(1),
            },
            ..transition("m-1")
        };
        let filter = EventFilter {
            to_states: vec![TWO],
            ..Default::default()
        };
        assert!(!filter.matches(&grant));
    }

    #[test]
    fn test_feed_event_json_is_flat() {
        let json = serde_json::to_value(transition("m-1")).unwrap();
        assert_eq!(json["machine_id"], "m-1");
        assert_eq!(json["event"], "transition");
        assert_eq!(json["to_state"], "STATE_TWO");
    }

    #[tokio::test]
    async fn test_notify_machine() {
        let feed = EventFeed::new(16);
        let (_, mut rx) = feed.subscribe_machine("m-1");

        feed.notify(transition("m-2"));
        feed.notify(transition("m-1"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.machine_id, "m-1");
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_notify_global_applies_filter() {
        let feed = EventFeed::new(16);
        let (_, mut rx) = feed.subscribe_all(EventFilter {
            machines: vec!["m-2".to_string()],
            ..Default::default()
        });

        feed.notify(transition("m-1"));
        feed.notify(transition("m-2"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.machine_id, "m-2");
    }

    #[tokio::test]
    async fn test_closed_feed() {
        let feed = EventFeed::new(4);
        let (_, mut rx) = feed.subscribe_all(EventFilter::default());
        drop(feed);
        assert_eq!(rx.recv().await.unwrap_err(), FeedError::Closed);
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_and_recovers() {
        let feed = EventFeed::new(2);
        let (_, mut rx) = feed.subscribe_all(EventFilter::default());
        for _ in 0..5 {
            feed.notify(transition("m-1"));
        }

        let err = rx.recv().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_try_recv_skips_past_lag() {
        let feed = EventFeed::new(2);
        let (_, mut rx) = feed.subscribe_all(EventFilter::default());
        for timestamp in 0..5 {
            feed.notify(FeedEvent {
                timestamp,
                ..transition("m-1")
            });
        }

        assert_eq!(rx.try_recv().unwrap().timestamp, 3);
        assert_eq!(rx.try_recv().unwrap().timestamp, 4);
        assert!(rx.try_recv().is_none());
    }
}
