//! Queryable mirror of transition events.
//!
//! Keeps one record per machine with the latest transition and a
//! denormalized current state, the way an indexer would.

use crate::error::FeedError;
use crate::feed::{FeedEvent, FeedReceiver};
use dashmap::DashMap;
use permfsm_core::{Account, MachineEvent, StateId};
use serde::Serialize;
use std::sync::Arc;

/// Projected view of one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectedMachine {
    pub machine_id: String,
    pub current_state: StateId,
    pub actor: Account,
    pub from_state: StateId,
    pub to_state: StateId,
    pub timestamp: u64,
    /// Transitions seen for this machine.
    pub transitions: u64,
}

/// Per-machine projection of the transition stream.
#[derive(Debug, Default)]
pub struct TransitionProjection {
    machines: DashMap<String, ProjectedMachine>,
}

impl TransitionProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event in. Returns false for events that are not transitions.
    pub fn apply(&self, event: &FeedEvent) -> bool {
        let MachineEvent::Transition {
            actor,
            from_state,
            to_state,
        } = event.event
        else {
            return false;
        };

        self.machines
            .entry(event.machine_id.clone())
            .and_modify(|m| {
                m.current_state = to_state;
                m.actor = actor;
                m.from_state = from_state;
                m.to_state = to_state;
                m.timestamp = event.timestamp;
                m.transitions += 1;
            })
            .or_insert_with(|| ProjectedMachine {
                machine_id: event.machine_id.clone(),
                current_state: to_state,
                actor,
                from_state,
                to_state,
                timestamp: event.timestamp,
                transitions: 1,
            });
        true
    }

    pub fn get(&self, machine_id: &str) -> Option<ProjectedMachine> {
        self.machines.get(machine_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Consumes `receiver` until the feed closes.
    ///
    /// A lagged receiver logs how many events it missed and keeps going.
    pub async fn run(self: Arc<Self>, mut receiver: FeedReceiver) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    self.apply(&event);
                }
                Err(FeedError::Lagged { skipped }) => {
                    tracing::warn!(skipped, "projection lagged behind the feed");
                }
                Err(_) => break,
            }
        }
        tracing::debug!(machines = self.len(), "projection stopped");
    }
}
