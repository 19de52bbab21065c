//! Domain events emitted after a mutation commits.

use crate::ids::{Account, RoleId, StateId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// An event produced by a committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MachineEvent {
    Transition {
        actor: Account,
        from_state: StateId,
        to_state: StateId,
    },
    RoleGranted {
        role: RoleId,
        account: Account,
        sender: Account,
    },
    RoleRevoked {
        role: RoleId,
        account: Account,
        sender: Account,
    },
    RoleAdminChanged {
        role: RoleId,
        previous_admin: RoleId,
        new_admin: RoleId,
    },
}

/// Event discriminant, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transition,
    RoleGranted,
    RoleRevoked,
    RoleAdminChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Transition => "Transition",
            EventKind::RoleGranted => "RoleGranted",
            EventKind::RoleRevoked => "RoleRevoked",
            EventKind::RoleAdminChanged => "RoleAdminChanged",
        }
    }
}

impl MachineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MachineEvent::Transition { .. } => EventKind::Transition,
            MachineEvent::RoleGranted { .. } => EventKind::RoleGranted,
            MachineEvent::RoleRevoked { .. } => EventKind::RoleRevoked,
            MachineEvent::RoleAdminChanged { .. } => EventKind::RoleAdminChanged,
        }
    }

    /// The account that caused the event, if any.
    pub fn sender(&self) -> Option<Account> {
        match self {
            MachineEvent::Transition { actor, .. } => Some(*actor),
            MachineEvent::RoleGranted { sender, .. } | MachineEvent::RoleRevoked { sender, .. } => {
                Some(*sender)
            }
            MachineEvent::RoleAdminChanged { .. } => None,
        }
    }
}

/// An event together with the commit time of the call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub timestamp: u64,
    #[serde(flatten)]
    pub event: MachineEvent,
}

/// Receives events after each committed call, in commit order.
///
/// Sinks are invoked while the machine is still exclusively borrowed, so they
/// must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EmittedEvent);
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<EmittedEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<EmittedEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: EmittedEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = EmittedEvent {
            timestamp: 7,
            event: MachineEvent::Transition {
                actor: Account::repeat_byte(0xaa),
                from_state: StateId::literal("STATE_ONE"),
                to_state: StateId::literal("STATE_TWO"),
            },
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["event"], "transition");
        assert_eq!(json["timestamp"], 7);
        assert_eq!(json["from_state"], "STATE_ONE");
        assert_eq!(event.event.kind().as_str(), "Transition");
    }

    #[test]
    fn test_collecting_sink_drains() {
        let sink = CollectingSink::new();
        sink.emit(EmittedEvent {
            timestamp: 1,
            event: MachineEvent::RoleAdminChanged {
                role: RoleId::literal("ROLE_ONE"),
                previous_admin: RoleId::DEFAULT_ADMIN,
                new_admin: RoleId::literal("ROLE_ADMIN"),
            },
        });
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.take()[0].event.sender(), None);
        assert!(sink.is_empty());
    }
}
