//! Thread-safe handle to a machine.
//!
//! Mutating calls run under one writer mutex, so they are totally ordered.
//! After every call the writer publishes an immutable [`MachineView`];
//! queries only clone the `Arc` of the latest view, so a reader can hold a
//! view for as long as it likes without stalling writers, and never observes
//! a half-applied call.

use crate::error::CoreError;
use crate::graph::{State, StateGraph};
use crate::history::{HistoryLog, TransitionRecord};
use crate::ids::{Account, RoleId, StateId};
use crate::machine::StateMachine;
use crate::roles::RoleRegistry;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;

/// Consistent view of the parts of a machine most callers poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineSnapshot {
    pub current_state: StateId,
    pub next_states: Vec<StateId>,
    pub history_length: u64,
    pub last_transition: Option<TransitionRecord>,
}

/// Read-only copy of a machine as of one committed call.
#[derive(Debug, Clone)]
pub struct MachineView {
    current: StateId,
    graph: StateGraph,
    roles: RoleRegistry,
    history: HistoryLog,
}

impl MachineView {
    fn capture(machine: &StateMachine) -> Self {
        Self {
            current: machine.get_current_state(),
            graph: machine.graph().clone(),
            roles: machine.roles().clone(),
            history: machine.history().clone(),
        }
    }

    pub fn get_current_state(&self) -> StateId {
        self.current
    }

    pub fn get_state(&self, state: StateId) -> Result<&State, CoreError> {
        self.graph.get(state)
    }

    pub fn get_all_states(&self) -> &[StateId] {
        self.graph.all()
    }

    pub fn get_next_states(&self) -> &[StateId] {
        self.graph
            .get(self.current)
            .map(|state| state.next_states.as_slice())
            .unwrap_or(&[])
    }

    pub fn check_allowed_roles(&self, role: RoleId) -> bool {
        self.graph
            .get(self.current)
            .is_ok_and(|state| state.allows_role(role))
    }

    pub fn has_role(&self, role: RoleId, account: Account) -> bool {
        self.roles.has_role(role, account)
    }

    pub fn get_role_admin(&self, role: RoleId) -> RoleId {
        self.roles.role_admin(role)
    }

    pub fn get_history(&self, index: u64) -> Result<TransitionRecord, CoreError> {
        self.history.at(index).copied()
    }

    pub fn get_history_length(&self) -> u64 {
        self.history.len()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            current_state: self.current,
            next_states: self.get_next_states().to_vec(),
            history_length: self.history.len(),
            last_transition: self.history.last().copied(),
        }
    }
}

/// Cloneable, thread-safe [`StateMachine`].
#[derive(Clone)]
pub struct SharedMachine {
    machine: Arc<Mutex<StateMachine>>,
    published: Arc<RwLock<Arc<MachineView>>>,
}

impl std::fmt::Debug for SharedMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMachine")
            .field("view", &self.view().snapshot())
            .finish()
    }
}

impl SharedMachine {
    pub fn new(machine: StateMachine) -> Self {
        let view = Arc::new(MachineView::capture(&machine));
        Self {
            machine: Arc::new(Mutex::new(machine)),
            published: Arc::new(RwLock::new(view)),
        }
    }

    /// Latest published view. Holding it never blocks a writer.
    pub fn view(&self) -> Arc<MachineView> {
        self.published.read().clone()
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        self.view().snapshot()
    }

    /// Runs `f` as the only writer, then publishes the resulting view.
    ///
    /// The view is republished even when `f` fails; a failed call leaves the
    /// machine unchanged, so readers see the same state either way.
    pub fn update<R>(&self, f: impl FnOnce(&mut StateMachine) -> R) -> R {
        let mut machine = self.machine.lock();
        let result = f(&mut machine);
        let view = Arc::new(MachineView::capture(&machine));
        *self.published.write() = view;
        result
    }

    pub fn transition_state(
        &self,
        caller: Account,
        to_state: StateId,
        role: RoleId,
    ) -> Result<TransitionRecord, CoreError> {
        self.update(|m| m.transition_state(caller, to_state, role))
    }

    pub fn has_role(&self, role: RoleId, account: Account) -> bool {
        self.view().has_role(role, account)
    }

    pub fn get_history(&self, index: u64) -> Result<TransitionRecord, CoreError> {
        self.view().get_history(index)
    }
}
