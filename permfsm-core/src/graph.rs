//! The transition graph.
//!
//! States are only ever added. Every per-state collection grows by
//! set-union, so no operation needs to rebalance or delete.

use crate::error::{CoreError, Denial};
use crate::ids::{Account, RoleId, Selector, StateId};
use crate::roles::RoleRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A node of the transition graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub name: StateId,
    /// Legal targets, in insertion order, without duplicates.
    pub next_states: Vec<StateId>,
    /// Roles that may move the machine out of this state.
    pub allowed_roles: Vec<RoleId>,
    pub allowed_functions: Vec<Selector>,
    /// Hook run before any transition out of this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_function: Option<Selector>,
}

impl State {
    pub fn new(name: StateId) -> Self {
        Self {
            name,
            next_states: Vec::new(),
            allowed_roles: Vec::new(),
            allowed_functions: Vec::new(),
            pre_function: None,
        }
    }

    pub fn is_next(&self, state: StateId) -> bool {
        self.next_states.contains(&state)
    }

    pub fn allows_role(&self, role: RoleId) -> bool {
        self.allowed_roles.contains(&role)
    }

    pub fn allows_function(&self, selector: Selector) -> bool {
        self.allowed_functions.contains(&selector)
    }
}

/// Arena of states keyed by identifier, remembering registration order.
#[derive(Debug, Clone, Default)]
pub struct StateGraph {
    states: HashMap<StateId, State>,
    order: Vec<StateId>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.states.contains_key(&id)
    }

    pub fn get(&self, id: StateId) -> Result<&State, CoreError> {
        self.states
            .get(&id)
            .ok_or(CoreError::StateNotFound { state: id })
    }

    /// State ids in registration order.
    pub fn all(&self) -> &[StateId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.order.iter().filter_map(|id| self.states.get(id))
    }

    /// Fails with `Unauthorized` unless `caller` may reconfigure `state`.
    ///
    /// Operators are holders of any role allowed on the state, plus holders
    /// of the default admin role.
    pub fn check_operator(
        &self,
        state: StateId,
        caller: Account,
        roles: &RoleRegistry,
    ) -> Result<(), CoreError> {
        let node = self.get(state)?;
        if roles.holds_any(&node.allowed_roles, caller)
            || roles.has_role(RoleId::DEFAULT_ADMIN, caller)
        {
            Ok(())
        } else {
            Err(CoreError::unauthorized(
                caller,
                Denial::NotStateOperator(state),
            ))
        }
    }

    /// Registers a state. Returns false if it already existed.
    pub(crate) fn insert(&mut self, id: StateId) -> bool {
        if self.states.contains_key(&id) {
            return false;
        }
        self.states.insert(id, State::new(id));
        self.order.push(id);
        true
    }

    // The mutators below assume the state exists; callers look it up first.

    pub(crate) fn push_next(&mut self, state: StateId, next: StateId) -> bool {
        match self.states.get_mut(&state) {
            Some(node) if !node.is_next(next) => {
                node.next_states.push(next);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn push_function(&mut self, state: StateId, selector: Selector) -> bool {
        match self.states.get_mut(&state) {
            Some(node) if !node.allows_function(selector) => {
                node.allowed_functions.push(selector);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn push_role(&mut self, state: StateId, role: RoleId) -> bool {
        match self.states.get_mut(&state) {
            Some(node) if !node.allows_role(role) => {
                node.allowed_roles.push(role);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_pre_function(&mut self, state: StateId, selector: Selector) -> bool {
        match self.states.get_mut(&state) {
            Some(node) if node.pre_function != Some(selector) => {
                node.pre_function = Some(selector);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: StateId = StateId::literal("STATE_ONE");
    const TWO: StateId = StateId::literal("STATE_TWO");
    const ADMIN: RoleId = RoleId::literal("ROLE_ADMIN");

    #[test]
    fn test_insert_keeps_registration_order() {
        let mut graph = StateGraph::new();
        assert!(graph.insert(TWO));
        assert!(graph.insert(ONE));
        assert!(!graph.insert(TWO));

        assert_eq!(graph.all(), &[TWO, ONE]);
        assert_eq!(graph.len(), 2);
        let names: Vec<_> = graph.iter().map(|s| s.name).collect();
        assert_eq!(names, vec![TWO, ONE]);
    }

    #[test]
    fn test_get_unknown_state() {
        let graph = StateGraph::new();
        assert!(matches!(
            graph.get(ONE),
            Err(CoreError::StateNotFound { state }) if state == ONE
        ));
    }

    #[test]
    fn test_push_is_set_union() {
        let mut graph = StateGraph::new();
        graph.insert(ONE);
        graph.insert(TWO);

        assert!(graph.push_next(ONE, TWO));
        assert!(!graph.push_next(ONE, TWO));
        assert!(graph.push_role(ONE, ADMIN));
        assert!(!graph.push_role(ONE, ADMIN));

        let selector = Selector::new([1, 2, 3, 4]);
        assert!(graph.push_function(ONE, selector));
        assert!(!graph.push_function(ONE, selector));
        assert!(graph.set_pre_function(ONE, selector));
        assert!(!graph.set_pre_function(ONE, selector));

        let state = graph.get(ONE).unwrap();
        assert_eq!(state.next_states, vec![TWO]);
        assert_eq!(state.allowed_roles, vec![ADMIN]);
        assert_eq!(state.allowed_functions, vec![selector]);
        assert_eq!(state.pre_function, Some(selector));
    }

    #[test]
    fn test_operator_check() {
        let alice = Account::repeat_byte(1);
        let bob = Account::repeat_byte(2);
        let root = Account::repeat_byte(3);

        let mut graph = StateGraph::new();
        graph.insert(ONE);
        graph.push_role(ONE, ADMIN);

        let mut roles = RoleRegistry::new();
        roles.grant(ADMIN, alice, root);
        roles.grant(RoleId::DEFAULT_ADMIN, root, root);

        assert!(graph.check_operator(ONE, alice, &roles).is_ok());
        assert!(graph.check_operator(ONE, root, &roles).is_ok());
        let err = graph.check_operator(ONE, bob, &roles).unwrap_err();
        assert!(err.is_unauthorized());
        assert!(matches!(
            graph.check_operator(TWO, alice, &roles),
            Err(CoreError::StateNotFound { .. })
        ));
    }
}
