//! Transition validation and commit.
//!
//! A transition request walks through the phases
//! `Validating -> Authorizing -> HookExecuting -> Committing -> Committed`.
//! Any failure before `Committing` ends in `Rejected` and leaves the machine
//! untouched. The read-only phases live in [`TransitionEngine::prepare`]; the
//! aggregate persists the prepared record and then calls
//! [`TransitionEngine::commit`], which cannot fail.

use crate::error::{CoreError, Denial};
use crate::event::MachineEvent;
use crate::graph::{State, StateGraph};
use crate::history::{HistoryLog, TransitionRecord};
use crate::hooks::{HookContext, HookRegistry};
use crate::ids::{Account, RoleId, StateId};
use crate::roles::RoleRegistry;

/// Lifecycle phase of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    Authorizing,
    HookExecuting,
    Committing,
    Committed,
    Rejected,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validating => "validating",
            Phase::Authorizing => "authorizing",
            Phase::HookExecuting => "hook_executing",
            Phase::Committing => "committing",
            Phase::Committed => "committed",
            Phase::Rejected => "rejected",
        }
    }
}

/// A caller's request to move the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRequest {
    pub to_state: StateId,
    /// Role the actor claims. Never inferred.
    pub role: RoleId,
    pub actor: Account,
}

/// Borrowed view of the parts of a machine a transition consults.
#[derive(Debug, Clone, Copy)]
pub struct TransitionEngine<'a> {
    graph: &'a StateGraph,
    roles: &'a RoleRegistry,
    hooks: &'a HookRegistry,
}

impl<'a> TransitionEngine<'a> {
    pub fn new(graph: &'a StateGraph, roles: &'a RoleRegistry, hooks: &'a HookRegistry) -> Self {
        Self {
            graph,
            roles,
            hooks,
        }
    }

    /// The edge `current -> to_state` must exist.
    pub fn validate(&self, current: StateId, to_state: StateId) -> Result<&'a State, CoreError> {
        let state = self.graph.get(current)?;
        if state.is_next(to_state) {
            Ok(state)
        } else {
            Err(CoreError::IllegalTransition {
                from: current,
                to: to_state,
            })
        }
    }

    /// The actor must hold the claimed role, and the role must gate `state`.
    pub fn authorize(&self, state: &State, request: &TransitionRequest) -> Result<(), CoreError> {
        self.roles.check_role(request.role, request.actor)?;
        if state.allows_role(request.role) {
            Ok(())
        } else {
            Err(CoreError::unauthorized(
                request.actor,
                Denial::RoleNotAllowed {
                    role: request.role,
                    state: state.name,
                },
            ))
        }
    }

    /// Runs every check and returns the record to commit.
    ///
    /// Nothing is mutated; a rejected request leaves no trace besides a log line.
    pub fn prepare(
        &self,
        current: StateId,
        request: &TransitionRequest,
        history_length: u64,
        timestamp: u64,
    ) -> Result<TransitionRecord, CoreError> {
        let span = tracing::debug_span!(
            "transition",
            from = %current,
            to = %request.to_state,
            role = %request.role,
            actor = %request.actor,
        );
        let _enter = span.enter();

        let mut phase = Phase::Validating;
        let result = self.run_phases(current, request, history_length, timestamp, &mut phase);
        if let Err(e) = &result {
            tracing::warn!(phase = phase.as_str(), error = %e, "transition rejected");
        } else {
            tracing::debug!(phase = Phase::Committing.as_str(), "transition accepted");
        }
        result
    }

    fn run_phases(
        &self,
        current: StateId,
        request: &TransitionRequest,
        history_length: u64,
        timestamp: u64,
        phase: &mut Phase,
    ) -> Result<TransitionRecord, CoreError> {
        let state = self.validate(current, request.to_state)?;

        *phase = Phase::Authorizing;
        self.authorize(state, request)?;

        if state.pre_function.is_some() {
            *phase = Phase::HookExecuting;
            self.hooks.run(&HookContext {
                from_state: state,
                to_state: request.to_state,
                actor: request.actor,
                role: request.role,
                history_length,
                timestamp,
            })?;
        }

        Ok(TransitionRecord {
            from_state: current,
            to_state: request.to_state,
            actor: request.actor,
            role: request.role,
            timestamp,
        })
    }

    /// Moves the pointer and appends the record. The only writer of either.
    pub(crate) fn commit(
        current: &mut StateId,
        history: &mut HistoryLog,
        record: TransitionRecord,
    ) -> MachineEvent {
        *current = record.to_state;
        let index = history.append(record);
        tracing::debug!(
            index,
            from = %record.from_state,
            to = %record.to_state,
            phase = Phase::Committed.as_str(),
            "transition committed"
        );
        MachineEvent::Transition {
            actor: record.actor,
            from_state: record.from_state,
            to_state: record.to_state,
        }
    }
}
