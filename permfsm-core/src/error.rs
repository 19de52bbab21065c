//! Core error types.

use crate::ids::{Account, RoleId, Selector, StateId};
use std::fmt;
use thiserror::Error;

/// Why an authorization check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// The account does not hold the role.
    MissingRole(RoleId),
    /// The role does not gate transitions away from the state.
    RoleNotAllowed { role: RoleId, state: StateId },
    /// The account holds none of the roles allowed on the state.
    NotStateOperator(StateId),
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::MissingRole(role) => write!(f, "missing role {}", role),
            Denial::RoleNotAllowed { role, state } => {
                write!(f, "role {} is not allowed in state {}", role, state)
            }
            Denial::NotStateOperator(state) => {
                write!(f, "holds none of the roles allowed in state {}", state)
            }
        }
    }
}

/// Errors from the state machine engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("state not found: {state}")]
    StateNotFound { state: StateId },

    #[error("entity not found: {entity_id}")]
    EntityNotFound { entity_id: u64 },

    #[error("illegal transition: {to} is not a next state of {from}")]
    IllegalTransition { from: StateId, to: StateId },

    #[error("unauthorized: account {account} {denial}")]
    Unauthorized { account: Account, denial: Denial },

    #[error("role {role} has already been added to state {state}")]
    DuplicateRole { state: StateId, role: RoleId },

    #[error("state already exists: {state}")]
    DuplicateState { state: StateId },

    #[error("bad confirmation: {caller} can only renounce roles for itself, not {confirmation}")]
    BadConfirmation {
        caller: Account,
        confirmation: Account,
    },

    #[error("history index {index} out of range (length {length})")]
    OutOfRange { index: u64, length: u64 },

    #[error("pre-function {selector} of state {state} failed: {reason}")]
    HookFailed {
        state: StateId,
        selector: Selector,
        reason: String,
    },

    #[error("no pre-function registered for selector {selector} (state {state})")]
    HookNotRegistered { state: StateId, selector: Selector },

    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("journal replay failed at sequence {sequence}: {reason}")]
    Replay { sequence: u64, reason: String },

    #[error("journal error: {0}")]
    Journal(#[from] permfsm_journal::JournalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn unauthorized(account: Account, denial: Denial) -> Self {
        CoreError::Unauthorized { account, denial }
    }

    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Journal(e) if e.is_retryable())
    }

    /// Returns true for authorization failures of any kind.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CoreError::Unauthorized { .. })
    }

    /// Returns an error code suitable for responses and exit reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::StateNotFound { .. } => "NOT_FOUND",
            CoreError::EntityNotFound { .. } => "NOT_FOUND",
            CoreError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            CoreError::Unauthorized { .. } => "UNAUTHORIZED",
            CoreError::DuplicateRole { .. } => "DUPLICATE_ROLE",
            CoreError::DuplicateState { .. } => "DUPLICATE_STATE",
            CoreError::BadConfirmation { .. } => "BAD_CONFIRMATION",
            CoreError::OutOfRange { .. } => "OUT_OF_RANGE",
            CoreError::HookFailed { .. } => "HOOK_FAILED",
            CoreError::HookNotRegistered { .. } => "HOOK_FAILED",
            CoreError::InvalidIdentifier { .. } => "BAD_REQUEST",
            CoreError::InvalidDefinition { .. } => "BAD_REQUEST",
            CoreError::Replay { .. } => "JOURNAL_CORRUPT",
            CoreError::Journal(e) if e.is_corruption() => "JOURNAL_CORRUPT",
            CoreError::Journal(_) => "JOURNAL_IO_ERROR",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }
}
