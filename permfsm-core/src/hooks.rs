//! Pre-transition hooks.
//!
//! A state may name a selector as its pre-function. Before a transition out
//! of that state commits, the hook registered under the selector runs with a
//! read-only view of the pending transition. An error aborts the transition.

use crate::error::CoreError;
use crate::graph::State;
use crate::ids::{Account, RoleId, Selector, StateId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Read-only view handed to a hook.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub from_state: &'a State,
    pub to_state: StateId,
    pub actor: Account,
    pub role: RoleId,
    /// History length before this transition.
    pub history_length: u64,
    pub timestamp: u64,
}

/// A pre-transition check. Must be synchronous and bounded.
pub trait PreFunction: Send + Sync {
    fn call(&self, ctx: &HookContext<'_>) -> Result<(), String>;
}

impl<F> PreFunction for F
where
    F: Fn(&HookContext<'_>) -> Result<(), String> + Send + Sync,
{
    fn call(&self, ctx: &HookContext<'_>) -> Result<(), String> {
        self(ctx)
    }
}

/// Hooks keyed by selector.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<Selector, Arc<dyn PreFunction>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut selectors: Vec<_> = self.hooks.keys().collect();
        selectors.sort();
        f.debug_struct("HookRegistry")
            .field("selectors", &selectors)
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook` under `selector`, replacing any previous hook.
    pub fn register(&mut self, selector: Selector, hook: impl PreFunction + 'static) {
        self.hooks.insert(selector, Arc::new(hook));
    }

    pub fn contains(&self, selector: Selector) -> bool {
        self.hooks.contains_key(&selector)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs the pre-function of `ctx.from_state`, if it has one.
    pub fn run(&self, ctx: &HookContext<'_>) -> Result<(), CoreError> {
        let Some(selector) = ctx.from_state.pre_function else {
            return Ok(());
        };
        let state = ctx.from_state.name;
        let hook = self
            .hooks
            .get(&selector)
            .ok_or(CoreError::HookNotRegistered { state, selector })?;
        hook.call(ctx).map_err(|reason| CoreError::HookFailed {
            state,
            selector,
            reason,
        })
    }
}
