//! # permfsm-core
//!
//! Permissioned state machine engine for permfsm.
//!
//! This crate provides:
//! - Fixed-width identifiers for states, roles, selectors and accounts
//! - The transition graph and the role registry with its admin hierarchy
//! - Transition validation, authorization, pre-function hooks and commit
//! - The append-only transition history
//! - Journal-backed persistence and replay of a whole machine

pub mod capability;
pub mod definition;
pub mod engine;
pub mod error;
pub mod event;
pub mod graph;
pub mod history;
pub mod hooks;
pub mod ids;
pub mod machine;
pub mod metadata;
pub mod roles;
pub mod shared;

pub use capability::Capabilities;
pub use definition::{GrantDefinition, MachineDefinition, RoleAdminDefinition, StateDefinition};
pub use engine::{Phase, TransitionEngine, TransitionRequest};
pub use error::{CoreError, Denial};
pub use event::{CollectingSink, EmittedEvent, EventKind, EventSink, MachineEvent};
pub use graph::{State, StateGraph};
pub use history::{Clock, HistoryLog, ManualClock, SystemClock, TransitionRecord};
pub use hooks::{HookContext, HookRegistry, PreFunction};
pub use ids::{Account, InterfaceId, RoleId, Selector, StateId};
pub use machine::StateMachine;
pub use metadata::{EntityMetadata, MetadataResolver};
pub use roles::RoleRegistry;
pub use shared::{MachineSnapshot, MachineView, SharedMachine};
