//! The state machine aggregate.
//!
//! [`StateMachine`] exclusively owns one graph, one role registry, one
//! history log and the current-state pointer. Every mutating call follows
//! the same shape:
//!
//! 1. validate and authorize against the current state (read-only)
//! 2. append the mutation to the journal, if one is attached
//! 3. apply it in memory (cannot fail)
//! 4. hand the resulting events to the sink
//!
//! A failure in 1 or 2 returns before anything is touched. Calls that would
//! change nothing (a repeated edge, a redundant grant) succeed without
//! journaling or emitting.

use crate::capability::Capabilities;
use crate::definition::MachineDefinition;
use crate::engine::{TransitionEngine, TransitionRequest};
use crate::error::CoreError;
use crate::event::{EmittedEvent, EventSink, MachineEvent};
use crate::graph::{State, StateGraph};
use crate::history::{Clock, HistoryLog, SystemClock, TransitionRecord};
use crate::hooks::{HookRegistry, PreFunction};
use crate::ids::{Account, InterfaceId, RoleId, Selector, StateId};
use crate::metadata::MetadataResolver;
use crate::roles::RoleRegistry;
use permfsm_journal::{Journal, JournalEntry};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A permissioned, graph-constrained state machine.
pub struct StateMachine {
    owner: Account,
    current: StateId,
    graph: StateGraph,
    roles: RoleRegistry,
    history: HistoryLog,
    hooks: HookRegistry,
    capabilities: Capabilities,
    metadata: Option<Arc<dyn MetadataResolver>>,
    clock: Arc<dyn Clock>,
    journal: Option<Arc<Journal>>,
    sink: Option<Arc<dyn EventSink>>,
    checksum: String,
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("owner", &self.owner)
            .field("current", &self.current)
            .field("states", &self.graph.len())
            .field("history", &self.history.len())
            .field("hooks", &self.hooks)
            .field("journaled", &self.journal.is_some())
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl StateMachine {
    /// Builds an in-memory machine from a definition.
    ///
    /// The owner receives the default admin role and the definition's owner
    /// roles. No events are emitted for construction.
    pub fn from_definition(owner: Account, def: &MachineDefinition) -> Result<Self, CoreError> {
        def.validate()?;

        let mut graph = StateGraph::new();
        let mut roles = RoleRegistry::new();

        roles.grant(RoleId::DEFAULT_ADMIN, owner, owner);
        for &role in &def.owner_roles {
            roles.grant(role, owner, owner);
        }

        for state in &def.states {
            graph.insert(state.name);
        }
        for state in &def.states {
            for &next in &state.next {
                graph.push_next(state.name, next);
            }
            for &role in &state.roles {
                graph.push_role(state.name, role);
                roles.note(role);
            }
            for &selector in &state.functions {
                graph.push_function(state.name, selector);
            }
            if let Some(selector) = state.pre_function {
                graph.set_pre_function(state.name, selector);
            }
        }

        for admin in &def.role_admins {
            roles.set_role_admin(admin.role, admin.admin);
        }
        for grant in &def.grants {
            roles.grant(grant.role, grant.account, owner);
        }

        let metadata = def
            .metadata
            .clone()
            .map(|m| Arc::new(m) as Arc<dyn MetadataResolver>);

        Ok(Self {
            owner,
            current: def.initial,
            graph,
            roles,
            history: HistoryLog::new(),
            hooks: HookRegistry::new(),
            capabilities: Capabilities::new(),
            metadata,
            clock: Arc::new(SystemClock),
            journal: None,
            sink: None,
            checksum: def.checksum()?,
        })
    }

    /// Builds a machine and records its definition as the first journal entry.
    ///
    /// The journal must be empty.
    pub fn create(
        owner: Account,
        def: &MachineDefinition,
        journal: Arc<Journal>,
    ) -> Result<Self, CoreError> {
        if !journal.is_empty() {
            return Err(CoreError::InvalidDefinition {
                reason: format!(
                    "journal {} already holds {} entries",
                    journal.path().display(),
                    journal.len()
                ),
            });
        }

        let mut machine = Self::from_definition(owner, def)?;
        journal.append(&JournalEntry::Define {
            owner: owner.to_string(),
            checksum: machine.checksum.clone(),
            definition: def.to_json()?,
        })?;
        machine.journal = Some(journal);

        tracing::info!(
            owner = %owner,
            states = machine.graph.len(),
            checksum = %machine.checksum,
            "machine created"
        );
        Ok(machine)
    }

    /// Rebuilds a machine by replaying its journal.
    ///
    /// Entries are applied without re-authorization and hooks are not run:
    /// every entry describes a mutation that already passed both.
    pub fn open(journal: Arc<Journal>) -> Result<Self, CoreError> {
        let entries = journal.read_all()?;
        let mut entries = entries.into_iter();

        let mut machine = match entries.next() {
            Some((
                sequence,
                JournalEntry::Define {
                    owner,
                    checksum,
                    definition,
                },
            )) => {
                let owner: Account = parse(sequence, &owner)?;
                let def = MachineDefinition::from_json(&definition).map_err(|e| {
                    CoreError::Replay {
                        sequence,
                        reason: e.to_string(),
                    }
                })?;
                let machine = Self::from_definition(owner, &def)?;
                if machine.checksum != checksum {
                    return Err(CoreError::Replay {
                        sequence,
                        reason: format!(
                            "definition checksum mismatch: recorded {}, computed {}",
                            checksum, machine.checksum
                        ),
                    });
                }
                machine
            }
            Some((sequence, entry)) => {
                return Err(CoreError::Replay {
                    sequence,
                    reason: format!(
                        "expected a definition, found {:?} entry",
                        entry.entry_type()
                    ),
                })
            }
            None => {
                return Err(CoreError::Replay {
                    sequence: 0,
                    reason: "journal is empty".to_string(),
                })
            }
        };

        let mut replayed = 1u64;
        for (sequence, entry) in entries {
            machine.replay_entry(sequence, entry)?;
            replayed += 1;
        }

        tracing::info!(
            "journal replay complete: {} entries, {} states, {} transitions",
            replayed,
            machine.graph.len(),
            machine.history.len()
        );

        machine.journal = Some(journal);
        Ok(machine)
    }

    fn replay_entry(&mut self, sequence: u64, entry: JournalEntry) -> Result<(), CoreError> {
        match entry {
            JournalEntry::Define { .. } => {
                return Err(CoreError::Replay {
                    sequence,
                    reason: "unexpected second definition".to_string(),
                })
            }
            JournalEntry::AddState { state, .. } => {
                self.graph.insert(parse(sequence, &state)?);
            }
            JournalEntry::AddNextState {
                state, next_state, ..
            } => {
                let state = self.replay_state(sequence, &state)?;
                let next_state = self.replay_state(sequence, &next_state)?;
                self.graph.push_next(state, next_state);
            }
            JournalEntry::AddAllowedFunction {
                state, selector, ..
            } => {
                let state = self.replay_state(sequence, &state)?;
                self.graph.push_function(state, parse(sequence, &selector)?);
            }
            JournalEntry::SetPreFunction {
                state, selector, ..
            } => {
                let state = self.replay_state(sequence, &state)?;
                self.graph
                    .set_pre_function(state, parse(sequence, &selector)?);
            }
            JournalEntry::AddRoleForState {
                state,
                role,
                account,
                sender,
            } => {
                let state = self.replay_state(sequence, &state)?;
                let role = parse(sequence, &role)?;
                self.graph.push_role(state, role);
                self.roles
                    .grant(role, parse(sequence, &account)?, parse(sequence, &sender)?);
            }
            JournalEntry::GrantRole {
                role,
                account,
                sender,
            } => {
                self.roles.grant(
                    parse(sequence, &role)?,
                    parse(sequence, &account)?,
                    parse(sequence, &sender)?,
                );
            }
            JournalEntry::RevokeRole {
                role,
                account,
                sender,
            } => {
                self.roles.revoke(
                    parse(sequence, &role)?,
                    parse(sequence, &account)?,
                    parse(sequence, &sender)?,
                );
            }
            JournalEntry::Transition {
                from_state,
                to_state,
                actor,
                role,
                timestamp,
            } => {
                let record = TransitionRecord {
                    from_state: parse(sequence, &from_state)?,
                    to_state: self.replay_state(sequence, &to_state)?,
                    actor: parse(sequence, &actor)?,
                    role: parse(sequence, &role)?,
                    timestamp,
                };
                if record.from_state != self.current {
                    return Err(CoreError::Replay {
                        sequence,
                        reason: format!(
                            "transition from {} recorded while machine is in {}",
                            record.from_state, self.current
                        ),
                    });
                }
                TransitionEngine::commit(&mut self.current, &mut self.history, record);
            }
        }
        Ok(())
    }

    fn replay_state(&self, sequence: u64, text: &str) -> Result<StateId, CoreError> {
        let state: StateId = parse(sequence, text)?;
        if self.graph.contains(state) {
            Ok(state)
        } else {
            Err(CoreError::Replay {
                sequence,
                reason: format!("unknown state {}", state),
            })
        }
    }

    // Configuration

    /// Replaces the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches the sink that receives events of later calls.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sink = Some(sink);
    }

    /// Registers the hook invoked for states naming `selector` as pre-function.
    pub fn register_hook(&mut self, selector: Selector, hook: impl PreFunction + 'static) {
        self.hooks.register(selector, hook);
    }

    /// Advertises an extra interface. Returns false if it was already known
    /// or is the reserved `0xffffffff`.
    pub fn register_interface(&mut self, id: InterfaceId) -> bool {
        self.capabilities.register(id)
    }

    pub fn set_metadata_resolver(&mut self, resolver: Arc<dyn MetadataResolver>) {
        self.metadata = Some(resolver);
    }

    // Graph queries

    pub fn get_state(&self, state: StateId) -> Result<&State, CoreError> {
        self.graph.get(state)
    }

    pub fn get_all_states(&self) -> &[StateId] {
        self.graph.all()
    }

    pub fn get_current_state(&self) -> StateId {
        self.current
    }

    pub fn get_next_states(&self) -> &[StateId] {
        self.graph
            .get(self.current)
            .map(|state| state.next_states.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `role` gates transitions out of the current state.
    pub fn check_allowed_roles(&self, role: RoleId) -> bool {
        self.graph
            .get(self.current)
            .is_ok_and(|state| state.allows_role(role))
    }

    pub fn is_function_allowed(&self, selector: Selector) -> bool {
        self.graph
            .get(self.current)
            .is_ok_and(|state| state.allows_function(selector))
    }

    // Transitions

    /// Moves the machine to `to_state`, acting as `caller` under `role`.
    pub fn transition_state(
        &mut self,
        caller: Account,
        to_state: StateId,
        role: RoleId,
    ) -> Result<TransitionRecord, CoreError> {
        let timestamp = self.clock.now();
        let request = TransitionRequest {
            to_state,
            role,
            actor: caller,
        };
        let record = TransitionEngine::new(&self.graph, &self.roles, &self.hooks).prepare(
            self.current,
            &request,
            self.history.len(),
            timestamp,
        )?;

        self.persist(JournalEntry::Transition {
            from_state: record.from_state.to_string(),
            to_state: record.to_state.to_string(),
            actor: record.actor.to_string(),
            role: record.role.to_string(),
            timestamp,
        })?;

        let event = TransitionEngine::commit(&mut self.current, &mut self.history, record);
        self.emit(timestamp, [event]);
        Ok(record)
    }

    // Graph mutations

    /// Registers a new state. Requires the default admin role.
    pub fn add_state(&mut self, caller: Account, state: StateId) -> Result<(), CoreError> {
        self.roles.check_role(RoleId::DEFAULT_ADMIN, caller)?;
        if self.graph.contains(state) {
            return Err(CoreError::DuplicateState { state });
        }

        self.persist(JournalEntry::AddState {
            state: state.to_string(),
            sender: caller.to_string(),
        })?;
        self.graph.insert(state);
        tracing::debug!(%state, %caller, "state added");
        Ok(())
    }

    /// Adds the edge `state -> next_state`. Adding an existing edge is a no-op.
    pub fn add_next_state_for_state(
        &mut self,
        caller: Account,
        state: StateId,
        next_state: StateId,
    ) -> Result<(), CoreError> {
        self.graph.check_operator(state, caller, &self.roles)?;
        self.graph.get(next_state)?;
        if self.graph.get(state)?.is_next(next_state) {
            return Ok(());
        }

        self.persist(JournalEntry::AddNextState {
            state: state.to_string(),
            next_state: next_state.to_string(),
            sender: caller.to_string(),
        })?;
        self.graph.push_next(state, next_state);
        tracing::debug!(%state, %next_state, %caller, "edge added");
        Ok(())
    }

    /// Allows `selector` in `state`. Adding an allowed selector is a no-op.
    pub fn add_allowed_function_for_state(
        &mut self,
        caller: Account,
        state: StateId,
        selector: Selector,
    ) -> Result<(), CoreError> {
        self.graph.check_operator(state, caller, &self.roles)?;
        if self.graph.get(state)?.allows_function(selector) {
            return Ok(());
        }

        self.persist(JournalEntry::AddAllowedFunction {
            state: state.to_string(),
            selector: selector.to_string(),
            sender: caller.to_string(),
        })?;
        self.graph.push_function(state, selector);
        tracing::debug!(%state, %selector, %caller, "function allowed");
        Ok(())
    }

    /// Sets or replaces the pre-function of `state`.
    pub fn set_pre_function(
        &mut self,
        caller: Account,
        state: StateId,
        selector: Selector,
    ) -> Result<(), CoreError> {
        self.graph.check_operator(state, caller, &self.roles)?;
        if self.graph.get(state)?.pre_function == Some(selector) {
            return Ok(());
        }

        self.persist(JournalEntry::SetPreFunction {
            state: state.to_string(),
            selector: selector.to_string(),
            sender: caller.to_string(),
        })?;
        self.graph.set_pre_function(state, selector);
        tracing::debug!(%state, %selector, %caller, "pre-function set");
        Ok(())
    }

    /// Allows `role` in `state` and grants it to `account`, as one unit.
    ///
    /// The caller must operate `state` and administer `role`.
    pub fn add_role_for_state(
        &mut self,
        caller: Account,
        state: StateId,
        role: RoleId,
        account: Account,
    ) -> Result<(), CoreError> {
        self.graph.check_operator(state, caller, &self.roles)?;
        self.roles.check_admin(role, caller)?;
        if self.graph.get(state)?.allows_role(role) {
            return Err(CoreError::DuplicateRole { state, role });
        }

        self.persist(JournalEntry::AddRoleForState {
            state: state.to_string(),
            role: role.to_string(),
            account: account.to_string(),
            sender: caller.to_string(),
        })?;
        self.graph.push_role(state, role);
        let granted = self.roles.grant(role, account, caller);
        tracing::debug!(%state, %role, %account, %caller, "role added to state");

        self.emit(self.clock.now(), granted);
        Ok(())
    }

    // Role administration

    /// Grants `role` to `account`. Requires the admin role of `role`.
    pub fn grant_role(
        &mut self,
        caller: Account,
        role: RoleId,
        account: Account,
    ) -> Result<(), CoreError> {
        self.roles.check_admin(role, caller)?;
        if self.roles.has_role(role, account) {
            return Ok(());
        }

        self.persist(JournalEntry::GrantRole {
            role: role.to_string(),
            account: account.to_string(),
            sender: caller.to_string(),
        })?;
        let granted = self.roles.grant(role, account, caller);
        self.emit(self.clock.now(), granted);
        Ok(())
    }

    /// Grants a role given by name, encoding the name as a role token.
    pub fn grant_role_to_account(
        &mut self,
        caller: Account,
        role_name: &str,
        account: Account,
    ) -> Result<RoleId, CoreError> {
        let role = RoleId::encode(role_name)?;
        self.grant_role(caller, role, account)?;
        Ok(role)
    }

    /// Revokes `role` from `account`. Requires the admin role of `role`.
    pub fn revoke_role(
        &mut self,
        caller: Account,
        role: RoleId,
        account: Account,
    ) -> Result<(), CoreError> {
        self.roles.check_admin(role, caller)?;
        self.remove_role(caller, role, account)
    }

    /// Gives up `role`. `confirmation` must equal `caller`.
    pub fn renounce_role(
        &mut self,
        caller: Account,
        role: RoleId,
        confirmation: Account,
    ) -> Result<(), CoreError> {
        if confirmation != caller {
            return Err(CoreError::BadConfirmation {
                caller,
                confirmation,
            });
        }
        self.remove_role(caller, role, caller)
    }

    fn remove_role(
        &mut self,
        caller: Account,
        role: RoleId,
        account: Account,
    ) -> Result<(), CoreError> {
        if !self.roles.has_role(role, account) {
            return Ok(());
        }

        self.persist(JournalEntry::RevokeRole {
            role: role.to_string(),
            account: account.to_string(),
            sender: caller.to_string(),
        })?;
        let revoked = self.roles.revoke(role, account, caller);
        self.emit(self.clock.now(), revoked);
        Ok(())
    }

    pub fn has_role(&self, role: RoleId, account: Account) -> bool {
        self.roles.has_role(role, account)
    }

    pub fn get_role_admin(&self, role: RoleId) -> RoleId {
        self.roles.role_admin(role)
    }

    /// Every role the machine knows about, in first-seen order.
    pub fn get_roles(&self) -> &[RoleId] {
        self.roles.roles()
    }

    // History

    pub fn get_history(&self, index: u64) -> Result<TransitionRecord, CoreError> {
        self.history.at(index).copied()
    }

    pub fn get_history_length(&self) -> u64 {
        self.history.len()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    // Collaborators

    pub fn supports_interface(&self, id: InterfaceId) -> bool {
        self.capabilities.supports(id)
    }

    pub fn entity_uri(&self, entity_id: u64) -> Result<String, CoreError> {
        match &self.metadata {
            Some(resolver) => resolver.entity_uri(entity_id),
            None => Err(CoreError::EntityNotFound { entity_id }),
        }
    }

    pub fn owner(&self) -> Account {
        self.owner
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    /// Checksum of the definition the machine was built from.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn journal(&self) -> Option<&Arc<Journal>> {
        self.journal.as_ref()
    }

    fn persist(&self, entry: JournalEntry) -> Result<(), CoreError> {
        if let Some(journal) = &self.journal {
            let sequence = journal.append(&entry)?;
            tracing::trace!(sequence, entry_type = ?entry.entry_type(), "journaled");
        }
        Ok(())
    }

    fn emit(&self, timestamp: u64, events: impl IntoIterator<Item = MachineEvent>) {
        if let Some(sink) = &self.sink {
            for event in events {
                sink.emit(EmittedEvent { timestamp, event });
            }
        }
    }
}

fn parse<T>(sequence: u64, text: &str) -> Result<T, CoreError>
where
    T: FromStr<Err = CoreError>,
{
    text.parse().map_err(|e: CoreError| CoreError::Replay {
        sequence,
        reason: e.to_string(),
    })
}
