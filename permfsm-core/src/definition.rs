//! Machine definitions.
//!
//! A definition populates a fresh machine: its states and edges, the roles
//! gating each state, the role admin hierarchy and the initial memberships.
//!
//! ```json
//! {
//!   "initial": "STATE_ONE",
//!   "states": [
//!     {"name": "STATE_ONE", "next": ["STATE_TWO"], "roles": ["ROLE_ADMIN", "ROLE_ONE"]},
//!     {"name": "STATE_TWO", "roles": ["ROLE_ADMIN"], "pre_function": "0x5c60da1b"}
//!   ],
//!   "role_admins": [{"role": "ROLE_ONE", "admin": "ROLE_ADMIN"}],
//!   "grants": [{"role": "ROLE_ONE", "account": "0x00000000000000000000000000000000000000aa"}],
//!   "owner_roles": ["ROLE_ADMIN"]
//! }
//! ```

use crate::error::CoreError;
use crate::ids::{Account, RoleId, Selector, StateId};
use crate::metadata::EntityMetadata;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

/// One state of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub name: StateId,
    #[serde(default)]
    pub next: Vec<StateId>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub functions: Vec<Selector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_function: Option<Selector>,
}

impl StateDefinition {
    pub fn new(name: StateId) -> Self {
        Self {
            name,
            next: Vec::new(),
            roles: Vec::new(),
            functions: Vec::new(),
            pre_function: None,
        }
    }

    pub fn next(mut self, state: StateId) -> Self {
        self.next.push(state);
        self
    }

    pub fn role(mut self, role: RoleId) -> Self {
        self.roles.push(role);
        self
    }

    pub fn function(mut self, selector: Selector) -> Self {
        self.functions.push(selector);
        self
    }

    pub fn pre_function(mut self, selector: Selector) -> Self {
        self.pre_function = Some(selector);
        self
    }
}

/// Administers `role` with `admin` instead of the default admin role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAdminDefinition {
    pub role: RoleId,
    pub admin: RoleId,
}

/// Initial membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDefinition {
    pub role: RoleId,
    pub account: Account,
}

/// Everything needed to construct a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDefinition {
    pub initial: StateId,
    pub states: Vec<StateDefinition>,
    #[serde(default)]
    pub role_admins: Vec<RoleAdminDefinition>,
    #[serde(default)]
    pub grants: Vec<GrantDefinition>,
    /// Roles granted to the owner, in addition to the default admin role.
    #[serde(default)]
    pub owner_roles: Vec<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntityMetadata>,
}

pub const ROLE_ADMIN: RoleId = RoleId::literal("ROLE_ADMIN");
pub const ROLE_MANUFACTURER: RoleId = RoleId::literal("ROLE_MANUFACTURER");

impl MachineDefinition {
    /// Parses and validates a definition from JSON.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        let def: MachineDefinition = serde_json::from_value(json.clone())?;
        def.validate()?;
        Ok(def)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.states.is_empty() {
            return Err(invalid("definition has no states".to_string()));
        }

        let mut names = HashSet::new();
        for state in &self.states {
            if !names.insert(state.name) {
                return Err(invalid(format!("duplicate state '{}'", state.name)));
            }
        }

        if !names.contains(&self.initial) {
            return Err(invalid(format!(
                "initial state '{}' not in states list",
                self.initial
            )));
        }

        for state in &self.states {
            for next in &state.next {
                if !names.contains(next) {
                    return Err(invalid(format!(
                        "next state '{}' of '{}' not in states list",
                        next, state.name
                    )));
                }
            }
            if let Some(dup) = first_duplicate(&state.next) {
                return Err(invalid(format!(
                    "duplicate next state '{}' in '{}'",
                    dup, state.name
                )));
            }
            if let Some(dup) = first_duplicate(&state.roles) {
                return Err(invalid(format!(
                    "duplicate role '{}' in '{}'",
                    dup, state.name
                )));
            }
            if let Some(dup) = first_duplicate(&state.functions) {
                return Err(invalid(format!(
                    "duplicate function '{}' in '{}'",
                    dup, state.name
                )));
            }
        }

        let admined: Vec<RoleId> = self.role_admins.iter().map(|a| a.role).collect();
        if let Some(dup) = first_duplicate(&admined) {
            return Err(invalid(format!("role '{}' has more than one admin", dup)));
        }

        Ok(())
    }

    /// crc32c of the canonical JSON encoding, as 8 hex digits.
    pub fn checksum(&self) -> Result<String, CoreError> {
        let json_bytes = serde_json::to_vec(self)?;
        Ok(format!("{:08x}", crc32c::crc32c(&json_bytes)))
    }

    pub fn state(&self, name: StateId) -> Option<&StateDefinition> {
        self.states.iter().find(|s| s.name == name)
    }

    /// The stock five-state chain.
    ///
    /// `STATE_ONE -> STATE_TWO -> ... -> STATE_FIVE`. Every state is gated by
    /// `ROLE_ADMIN`, which the owner holds.
    pub fn generic() -> Self {
        let ids = [
            StateId::literal("STATE_ONE"),
            StateId::literal("STATE_TWO"),
            StateId::literal("STATE_THREE"),
            StateId::literal("STATE_FOUR"),
            StateId::literal("STATE_FIVE"),
        ];
        let extra_roles = [
            vec![RoleId::literal("ROLE_ONE"), ROLE_MANUFACTURER],
            vec![RoleId::literal("ROLE_TWO")],
            vec![RoleId::literal("ROLE_THREE")],
            vec![RoleId::literal("ROLE_FOUR")],
            vec![],
        ];

        let states = ids
            .iter()
            .zip(extra_roles)
            .enumerate()
            .map(|(i, (&id, roles))| {
                let mut state = StateDefinition::new(id).role(ROLE_ADMIN);
                state.roles.extend(roles);
                if let Some(&next) = ids.get(i + 1) {
                    state = state.next(next);
                }
                state
            })
            .collect();

        Self {
            initial: ids[0],
            states,
            role_admins: Vec::new(),
            grants: Vec::new(),
            owner_roles: vec![ROLE_ADMIN],
            metadata: None,
        }
    }
}

fn invalid(reason: String) -> CoreError {
    CoreError::InvalidDefinition { reason }
}

fn first_duplicate<T: Copy + Eq + Hash>(items: &[T]) -> Option<T> {
    let mut seen = HashSet::new();
    items.iter().copied().find(|item| !seen.insert(*item))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition() -> serde_json::Value {
        serde_json::json!({
            "initial": "created",
            "states": [
                {"name": "created", "next": ["paid"], "roles": ["ROLE_CLERK"]},
                {"name": "paid", "next": ["shipped"], "roles": ["ROLE_CLERK"], "pre_function": "0x11223344"},
                {"name": "shipped"}
            ],
            "role_admins": [{"role": "ROLE_CLERK", "admin": "ROLE_ADMIN"}],
            "grants": [{"role": "ROLE_CLERK", "account": "0x00000000000000000000000000000000000000aa"}]
        })
    }

    #[test]
    fn test_parse_definition() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();

        assert_eq!(def.initial, StateId::literal("created"));
        assert_eq!(def.states.len(), 3);
        assert_eq!(
            def.state(StateId::literal("paid")).unwrap().pre_function,
            Some(Selector::new([0x11, 0x22, 0x33, 0x44]))
        );
        assert!(def.state(StateId::literal("shipped")).unwrap().next.is_empty());
        assert_eq!(def.grants[0].account, Account::new({
            let mut bytes = [0u8; 20];
            bytes[19] = 0xaa;
            bytes
        }));
        assert!(def.owner_roles.is_empty());
    }

    #[test]
    fn test_invalid_initial_state() {
        let json = serde_json::json!({
            "initial": "c",
            "states": [{"name": "a"}, {"name": "b"}]
        });
        let result = MachineDefinition::from_json(&json);
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_unknown_next_state() {
        let json = serde_json::json!({
            "initial": "a",
            "states": [{"name": "a", "next": ["c"]}]
        });
        let result = MachineDefinition::from_json(&json);
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_duplicates_rejected() {
        let dup_state = serde_json::json!({
            "initial": "a",
            "states": [{"name": "a"}, {"name": "a"}]
        });
        assert!(MachineDefinition::from_json(&dup_state).is_err());

        let dup_role = serde_json::json!({
            "initial": "a",
            "states": [{"name": "a", "roles": ["ROLE_X", "ROLE_X"]}]
        });
        assert!(MachineDefinition::from_json(&dup_role).is_err());

        let empty = serde_json::json!({"initial": "a", "states": []});
        assert!(MachineDefinition::from_json(&empty).is_err());
    }

    #[test]
    fn test_checksum_is_stable() {
        let a = MachineDefinition::from_json(&sample_definition()).unwrap();
        let b = MachineDefinition::from_json(&a.to_json().unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());
        assert_eq!(a.checksum().unwrap().len(), 8);
        assert_ne!(
            a.checksum().unwrap(),
            MachineDefinition::generic().checksum().unwrap()
        );
    }

    #[test]
    fn test_generic_template() {
        let def = MachineDefinition::generic();
        def.validate().unwrap();

        let first = def.state(StateId::literal("STATE_ONE")).unwrap();
        assert_eq!(first.next, vec![StateId::literal("STATE_TWO")]);
        assert_eq!(
            first.roles,
            vec![ROLE_ADMIN, RoleId::literal("ROLE_ONE"), ROLE_MANUFACTURER]
        );
        let last = def.state(StateId::literal("STATE_FIVE")).unwrap();
        assert!(last.next.is_empty());
        assert!(def.states.iter().all(|s| s.roles[0] == ROLE_ADMIN));
        assert_eq!(def.owner_roles, vec![ROLE_ADMIN]);
    }
}
