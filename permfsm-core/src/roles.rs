//! Role membership and the admin hierarchy.
//!
//! Every role has exactly one admin role; holders of the admin role may grant
//! and revoke the role. Roles without an explicit admin are administered by
//! [`RoleId::DEFAULT_ADMIN`], which administers itself.

use crate::error::{CoreError, Denial};
use crate::event::MachineEvent;
use crate::ids::{Account, RoleId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
struct RoleData {
    members: HashSet<Account>,
    admin: Option<RoleId>,
}

/// Hierarchical role membership store.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: HashMap<RoleId, RoleData>,
    /// Every role the registry has seen, in first-seen order.
    known: Vec<RoleId>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_role(&self, role: RoleId, account: Account) -> bool {
        self.roles
            .get(&role)
            .is_some_and(|data| data.members.contains(&account))
    }

    pub fn role_admin(&self, role: RoleId) -> RoleId {
        self.roles
            .get(&role)
            .and_then(|data| data.admin)
            .unwrap_or(RoleId::DEFAULT_ADMIN)
    }

    /// Fails with `Unauthorized` unless `account` holds `role`.
    pub fn check_role(&self, role: RoleId, account: Account) -> Result<(), CoreError> {
        if self.has_role(role, account) {
            Ok(())
        } else {
            Err(CoreError::unauthorized(account, Denial::MissingRole(role)))
        }
    }

    /// Fails with `Unauthorized` unless `caller` may grant and revoke `role`.
    pub fn check_admin(&self, role: RoleId, caller: Account) -> Result<(), CoreError> {
        self.check_role(self.role_admin(role), caller)
    }

    /// True if `account` holds at least one of `roles`.
    pub fn holds_any(&self, roles: &[RoleId], account: Account) -> bool {
        roles.iter().any(|&role| self.has_role(role, account))
    }

    /// Members of `role`, sorted.
    pub fn members(&self, role: RoleId) -> Vec<Account> {
        let mut members: Vec<Account> = self
            .roles
            .get(&role)
            .map(|data| data.members.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Every role seen so far, in first-seen order.
    pub fn roles(&self) -> &[RoleId] {
        &self.known
    }

    /// Records that `role` exists without granting it to anyone.
    pub(crate) fn note(&mut self, role: RoleId) {
        self.entry(role);
    }

    fn entry(&mut self, role: RoleId) -> &mut RoleData {
        if !self.roles.contains_key(&role) {
            self.known.push(role);
        }
        self.roles.entry(role).or_default()
    }

    /// Adds `account` to `role`. Returns the event if membership changed.
    pub(crate) fn grant(
        &mut self,
        role: RoleId,
        account: Account,
        sender: Account,
    ) -> Option<MachineEvent> {
        if self.entry(role).members.insert(account) {
            tracing::debug!(%role, %account, %sender, "role granted");
            Some(MachineEvent::RoleGranted {
                role,
                account,
                sender,
            })
        } else {
            None
        }
    }

    /// Removes `account` from `role`. Returns the event if membership changed.
    pub(crate) fn revoke(
        &mut self,
        role: RoleId,
        account: Account,
        sender: Account,
    ) -> Option<MachineEvent> {
        let removed = self
            .roles
            .get_mut(&role)
            .is_some_and(|data| data.members.remove(&account));
        if removed {
            tracing::debug!(%role, %account, %sender, "role revoked");
            Some(MachineEvent::RoleRevoked {
                role,
                account,
                sender,
            })
        } else {
            None
        }
    }

    pub(crate) fn set_role_admin(&mut self, role: RoleId, admin: RoleId) -> MachineEvent {
        let previous_admin = self.role_admin(role);
        self.note(admin);
        self.entry(role).admin = Some(admin);
        MachineEvent::RoleAdminChanged {
            role,
            previous_admin,
            new_admin: admin,
        }
    }
}
