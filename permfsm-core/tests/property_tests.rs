//! Property-based tests for transitions and role administration.

use permfsm_core::definition::{ROLE_ADMIN, ROLE_MANUFACTURER};
use permfsm_core::{Account, CoreError, MachineDefinition, RoleId, StateId, StateMachine};
use proptest::prelude::*;

const STATES: [&str; 6] = [
    "STATE_ONE",
    "STATE_TWO",
    "STATE_THREE",
    "STATE_FOUR",
    "STATE_FIVE",
    "STATE_UNKNOWN",
];

fn role(index: u8) -> RoleId {
    match index {
        0 => ROLE_ADMIN,
        1 => RoleId::literal("ROLE_ONE"),
        2 => ROLE_MANUFACTURER,
        _ => RoleId::literal("ROLE_TWO"),
    }
}

fn account(index: u8) -> Account {
    Account::repeat_byte(index + 1)
}

/// Owner holds ROLE_ADMIN, account 1 holds ROLE_ONE and ROLE_TWO, account 2 nothing.
fn machine() -> StateMachine {
    let owner = account(0);
    let mut m = StateMachine::from_definition(owner, &MachineDefinition::generic()).unwrap();
    m.grant_role(owner, RoleId::literal("ROLE_ONE"), account(1))
        .unwrap();
    m.grant_role(owner, RoleId::literal("ROLE_TWO"), account(1))
        .unwrap();
    m
}

prop_compose! {
    fn arbitrary_request()(target in 0..6usize, role in 0..4u8, actor in 0..3u8)
        -> (StateId, RoleId, Account) {
        (StateId::literal(STATES[target]), self::role(role), account(actor))
    }
}

proptest! {
    #[test]
    fn transition_succeeds_only_when_fully_authorized(
        requests in prop::collection::vec(arbitrary_request(), 1..40)
    ) {
        let mut m = machine();
        let mut committed = Vec::new();

        for (to_state, role, actor) in requests {
            let current = m.get_current_state();
            let state = m.get_state(current).unwrap().clone();
            let expected = state.next_states.contains(&to_state)
                && state.allowed_roles.contains(&role)
                && m.has_role(role, actor);
            let length_before = m.get_history_length();

            match m.transition_state(actor, to_state, role) {
                Ok(record) => {
                    prop_assert!(expected);
                    prop_assert_eq!(record.from_state, current);
                    prop_assert_eq!(m.get_current_state(), to_state);
                    committed.push((current, to_state));
                }
                Err(e) => {
                    prop_assert!(!expected);
                    let is_rejection = matches!(
                        e,
                        CoreError::IllegalTransition { .. } | CoreError::Unauthorized { .. }
                    );
                    prop_assert!(is_rejection);
                    prop_assert_eq!(m.get_current_state(), current);
                    prop_assert_eq!(m.get_history_length(), length_before);
                }
            }
        }

        prop_assert_eq!(m.get_history_length(), committed.len() as u64);
        for (i, (from, to)) in committed.iter().enumerate() {
            let record = m.get_history(i as u64).unwrap();
            prop_assert_eq!(record.from_state, *from);
            prop_assert_eq!(record.to_state, *to);
        }
        let out_of_range = m.get_history(committed.len() as u64);
        prop_assert!(
            matches!(out_of_range, Err(CoreError::OutOfRange { .. })),
            "expected OutOfRange"
        );
    }

    #[test]
    fn unauthorized_grants_leave_membership_unchanged(
        granter in 1..3u8,
        target in 0..3u8,
        role_index in 0..4u8,
    ) {
        let mut m = machine();
        let role = role(role_index);
        let target = account(target);
        let before = m.has_role(role, target);

        let result = m.grant_role(account(granter), role, target);
        prop_assert!(result.is_err());
        prop_assert!(result.unwrap_err().is_unauthorized());
        prop_assert_eq!(m.has_role(role, target), before);

        let result = m.revoke_role(account(granter), role, target);
        prop_assert!(result.is_err());
        prop_assert_eq!(m.has_role(role, target), before);
    }

    #[test]
    fn repeated_edges_are_stored_once(times in 1..5usize) {
        let mut m = machine();
        let owner = account(0);
        let one = StateId::literal("STATE_ONE");
        let three = StateId::literal("STATE_THREE");

        for _ in 0..times {
            m.add_next_state_for_state(owner, one, three).unwrap();
        }
        let next = &m.get_state(one).unwrap().next_states;
        prop_assert_eq!(next.iter().filter(|&&s| s == three).count(), 1);
        prop_assert_eq!(next.len(), 2);
    }
}
