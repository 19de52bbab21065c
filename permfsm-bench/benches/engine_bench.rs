//! State machine engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use permfsm_core::definition::ROLE_ADMIN;
use permfsm_core::{Account, MachineDefinition, StateDefinition, StateId, StateMachine};
use permfsm_journal::{FsyncPolicy, Journal, JournalConfig};
use std::sync::Arc;
use tempfile::TempDir;

const PING: StateId = StateId::literal("PING");
const PONG: StateId = StateId::literal("PONG");

fn owner() -> Account {
    Account::repeat_byte(0x42)
}

/// Two states pointing at each other, so transitions never run out.
fn ping_pong() -> MachineDefinition {
    MachineDefinition {
        initial: PING,
        states: vec![
            StateDefinition::new(PING).next(PONG).role(ROLE_ADMIN),
            StateDefinition::new(PONG).next(PING).role(ROLE_ADMIN),
        ],
        role_admins: Vec::new(),
        grants: Vec::new(),
        owner_roles: vec![ROLE_ADMIN],
        metadata: None,
    }
}

/// A linear chain of `n` states.
fn chain(n: usize) -> MachineDefinition {
    let ids: Vec<StateId> = (0..n)
        .map(|i| StateId::encode(&format!("state_{}", i)).unwrap())
        .collect();
    let states = ids
        .iter()
        .enumerate()
        .map(|(i, &id)| {
            let state = StateDefinition::new(id).role(ROLE_ADMIN);
            match ids.get(i + 1) {
                Some(&next) => state.next(next),
                None => state,
            }
        })
        .collect();
    MachineDefinition {
        initial: ids[0],
        states,
        role_admins: Vec::new(),
        grants: Vec::new(),
        owner_roles: vec![ROLE_ADMIN],
        metadata: None,
    }
}

fn target(machine: &StateMachine) -> StateId {
    if machine.get_current_state() == PING {
        PONG
    } else {
        PING
    }
}

fn bench_from_definition(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_from_definition");

    for size in [5, 20, 100] {
        let def = chain(size);
        group.bench_with_input(BenchmarkId::new("chain", size), &def, |b, def| {
            b.iter(|| black_box(StateMachine::from_definition(owner(), def).unwrap()));
        });
    }

    group.finish();
}

fn bench_transition(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_transition");
    group.throughput(Throughput::Elements(1));

    group.bench_function("in_memory", |b| {
        let mut machine = StateMachine::from_definition(owner(), &ping_pong()).unwrap();
        b.iter(|| {
            let to = target(&machine);
            black_box(machine.transition_state(owner(), to, ROLE_ADMIN).unwrap())
        });
    });

    group.bench_function("journaled_no_fsync", |b| {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(
            Journal::open(JournalConfig::new(dir.path()).with_fsync_policy(FsyncPolicy::Never))
                .unwrap(),
        );
        let mut machine = StateMachine::create(owner(), &ping_pong(), journal).unwrap();
        b.iter(|| {
            let to = target(&machine);
            black_box(machine.transition_state(owner(), to, ROLE_ADMIN).unwrap())
        });
    });

    group.bench_function("rejected", |b| {
        let mut machine = StateMachine::from_definition(owner(), &ping_pong()).unwrap();
        let stranger = Account::repeat_byte(0x99);
        b.iter(|| {
            let to = target(&machine);
            black_box(machine.transition_state(stranger, to, ROLE_ADMIN).is_err())
        });
    });

    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_replay");

    for transitions in [100, 1000] {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig::new(dir.path()).with_fsync_policy(FsyncPolicy::Never);
        {
            let journal = Arc::new(Journal::open(config.clone()).unwrap());
            let mut machine = StateMachine::create(owner(), &ping_pong(), journal).unwrap();
            for _ in 0..transitions {
                let to = target(&machine);
                machine.transition_state(owner(), to, ROLE_ADMIN).unwrap();
            }
        }

        group.throughput(Throughput::Elements(transitions));
        group.bench_with_input(
            BenchmarkId::new("transitions", transitions),
            &config,
            |b, config| {
                b.iter(|| {
                    let journal = Arc::new(Journal::open(config.clone()).unwrap());
                    black_box(StateMachine::open(journal).unwrap())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_from_definition,
    bench_transition,
    bench_replay
);
criterion_main!(benches);
