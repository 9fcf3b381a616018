//! Proptest strategies for value-domain elements and well-formed threaded programs.

use proptest::prelude::*;

use crate::domain::{Interval, ValueDomain};
use crate::program::*;

/// Intervals with small finite or infinite bounds, plus bottom.
pub fn arb_interval() -> impl Strategy<Value = Interval> {
    let bound = || proptest::option::of(-20i64..=20);
    prop_oneof![
        1 => Just(Interval::bottom()),
        6 => (bound(), bound()).prop_map(|(lo, hi)| {
            match (lo, hi) {
                (Some(l), Some(h)) if l > h => Interval::from_bounds(Some(h), Some(l)),
                _ => Interval::from_bounds(lo, hi),
            }
        }),
    ]
}

/// One critical section: the mutex index and `(global slot, value)` writes.
type Section = (usize, Vec<(usize, WriteValue)>);

#[derive(Debug, Clone)]
enum WriteValue {
    Const(i64),
    Copy(usize),
    Nondet,
    Increment,
}

fn arb_section(nmutexes: usize) -> impl Strategy<Value = Section> {
    let value = prop_oneof![
        (-3i64..=3).prop_map(WriteValue::Const),
        (0usize..8).prop_map(WriteValue::Copy),
        Just(WriteValue::Nondet),
        Just(WriteValue::Increment),
    ];
    (
        0..nmutexes,
        proptest::collection::vec((0usize..8, value), 0..=3),
    )
}

/// A program respecting the locking discipline.
///
/// Generated programs have:
/// - 1-3 globals with small initial values, each protected by one mutex
/// - 1-3 mutexes
/// - `main` plus 0-2 workers; `main` spawns every worker first
/// - thread bodies made of 1-3 critical sections that only touch globals
///   protected by the held mutex, followed in `main` by one assertion
pub fn arb_threaded_program() -> impl Strategy<Value = ThreadedProgram> {
    (1..=3usize, 1..=3usize, 0..=2usize)
        .prop_flat_map(|(nglobals, nmutexes, nworkers)| {
            let inits = proptest::collection::vec(-2i64..=2, nglobals..=nglobals);
            let owners = proptest::collection::vec(0..nmutexes, nglobals..=nglobals);
            let bodies = proptest::collection::vec(
                proptest::collection::vec(arb_section(nmutexes), 1..=3),
                (nworkers + 1)..=(nworkers + 1),
            );
            (Just(nmutexes), inits, owners, bodies)
        })
        .prop_map(|(nmutexes, inits, owners, bodies)| {
            let mut p = ThreadedProgram::new("generated");
            for (i, init) in inits.iter().enumerate() {
                p.add_global(format!("g{i}"), *init);
            }
            for m in 0..nmutexes {
                let protects: Vec<GlobalId> = owners
                    .iter()
                    .enumerate()
                    .filter(|&(_, &o)| o == m)
                    .map(|(g, _)| g)
                    .collect();
                p.add_mutex(format!("m{m}"), protects);
            }
            let main = p.add_thread("main");
            p.main = main;
            let workers: Vec<ThreadId> = (1..bodies.len())
                .map(|w| p.add_thread(format!("w{w}")))
                .collect();

            let loc = SourceLoc::default();
            for (tid, sections) in bodies.into_iter().enumerate() {
                let mut events = Vec::new();
                if tid == main {
                    events.extend(
                        workers
                            .iter()
                            .map(|&w| Event::new(EventKind::ThreadCreate(w), loc)),
                    );
                }
                let mut last_mutex = 0;
                for (m, writes) in sections {
                    last_mutex = m;
                    let protected: Vec<GlobalId> = p.mutexes[m].protects.iter().copied().collect();
                    events.push(Event::new(EventKind::Lock(m), loc));
                    if !protected.is_empty() {
                        for (slot, value) in writes {
                            let global = protected[slot % protected.len()];
                            let value = match value {
                                WriteValue::Const(c) => Expr::Const(c),
                                WriteValue::Copy(src) => {
                                    let src = protected[src % protected.len()];
                                    events.push(Event::new(EventKind::Read(src), loc));
                                    Expr::Var(Var::Global(src))
                                }
                                WriteValue::Nondet => Expr::Nondet,
                                WriteValue::Increment => {
                                    events.push(Event::new(EventKind::Read(global), loc));
                                    Expr::Add(
                                        Box::new(Expr::Var(Var::Global(global))),
                                        Box::new(Expr::Const(1)),
                                    )
                                }
                            };
                            events.push(Event::new(EventKind::Write { global, value }, loc));
                        }
                    }
                    events.push(Event::new(EventKind::Unlock(m), loc));
                }
                if tid == main {
                    if let Some(&g) = p.mutexes[last_mutex].protects.iter().next() {
                        events.push(Event::new(EventKind::Lock(last_mutex), loc));
                        events.push(Event::new(EventKind::Read(g), loc));
                        events.push(Event::new(
                            EventKind::Assert {
                                predicate: Predicate::Cmp {
                                    lhs: Expr::Var(Var::Global(g)),
                                    op: CmpOp::Eq,
                                    rhs: Expr::Var(Var::Global(g)),
                                },
                                text: format!("g{g} == g{g}"),
                            },
                            loc,
                        ));
                        events.push(Event::new(EventKind::Unlock(last_mutex), loc));
                    }
                }
                p.threads[tid].events = events;
            }
            p.compute_multiplicities();
            p
        })
}
