use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A unique identifier for a global variable.
pub type GlobalId = usize;
/// A unique identifier for a mutex.
pub type MutexId = usize;
/// A unique identifier for a thread.
pub type ThreadId = usize;
/// A unique identifier for a thread-local variable (scoped to its thread).
pub type LocalId = usize;

/// A variable visible to a thread: a shared global or one of its locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Var {
    Global(GlobalId),
    Local(LocalId),
}

/// Source position of an event, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SourceLoc {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub name: String,
    pub init: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexInfo {
    pub name: String,
    /// Globals this mutex protects (every access to them holds it).
    pub protects: BTreeSet<GlobalId>,
}

/// How many instances of a thread may exist in one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    #[default]
    Never,
    Once,
    Many,
}

impl Multiplicity {
    pub fn saturating_add(self, other: Multiplicity) -> Multiplicity {
        match (self, other) {
            (Multiplicity::Never, m) | (m, Multiplicity::Never) => m,
            _ => Multiplicity::Many,
        }
    }

    /// A thread is unique when at most one instance of it can run.
    pub fn is_unique(self) -> bool {
        self != Multiplicity::Many
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub name: String,
    pub locals: Vec<String>,
    pub events: Vec<Event>,
    pub multiplicity: Multiplicity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The operator with operands swapped (`a < b` iff `b > a`).
    pub fn flip(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    /// Truth of `x op x`.
    pub fn reflexive(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Le | CmpOp::Ge)
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// Value transfer of a write or local assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(i64),
    Nondet,
    Var(Var),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Globals read when evaluating this expression, in order, deduplicated.
    pub fn globals_read(&self) -> Vec<GlobalId> {
        let mut out = Vec::new();
        self.collect_globals(&mut out);
        out
    }

    fn collect_globals(&self, out: &mut Vec<GlobalId>) {
        match self {
            Expr::Const(_) | Expr::Nondet | Expr::Var(Var::Local(_)) => {}
            Expr::Var(Var::Global(g)) => {
                if !out.contains(g) {
                    out.push(*g);
                }
            }
            Expr::Add(l, r) | Expr::Sub(l, r) => {
                l.collect_globals(out);
                r.collect_globals(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Cmp { lhs: Expr, op: CmpOp, rhs: Expr },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn globals_read(&self) -> Vec<GlobalId> {
        let mut out = Vec::new();
        self.collect_globals(&mut out);
        out
    }

    fn collect_globals(&self, out: &mut Vec<GlobalId>) {
        match self {
            Predicate::Cmp { lhs, rhs, .. } => {
                for g in lhs.globals_read().into_iter().chain(rhs.globals_read()) {
                    if !out.contains(&g) {
                        out.push(g);
                    }
                }
            }
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect_globals(out);
                r.collect_globals(out);
            }
            Predicate::Not(inner) => inner.collect_globals(out),
        }
    }
}

/// One event of a thread's straight-line script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Lock(MutexId),
    Unlock(MutexId),
    Read(GlobalId),
    Write { global: GlobalId, value: Expr },
    Assign { local: LocalId, value: Expr },
    Assert { predicate: Predicate, text: String },
    ThreadCreate(ThreadId),
    ThreadJoin(ThreadId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub loc: SourceLoc,
}

impl Event {
    pub fn new(kind: EventKind, loc: SourceLoc) -> Self {
        Self { kind, loc }
    }
}

/// An event tagged with the thread that performs it.
#[derive(Debug, Clone, Copy)]
pub struct TaggedEvent<'a> {
    pub thread: ThreadId,
    pub event: &'a Event,
}

/// A multi-threaded program: globals, mutexes with their protection
/// relation, and one event script per thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadedProgram {
    pub name: String,
    pub globals: Vec<Global>,
    pub mutexes: Vec<MutexInfo>,
    pub threads: Vec<Thread>,
    pub main: ThreadId,
    /// Raw `analysis { }` options in declaration order.
    pub analysis: IndexMap<String, String>,
}

impl ThreadedProgram {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            globals: Vec::new(),
            mutexes: Vec::new(),
            threads: Vec::new(),
            main: 0,
            analysis: IndexMap::new(),
        }
    }

    pub fn add_global(&mut self, name: impl Into<String>, init: i64) -> GlobalId {
        self.globals.push(Global {
            name: name.into(),
            init,
        });
        self.globals.len() - 1
    }

    pub fn add_mutex(
        &mut self,
        name: impl Into<String>,
        protects: impl IntoIterator<Item = GlobalId>,
    ) -> MutexId {
        self.mutexes.push(MutexInfo {
            name: name.into(),
            protects: protects.into_iter().collect(),
        });
        self.mutexes.len() - 1
    }

    pub fn add_thread(&mut self, name: impl Into<String>) -> ThreadId {
        self.threads.push(Thread {
            name: name.into(),
            locals: Vec::new(),
            events: Vec::new(),
            multiplicity: Multiplicity::Never,
        });
        self.threads.len() - 1
    }

    pub fn global_id(&self, name: &str) -> Option<GlobalId> {
        self.globals.iter().position(|g| g.name == name)
    }

    pub fn mutex_id(&self, name: &str) -> Option<MutexId> {
        self.mutexes.iter().position(|m| m.name == name)
    }

    pub fn thread_id(&self, name: &str) -> Option<ThreadId> {
        self.threads.iter().position(|t| t.name == name)
    }

    /// Mutexes protecting `global`, in declaration order.
    pub fn protecting_mutexes(&self, global: GlobalId) -> Vec<MutexId> {
        self.mutexes
            .iter()
            .enumerate()
            .filter(|(_, m)| m.protects.contains(&global))
            .map(|(id, _)| id)
            .collect()
    }

    /// The events of `thread`, tagged with its id.
    pub fn tagged_events(&self, thread: ThreadId) -> impl Iterator<Item = TaggedEvent<'_>> {
        self.threads[thread]
            .events
            .iter()
            .map(move |event| TaggedEvent { thread, event })
    }

    /// Threads that can run in some execution (main and everything it
    /// transitively spawns).
    pub fn reachable_threads(&self) -> Vec<ThreadId> {
        (0..self.threads.len())
            .filter(|&t| self.threads[t].multiplicity != Multiplicity::Never)
            .collect()
    }

    /// Globals some reachable thread writes while holding none of their
    /// protecting mutexes. Writes by `main` before its first spawn are
    /// excluded: nothing else runs yet.
    pub fn racy_globals(&self) -> BTreeSet<GlobalId> {
        let mut racy = BTreeSet::new();
        for t in self.reachable_threads() {
            let mut held: BTreeMap<MutexId, usize> = BTreeMap::new();
            let mut concurrent = t != self.main;
            for event in &self.threads[t].events {
                match &event.kind {
                    EventKind::Lock(m) => *held.entry(*m).or_insert(0) += 1,
                    EventKind::Unlock(m) => {
                        if let Some(depth) = held.get_mut(m) {
                            *depth -= 1;
                            if *depth == 0 {
                                held.remove(m);
                            }
                        }
                    }
                    EventKind::ThreadCreate(_) => concurrent = true,
                    EventKind::Write { global, .. } if concurrent => {
                        let protected = self.mutexes.iter().enumerate().any(|(m, info)| {
                            info.protects.contains(global) && held.contains_key(&m)
                        });
                        if !protected {
                            racy.insert(*global);
                        }
                    }
                    _ => {}
                }
            }
        }
        racy
    }

    /// Recompute spawn multiplicities from the spawn sites.
    ///
    /// `main` runs once. Every other thread runs as many times as it is
    /// spawned, summed over spawn sites weighted by the spawner's own
    /// multiplicity and saturating at `Many` (spawn cycles saturate too).
    pub fn compute_multiplicities(&mut self) {
        let n = self.threads.len();
        let mut counts = vec![Multiplicity::Never; n];
        if n == 0 {
            return;
        }
        counts[self.main] = Multiplicity::Once;

        for _ in 0..(2 * n + 2) {
            let mut next = vec![Multiplicity::Never; n];
            next[self.main] = Multiplicity::Once;
            for (parent, thread) in self.threads.iter().enumerate() {
                if counts[parent] == Multiplicity::Never {
                    continue;
                }
                for event in &thread.events {
                    if let EventKind::ThreadCreate(child) = event.kind {
                        next[child] = next[child].saturating_add(counts[parent]);
                    }
                }
            }
            if next == counts {
                break;
            }
            counts = next;
        }

        for (thread, count) in self.threads.iter_mut().zip(counts) {
            thread.multiplicity = count;
        }
    }
}
