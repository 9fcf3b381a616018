//! Mutex-meet privatization with mutex clustering.
//!
//! A [`Privatizer`] replays one thread's event script against a snapshot of
//! the protected store. Acquiring a cluster adopts, for every variable
//! cluster, the join of the thread's own view and everybody else's
//! published contributions, then meets the results across variable
//! clusters. Releasing a cluster publishes the thread's view of every
//! variable cluster it wrote. Store mutations are returned as pending
//! updates; the pipeline applies them between rounds.
//!
//! Globals that some thread writes without protection can change under a
//! critical section at any time. Once the replayed thread is concurrent,
//! they are reset to top after every event.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use lockmeet_ir::clustering::{ClusterId, ClusterTable};
use lockmeet_ir::domain::ValueDomain;
use lockmeet_ir::program::{
    EventKind, GlobalId, MutexId, SourceLoc, TaggedEvent, ThreadId, ThreadedProgram, Var,
};

use crate::context::ThreadContext;
use crate::query::check;
use crate::relation::{ClusterLayout, Relation};
use crate::result::{AssertionOutcome, DiagnosticKind, ProtocolDiagnostic};
use crate::store::{ClusterRecord, Contributor, PendingUpdate, ProtectedStore};

/// How the entry thread reads published state before it spawns anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathSensitivity {
    /// While single-threaded, the entry thread ignores published state.
    #[default]
    ThreadFlag,
    /// Every acquisition reads published state.
    Merged,
}

/// Everything one replay produced.
#[derive(Debug, Clone)]
pub struct ReplayOutcome<D> {
    pub thread: ThreadId,
    pub updates: Vec<PendingUpdate<D>>,
    pub assertions: Vec<AssertionOutcome>,
    pub diagnostics: Vec<ProtocolDiagnostic>,
}

pub struct Privatizer<'a, D> {
    program: &'a ThreadedProgram,
    table: &'a ClusterTable,
    layout: &'a ClusterLayout,
    store: &'a ProtectedStore<D>,
    path_sensitivity: PathSensitivity,
    /// `protectors[g]`: mutexes protecting global `g`.
    protectors: Vec<Vec<MutexId>>,
    racy: BTreeSet<GlobalId>,
}

impl<'a, D: ValueDomain> Privatizer<'a, D> {
    pub fn new(
        program: &'a ThreadedProgram,
        table: &'a ClusterTable,
        layout: &'a ClusterLayout,
        store: &'a ProtectedStore<D>,
        path_sensitivity: PathSensitivity,
    ) -> Self {
        Self {
            program,
            table,
            layout,
            store,
            path_sensitivity,
            protectors: (0..program.globals.len())
                .map(|g| program.protecting_mutexes(g))
                .collect(),
            racy: program.racy_globals(),
        }
    }

    /// Replay `thread` from its start to its end.
    pub fn replay(&self, thread: ThreadId) -> ReplayOutcome<D> {
        let mut ctx = if thread == self.program.main {
            ThreadContext::entry(self.program)
        } else {
            ThreadContext::spawned(thread)
        };
        let mut out = ReplayOutcome {
            thread,
            updates: Vec::new(),
            assertions: Vec::new(),
            diagnostics: Vec::new(),
        };
        let mut last = SourceLoc::default();
        for tagged in self.program.tagged_events(thread) {
            last = tagged.event.loc;
            self.step(&mut ctx, tagged, &mut out);
            if ctx.multithreaded {
                for &g in &self.racy {
                    ctx.set_unrelated(Var::Global(g), D::top());
                }
            }
        }
        self.finish(&mut ctx, last, &mut out);
        out
    }

    fn thread_name(&self, thread: ThreadId) -> &str {
        &self.program.threads[thread].name
    }

    fn step(&self, ctx: &mut ThreadContext<D>, tagged: TaggedEvent<'_>, out: &mut ReplayOutcome<D>) {
        let loc = tagged.event.loc;
        match &tagged.event.kind {
            EventKind::Lock(m) => self.lock(ctx, *m),
            EventKind::Unlock(m) => self.unlock(ctx, *m, loc, out),
            EventKind::Read(g) => {
                if !self.protected(ctx, *g) {
                    self.violation(
                        ctx,
                        DiagnosticKind::UnprotectedRead,
                        loc,
                        format!("read of '{}' without holding its lock", self.global_name(*g)),
                        out,
                    );
                    ctx.mark_stale(*g);
                }
            }
            EventKind::Write { global, value } => {
                let g = *global;
                ctx.assign(Var::Global(g), value);
                if self.protected(ctx, g) {
                    if let Some(c) = self.table.owner_of(g) {
                        ctx.mark_written(c, g);
                    }
                } else {
                    self.violation(
                        ctx,
                        DiagnosticKind::UnprotectedWrite,
                        loc,
                        format!("write of '{}' without holding its lock", self.global_name(g)),
                        out,
                    );
                    ctx.set_unrelated(Var::Global(g), D::top());
                    self.poison(ctx.thread, g, out);
                }
            }
            EventKind::Assign { local, value } => ctx.assign(Var::Local(*local), value),
            EventKind::Assert { predicate, text } => {
                let verdict = check(predicate, ctx);
                out.assertions.push(AssertionOutcome {
                    thread: self.thread_name(ctx.thread).to_string(),
                    line: loc.line,
                    column: loc.column,
                    predicate: text.clone(),
                    verdict,
                });
            }
            EventKind::ThreadCreate(child) => ctx.spawn_child(*child),
            EventKind::ThreadJoin(child) => {
                if !ctx.join_child(*child) {
                    out.diagnostics.push(ProtocolDiagnostic::new(
                        DiagnosticKind::JoinUnspawned,
                        Some(self.thread_name(ctx.thread)),
                        Some(loc),
                        format!(
                            "join of thread '{}' which this thread did not spawn",
                            self.thread_name(*child)
                        ),
                    ));
                }
            }
        }
    }

    fn global_name(&self, g: GlobalId) -> &str {
        &self.program.globals[g].name
    }

    /// Some mutex protecting `g` is held.
    fn protected(&self, ctx: &ThreadContext<D>, g: GlobalId) -> bool {
        self.protectors[g].iter().any(|&m| ctx.is_held(m))
    }

    fn violation(
        &self,
        ctx: &mut ThreadContext<D>,
        kind: DiagnosticKind,
        loc: SourceLoc,
        message: String,
        out: &mut ReplayOutcome<D>,
    ) {
        debug!(thread = self.thread_name(ctx.thread), %loc, "{message}");
        ctx.incomplete = true;
        out.diagnostics.push(ProtocolDiagnostic::new(
            kind,
            Some(self.thread_name(ctx.thread)),
            Some(loc),
            message,
        ));
    }

    fn lock(&self, ctx: &mut ThreadContext<D>, m: MutexId) {
        if ctx.push_lock(m) > 1 {
            return;
        }
        for &c in self.table.synced_by(m) {
            if !ctx.cluster_held(c) {
                self.acquire(ctx, c);
            }
        }
    }

    fn acquire(&self, ctx: &mut ThreadContext<D>, c: ClusterId) {
        let unique = self.program.threads[ctx.thread].multiplicity.is_unique();
        let skip_others = self.path_sensitivity == PathSensitivity::ThreadFlag && !ctx.multithreaded;
        let others = (!skip_others).then(|| self.store.read_for(c, ctx.thread, !unique));

        let mut adopted = Relation::top();
        for slot in self.layout.slots_of(c) {
            let own = ctx.restrict(slot);
            let published = others.as_ref().and_then(|r| r.get(slot));
            let value = match (own, published) {
                (Some(mine), Some(theirs)) => mine.join(theirs),
                (Some(mine), None) => mine,
                (None, Some(theirs)) => theirs.clone(),
                (None, None) => Relation::top_over(slot),
            };
            adopted = adopted.meet(&value);
        }
        debug!(
            thread = self.thread_name(ctx.thread),
            cluster = c,
            state = %adopted,
            "acquire"
        );
        ctx.install(self.table.globals_owned_by(c), &adopted);
        ctx.enter_cluster(c);
    }

    fn unlock(
        &self,
        ctx: &mut ThreadContext<D>,
        m: MutexId,
        loc: SourceLoc,
        out: &mut ReplayOutcome<D>,
    ) {
        match ctx.pop_lock(m) {
            None => self.violation(
                ctx,
                DiagnosticKind::UnlockNotHeld,
                loc,
                format!("unlock of '{}' which is not held", self.program.mutexes[m].name),
                out,
            ),
            Some(0) => {
                for &c in self.table.synced_by(m) {
                    let still_held = ctx
                        .held_mutexes()
                        .any(|other| self.table.synced_by(other).contains(&c));
                    if !still_held {
                        self.release(ctx, c, out);
                    }
                }
            }
            Some(_) => {}
        }
    }

    /// Publish the thread's view of every variable cluster touched by a write.
    fn release(&self, ctx: &mut ThreadContext<D>, c: ClusterId, out: &mut ReplayOutcome<D>) {
        let written = ctx.exit_cluster(c);
        if written.is_empty() {
            debug!(thread = self.thread_name(ctx.thread), cluster = c, "release (read-only)");
            return;
        }
        let mut record = ClusterRecord::new();
        for slot in self.layout.slots_of(c) {
            if slot.members().iter().any(|g| written.contains(g)) {
                if let Some(rel) = ctx.restrict(slot) {
                    record.insert(slot.clone(), rel);
                }
            }
        }
        debug!(
            thread = self.thread_name(ctx.thread),
            cluster = c,
            slots = record.len(),
            "release"
        );
        out.updates.push(PendingUpdate {
            cluster: c,
            contributor: Contributor::Thread(ctx.thread),
            record,
        });
    }

    /// An unprotected write may land at any time: publish top for every
    /// variable cluster containing the global.
    fn poison(&self, thread: ThreadId, g: GlobalId, out: &mut ReplayOutcome<D>) {
        let Some(c) = self.table.owner_of(g) else {
            return;
        };
        let mut record = ClusterRecord::new();
        for slot in self.layout.slots_containing(c, g) {
            record.insert(slot.clone(), Relation::top_over(slot));
        }
        out.updates.push(PendingUpdate {
            cluster: c,
            contributor: Contributor::Thread(thread),
            record,
        });
    }

    fn finish(&self, ctx: &mut ThreadContext<D>, loc: SourceLoc, out: &mut ReplayOutcome<D>) {
        let held: Vec<MutexId> = ctx.held_mutexes().collect();
        for m in &held {
            out.diagnostics.push(ProtocolDiagnostic::new(
                DiagnosticKind::HeldAtExit,
                Some(self.thread_name(ctx.thread)),
                Some(loc),
                format!("mutex '{}' still held at thread exit", self.program.mutexes[*m].name),
            ));
        }
        let clusters: Vec<ClusterId> = ctx.held_clusters().collect();
        for c in clusters {
            self.release(ctx, c, out);
        }
    }
}
