//! Thread-local privatization context.

use std::collections::{BTreeMap, BTreeSet};

use lockmeet_ir::clustering::ClusterId;
use lockmeet_ir::domain::ValueDomain;
use lockmeet_ir::program::{Expr, GlobalId, MutexId, ThreadId, ThreadedProgram, Var};

use crate::relation::{Relation, VarCluster};

/// Partition of variables into classes of provably equal values.
/// Variables without a class are only equal to themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EqClasses {
    class_of: BTreeMap<Var, u32>,
    next: u32,
}

impl EqClasses {
    pub fn same(&self, a: Var, b: Var) -> bool {
        a == b
            || matches!(
                (self.class_of.get(&a), self.class_of.get(&b)),
                (Some(x), Some(y)) if x == y
            )
    }

    pub fn kill(&mut self, var: Var) {
        self.class_of.remove(&var);
    }

    /// `target` now holds a copy of `source`.
    pub fn assign_alias(&mut self, target: Var, source: Var) {
        if target == source {
            return;
        }
        self.kill(target);
        let class = self.class_id(source);
        self.class_of.insert(target, class);
    }

    pub fn union(&mut self, a: Var, b: Var) {
        if self.same(a, b) {
            return;
        }
        let keep = self.class_id(a);
        match self.class_of.get(&b).copied() {
            Some(old) => {
                for class in self.class_of.values_mut() {
                    if *class == old {
                        *class = keep;
                    }
                }
            }
            None => {
                self.class_of.insert(b, keep);
            }
        }
    }

    fn class_id(&mut self, var: Var) -> u32 {
        if let Some(&class) = self.class_of.get(&var) {
            return class;
        }
        let class = self.next;
        self.next += 1;
        self.class_of.insert(var, class);
        class
    }
}

/// State of one replayed thread.
#[derive(Debug, Clone)]
pub struct ThreadContext<D> {
    pub thread: ThreadId,
    /// Held mutexes with their re-entrancy depth.
    held: BTreeMap<MutexId, usize>,
    /// Held clusters and the globals written since acquiring them.
    held_clusters: BTreeMap<ClusterId, BTreeSet<GlobalId>>,
    /// Absent globals are unknown to the thread.
    beliefs: BTreeMap<Var, D>,
    /// Globals read outside their protection. Their beliefs are kept for the
    /// next acquisition but evaluate to top until then.
    stale: BTreeSet<GlobalId>,
    eq: EqClasses,
    pub incomplete: bool,
    pub multithreaded: bool,
    live_children: BTreeMap<ThreadId, usize>,
}

impl<D: ValueDomain> ThreadContext<D> {
    /// A spawned thread: no beliefs about globals, already concurrent.
    pub fn spawned(thread: ThreadId) -> Self {
        Self {
            thread,
            held: BTreeMap::new(),
            held_clusters: BTreeMap::new(),
            beliefs: BTreeMap::new(),
            stale: BTreeSet::new(),
            eq: EqClasses::default(),
            incomplete: false,
            multithreaded: true,
            live_children: BTreeMap::new(),
        }
    }

    /// The entry thread: knows every initial value and runs alone until
    /// its first spawn.
    pub fn entry(program: &ThreadedProgram) -> Self {
        let mut ctx = Self::spawned(program.main);
        ctx.multithreaded = false;
        let mut by_value: BTreeMap<i64, GlobalId> = BTreeMap::new();
        for (g, global) in program.globals.iter().enumerate() {
            ctx.beliefs
                .insert(Var::Global(g), D::constant(global.init));
            match by_value.get(&global.init) {
                Some(&first) => ctx.eq.union(Var::Global(first), Var::Global(g)),
                None => {
                    by_value.insert(global.init, g);
                }
            }
        }
        ctx
    }

    pub fn belief(&self, var: Var) -> D {
        if self.is_stale(var) {
            return D::top();
        }
        self.beliefs.get(&var).cloned().unwrap_or_else(D::top)
    }

    fn is_stale(&self, var: Var) -> bool {
        matches!(var, Var::Global(g) if self.stale.contains(&g))
    }

    /// `global` was read without synchronization: the value seen may be
    /// anything until the thread synchronizes with its owner again.
    pub fn mark_stale(&mut self, global: GlobalId) {
        self.eq.kill(Var::Global(global));
        self.stale.insert(global);
    }

    pub fn same(&self, a: Var, b: Var) -> bool {
        a == b || (!self.is_stale(a) && !self.is_stale(b) && self.eq.same(a, b))
    }

    fn refresh(&mut self, target: Var) {
        if let Var::Global(g) = target {
            self.stale.remove(&g);
        }
    }

    pub fn eval(&self, expr: &Expr) -> D {
        match expr {
            Expr::Const(c) => D::constant(*c),
            Expr::Nondet => D::top(),
            Expr::Var(v) => self.belief(*v),
            Expr::Add(l, r) => self.eval(l).add(&self.eval(r)),
            Expr::Sub(l, r) => self.eval(l).sub(&self.eval(r)),
        }
    }

    /// `target = expr`; a plain variable copy records the equality.
    pub fn assign(&mut self, target: Var, expr: &Expr) {
        let value = self.eval(expr);
        self.refresh(target);
        match expr {
            Expr::Var(source) => self.eq.assign_alias(target, *source),
            _ => self.eq.kill(target),
        }
        self.beliefs.insert(target, value);
    }

    /// Overwrite `target` with `value`, dropping its equalities.
    pub fn set_unrelated(&mut self, target: Var, value: D) {
        self.refresh(target);
        self.eq.kill(target);
        self.beliefs.insert(target, value);
    }

    pub fn is_held(&self, mutex: MutexId) -> bool {
        self.held.contains_key(&mutex)
    }

    pub fn held_mutexes(&self) -> impl Iterator<Item = MutexId> + '_ {
        self.held.keys().copied()
    }

    /// Increment the depth of `mutex`; returns the new depth.
    pub fn push_lock(&mut self, mutex: MutexId) -> usize {
        let depth = self.held.entry(mutex).or_insert(0);
        *depth += 1;
        *depth
    }

    /// Decrement the depth of `mutex`; `None` if it was not held, otherwise
    /// the remaining depth (0 = released).
    pub fn pop_lock(&mut self, mutex: MutexId) -> Option<usize> {
        let depth = self.held.get_mut(&mutex)?;
        *depth -= 1;
        let left = *depth;
        if left == 0 {
            self.held.remove(&mutex);
        }
        Some(left)
    }

    pub fn cluster_held(&self, cluster: ClusterId) -> bool {
        self.held_clusters.contains_key(&cluster)
    }

    pub fn held_clusters(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.held_clusters.keys().copied()
    }

    pub fn enter_cluster(&mut self, cluster: ClusterId) {
        self.held_clusters.insert(cluster, BTreeSet::new());
    }

    /// Leave `cluster`, returning the globals written inside it.
    pub fn exit_cluster(&mut self, cluster: ClusterId) -> BTreeSet<GlobalId> {
        self.held_clusters.remove(&cluster).unwrap_or_default()
    }

    pub fn mark_written(&mut self, cluster: ClusterId, global: GlobalId) {
        if let Some(written) = self.held_clusters.get_mut(&cluster) {
            written.insert(global);
        }
    }

    /// The thread's own view of `slot`, or `None` if it lacks a belief for
    /// some member.
    pub fn restrict(&self, slot: &VarCluster) -> Option<Relation<D>> {
        let values = slot
            .members()
            .iter()
            .map(|&g| self.beliefs.get(&Var::Global(g)).map(|v| (g, v.clone())))
            .collect::<Option<Vec<_>>>()?;
        let equal = slot
            .pairs()
            .filter(|&(a, b)| self.eq.same(Var::Global(a), Var::Global(b)));
        Some(Relation::new(values, equal))
    }

    /// Replace every belief about `globals` with `adopted`.
    pub fn install<'g>(
        &mut self,
        globals: impl IntoIterator<Item = &'g GlobalId>,
        adopted: &Relation<D>,
    ) {
        let globals: Vec<GlobalId> = globals.into_iter().copied().collect();
        for &g in &globals {
            self.stale.remove(&g);
            self.eq.kill(Var::Global(g));
            self.beliefs.insert(Var::Global(g), adopted.value(g));
        }
        for &(a, b) in adopted.equalities() {
            if globals.contains(&a) && globals.contains(&b) {
                self.eq.union(Var::Global(a), Var::Global(b));
            }
        }
    }

    pub fn spawn_child(&mut self, child: ThreadId) {
        self.multithreaded = true;
        *self.live_children.entry(child).or_insert(0) += 1;
    }

    /// Returns `false` when no live child `child` exists.
    pub fn join_child(&mut self, child: ThreadId) -> bool {
        match self.live_children.get_mut(&child) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    self.live_children.remove(&child);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockmeet_ir::domain::Interval;

    const G: Var = Var::Global(0);
    const H: Var = Var::Global(1);
    const X: Var = Var::Local(0);

    #[test]
    fn eq_classes_alias_and_kill() {
        let mut eq = EqClasses::default();
        eq.assign_alias(X, H);
        eq.assign_alias(G, X);
        assert!(eq.same(G, H));
        eq.kill(H);
        assert!(!eq.same(G, H));
        assert!(eq.same(G, X));
        eq.union(H, G);
        assert!(eq.same(H, X));
    }

    #[test]
    fn assignment_tracks_values_and_aliases() {
        let mut ctx: ThreadContext<Interval> = ThreadContext::spawned(1);
        ctx.assign(X, &Expr::Const(4));
        ctx.assign(G, &Expr::Var(X));
        assert!(ctx.same(G, X));
        assert_eq!(ctx.belief(G), Interval::constant(4));
        ctx.assign(X, &Expr::Add(Box::new(Expr::Var(X)), Box::new(Expr::Const(1))));
        assert!(!ctx.same(G, X));
        assert_eq!(ctx.belief(X), Interval::constant(5));
        assert!(ctx.belief(H).is_top());
    }

    #[test]
    fn stale_reads_are_top_but_keep_the_belief() {
        let mut ctx: ThreadContext<Interval> = ThreadContext::spawned(0);
        ctx.assign(G, &Expr::Const(5));
        ctx.assign(H, &Expr::Var(G));
        ctx.mark_stale(0);
        assert!(ctx.belief(G).is_top());
        assert!(!ctx.same(G, H));
        ctx.assign(X, &Expr::Var(G));
        assert!(!ctx.same(G, X));
        assert!(ctx.belief(X).is_top());

        let g = VarCluster::new(vec![0]);
        assert_eq!(ctx.restrict(&g).unwrap().value(0), Interval::constant(5));

        let adopted = Relation::new([(0, Interval::new(5, 6))], []);
        ctx.install(&[0], &adopted);
        assert_eq!(ctx.belief(G), Interval::new(5, 6));
    }

    #[test]
    fn lock_depth_is_reentrant() {
        let mut ctx: ThreadContext<Interval> = ThreadContext::spawned(0);
        assert_eq!(ctx.push_lock(2), 1);
        assert_eq!(ctx.push_lock(2), 2);
        assert_eq!(ctx.pop_lock(2), Some(1));
        assert!(ctx.is_held(2));
        assert_eq!(ctx.pop_lock(2), Some(0));
        assert!(!ctx.is_held(2));
        assert_eq!(ctx.pop_lock(2), None);
    }

    #[test]
    fn restrict_requires_every_member() {
        let mut ctx: ThreadContext<Interval> = ThreadContext::spawned(0);
        ctx.assign(G, &Expr::Const(1));
        let gh = VarCluster::new(vec![0, 1]);
        assert!(ctx.restrict(&gh).is_none());
        ctx.assign(H, &Expr::Var(G));
        let rel = ctx.restrict(&gh).unwrap();
        assert!(rel.are_equal(0, 1));
        assert_eq!(rel.value(1), Interval::constant(1));
    }

    #[test]
    fn install_replaces_beliefs_and_equalities() {
        let mut ctx: ThreadContext<Interval> = ThreadContext::spawned(0);
        ctx.assign(G, &Expr::Const(1));
        ctx.assign(X, &Expr::Var(G));
        let adopted = Relation::new(
            [(0, Interval::new(0, 9)), (1, Interval::new(0, 9))],
            [(0, 1)],
        );
        ctx.install(&[0, 1], &adopted);
        assert!(!ctx.same(G, X));
        assert!(ctx.same(G, H));
        assert_eq!(ctx.belief(G), Interval::new(0, 9));
    }

    #[test]
    fn entry_context_knows_initial_values() {
        let mut p = ThreadedProgram::new("p");
        p.add_global("g", 0);
        p.add_global("h", 0);
        p.add_global("k", 2);
        p.add_thread("main");
        let ctx: ThreadContext<Interval> = ThreadContext::entry(&p);
        assert!(!ctx.multithreaded);
        assert!(ctx.same(G, H));
        assert!(!ctx.same(G, Var::Global(2)));
        assert_eq!(ctx.belief(Var::Global(2)), Interval::constant(2));
    }

    #[test]
    fn children_are_counted() {
        let mut ctx: ThreadContext<Interval> = ThreadContext::spawned(0);
        ctx.spawn_child(3);
        assert!(ctx.join_child(3));
        assert!(!ctx.join_child(3));
    }
}
