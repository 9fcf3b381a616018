//! Relational abstract state over small groups of protected globals.
//!
//! A [`Relation`] constrains a set of globals with one domain value per
//! variable plus the pairs known to be equal. Variables without an entry are
//! unconstrained. A relation with any bottom value describes no state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use lockmeet_ir::clustering::{ClusterId, ClusterTable};
use lockmeet_ir::domain::ValueDomain;
use lockmeet_ir::program::GlobalId;

/// A non-empty, sorted set of globals owned by one mutex cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarCluster(Vec<GlobalId>);

impl VarCluster {
    pub fn new(mut members: Vec<GlobalId>) -> Self {
        members.sort_unstable();
        members.dedup();
        Self(members)
    }

    pub fn members(&self) -> &[GlobalId] {
        &self.0
    }

    pub fn contains(&self, global: GlobalId) -> bool {
        self.0.binary_search(&global).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Member pairs `(a, b)` with `a < b`.
    pub fn pairs(&self) -> impl Iterator<Item = (GlobalId, GlobalId)> + '_ {
        self.0
            .iter()
            .enumerate()
            .flat_map(move |(i, &a)| self.0[i + 1..].iter().map(move |&b| (a, b)))
    }
}

/// Variable clusters tracked per mutex cluster: every subset of the owned
/// globals with at most `width` members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLayout {
    slots: Vec<Vec<VarCluster>>,
}

impl ClusterLayout {
    pub fn new(table: &ClusterTable, width: usize) -> Self {
        let slots = (0..table.len())
            .map(|c| {
                let globals: Vec<GlobalId> = table.globals_owned_by(c).iter().copied().collect();
                let mut out = Vec::new();
                for size in 1..=width.min(globals.len()) {
                    combinations(&globals, size, 0, &mut Vec::new(), &mut out);
                }
                out
            })
            .collect();
        Self { slots }
    }

    pub fn slots_of(&self, cluster: ClusterId) -> &[VarCluster] {
        &self.slots[cluster]
    }

    pub fn slots_containing(
        &self,
        cluster: ClusterId,
        global: GlobalId,
    ) -> impl Iterator<Item = &VarCluster> + '_ {
        self.slots[cluster]
            .iter()
            .filter(move |k| k.contains(global))
    }

    /// Total number of slots across all clusters.
    pub fn slot_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

fn combinations(
    items: &[GlobalId],
    size: usize,
    start: usize,
    current: &mut Vec<GlobalId>,
    out: &mut Vec<VarCluster>,
) {
    if current.len() == size {
        out.push(VarCluster(current.clone()));
        return;
    }
    for i in start..items.len() {
        current.push(items[i]);
        combinations(items, size, i + 1, current, out);
        current.pop();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation<D> {
    values: BTreeMap<GlobalId, D>,
    /// Equal pairs `(a, b)` with `a < b`, transitively closed.
    equal: BTreeSet<(GlobalId, GlobalId)>,
}

impl<D: ValueDomain> Default for Relation<D> {
    fn default() -> Self {
        Self::top()
    }
}

impl<D: ValueDomain> Relation<D> {
    /// The unconstrained relation.
    pub fn top() -> Self {
        Self {
            values: BTreeMap::new(),
            equal: BTreeSet::new(),
        }
    }

    /// Every member of `cluster` at top, no equalities.
    pub fn top_over(cluster: &VarCluster) -> Self {
        Self {
            values: cluster.members().iter().map(|&g| (g, D::top())).collect(),
            equal: BTreeSet::new(),
        }
    }

    pub fn new(
        values: impl IntoIterator<Item = (GlobalId, D)>,
        equal: impl IntoIterator<Item = (GlobalId, GlobalId)>,
    ) -> Self {
        let mut rel = Self {
            values: values.into_iter().collect(),
            equal: equal
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect(),
        };
        rel.close();
        rel.reduce();
        rel.normalize();
        rel
    }

    pub fn is_bottom(&self) -> bool {
        self.values.values().any(|v| v.is_bottom())
    }

    /// Value of `global`; top when unconstrained.
    pub fn value(&self, global: GlobalId) -> D {
        self.values.get(&global).cloned().unwrap_or_else(D::top)
    }

    pub fn values(&self) -> &BTreeMap<GlobalId, D> {
        &self.values
    }

    pub fn are_equal(&self, a: GlobalId, b: GlobalId) -> bool {
        a == b || self.equal.contains(&(a.min(b), a.max(b)))
    }

    pub fn equalities(&self) -> &BTreeSet<(GlobalId, GlobalId)> {
        &self.equal
    }

    /// Least upper bound: pointwise join, common equalities only.
    pub fn join(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        let values = self
            .values
            .iter()
            .filter_map(|(g, v)| other.values.get(g).map(|w| (*g, v.join(w))))
            .collect();
        let equal = self.equal.intersection(&other.equal).copied().collect();
        Self { values, equal }
    }

    /// Widening of `self` (old) by `other` (new). Equalities only shrink,
    /// so the pointwise value widening alone bounds ascending chains.
    pub fn widen(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        let values = self
            .values
            .iter()
            .filter_map(|(g, v)| other.values.get(g).map(|w| (*g, v.widen(w))))
            .collect();
        let equal = self.equal.intersection(&other.equal).copied().collect();
        Self { values, equal }
    }

    /// Greatest lower bound: pointwise meet, union of equalities, then
    /// closure and reduction of equal variables.
    pub fn meet(&self, other: &Self) -> Self {
        let mut values = self.values.clone();
        for (g, w) in &other.values {
            let merged = match values.get(g) {
                Some(v) => v.meet(w),
                None => w.clone(),
            };
            values.insert(*g, merged);
        }
        let mut rel = Self {
            values,
            equal: self.equal.union(&other.equal).copied().collect(),
        };
        rel.close();
        rel.reduce();
        rel.normalize();
        rel
    }

    pub fn leq(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        if other.is_bottom() {
            return false;
        }
        other
            .values
            .iter()
            .all(|(g, w)| self.value(*g).leq(w))
            && other.equal.is_subset(&self.equal)
    }

    /// Equivalence classes induced by the equal pairs (singletons omitted).
    pub fn classes(&self) -> Vec<BTreeSet<GlobalId>> {
        let mut classes: Vec<BTreeSet<GlobalId>> = Vec::new();
        for &(a, b) in &self.equal {
            match classes.iter().position(|c| c.contains(&a) || c.contains(&b)) {
                Some(i) => {
                    classes[i].insert(a);
                    classes[i].insert(b);
                }
                None => classes.push(BTreeSet::from([a, b])),
            }
        }
        classes
    }

    fn close(&mut self) {
        loop {
            let mut added = Vec::new();
            for &(a, b) in &self.equal {
                for &(c, d) in &self.equal {
                    let joined = if b == c {
                        Some((a, d))
                    } else if a == c && b != d {
                        Some((b.min(d), b.max(d)))
                    } else if b == d && a != c {
                        Some((a.min(c), a.max(c)))
                    } else {
                        None
                    };
                    if let Some(pair) = joined {
                        if pair.0 != pair.1 && !self.equal.contains(&pair) {
                            added.push(pair);
                        }
                    }
                }
            }
            if added.is_empty() {
                return;
            }
            self.equal.extend(added);
        }
    }

    /// All unsatisfiable relations over the same variables compare equal.
    fn normalize(&mut self) {
        if self.is_bottom() {
            for v in self.values.values_mut() {
                *v = D::bottom();
            }
            self.equal.clear();
        }
    }

    /// Equal variables share the meet of their values.
    fn reduce(&mut self) {
        for class in self.classes() {
            let Some(shared) = class
                .iter()
                .filter_map(|g| self.values.get(g))
                .cloned()
                .reduce(|acc, v| acc.meet(&v))
            else {
                continue;
            };
            for g in class {
                self.values.insert(g, shared.clone());
            }
        }
    }
}

impl<D: ValueDomain> fmt::Display for Relation<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (g, v) in &self.values {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "#{g} in {v}")?;
        }
        for (a, b) in &self.equal {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "#{a} == #{b}")?;
        }
        if first {
            f.write_str("top")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockmeet_ir::clustering::SingletonClusters;
    use lockmeet_ir::domain::Interval;
    use lockmeet_ir::program::ThreadedProgram;

    fn iv(lo: i64, hi: i64) -> Interval {
        Interval::new(lo, hi)
    }

    #[test]
    fn layout_enumerates_singletons_and_pairs() {
        let mut p = ThreadedProgram::new("p");
        let g = p.add_global("g", 0);
        let h = p.add_global("h", 0);
        let i = p.add_global("i", 0);
        p.add_mutex("A", [g, h, i]);
        p.add_thread("main");
        let table = ClusterTable::build(&p, &SingletonClusters).unwrap();

        let layout = ClusterLayout::new(&table, 2);
        let slots: Vec<Vec<GlobalId>> = layout
            .slots_of(0)
            .iter()
            .map(|k| k.members().to_vec())
            .collect();
        assert_eq!(
            slots,
            vec![vec![0], vec![1], vec![2], vec![0, 1], vec![0, 2], vec![1, 2]]
        );
        assert_eq!(layout.slots_containing(0, 2).count(), 3);

        let narrow = ClusterLayout::new(&table, 1);
        assert_eq!(narrow.slot_count(), 3);
    }

    #[test]
    fn join_keeps_common_equalities() {
        let a = Relation::new([(0, iv(0, 0)), (1, iv(0, 0))], [(0, 1)]);
        let b = Relation::new([(0, iv(5, 5)), (1, iv(5, 5))], [(0, 1)]);
        let c = Relation::new([(0, iv(1, 1)), (1, iv(2, 2))], []);
        let ab = a.join(&b);
        assert!(ab.are_equal(0, 1));
        assert_eq!(ab.value(0), iv(0, 5));
        assert!(!ab.join(&c).are_equal(0, 1));
        assert!(a.leq(&ab));
        assert!(!ab.leq(&a));
    }

    #[test]
    fn meet_closes_and_reduces() {
        let gh = Relation::new([(0, Interval::top()), (1, Interval::top())], [(0, 1)]);
        let hi = Relation::new([(1, Interval::top()), (2, iv(3, 7))], [(1, 2)]);
        let m = gh.meet(&hi);
        assert!(m.are_equal(0, 2));
        assert_eq!(m.value(0), iv(3, 7));
        assert_eq!(m.classes(), vec![BTreeSet::from([0, 1, 2])]);
    }

    #[test]
    fn bottom_is_identity_for_join() {
        let bot = Relation::new([(0, Interval::Bottom)], []);
        let a = Relation::new([(0, iv(1, 2))], []);
        assert!(bot.is_bottom());
        assert_eq!(bot.join(&a), a);
        assert_eq!(a.join(&bot), a);
        assert!(bot.leq(&a));
    }

    #[test]
    fn widen_drops_unstable_bounds() {
        let old = Relation::new([(0, iv(0, 1))], []);
        let new = Relation::new([(0, iv(0, 2))], []);
        let w = old.widen(&old.join(&new));
        assert_eq!(
            w.value(0),
            Interval::Range {
                lo: Some(0),
                hi: None
            }
        );
    }
}
