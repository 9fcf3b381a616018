//! Per-cluster protected state store.
//!
//! For every mutex cluster the store keeps one [`ClusterRecord`] per
//! contributor (the program initializer or a thread). A record maps each
//! variable cluster to the join of everything that contributor published
//! for it. Records only grow.

use std::collections::BTreeMap;

use serde::Serialize;

use lockmeet_ir::clustering::{ClusterId, ClusterTable};
use lockmeet_ir::domain::ValueDomain;
use lockmeet_ir::program::{GlobalId, ThreadId, ThreadedProgram};

use crate::relation::{ClusterLayout, Relation, VarCluster};

/// Who published a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Contributor {
    Init,
    Thread(ThreadId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    #[default]
    Join,
    Widen,
}

/// Variable cluster -> relation. A missing slot contributes nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRecord<D> {
    slots: BTreeMap<VarCluster, Relation<D>>,
}

impl<D: ValueDomain> Default for ClusterRecord<D> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }
}

impl<D: ValueDomain> ClusterRecord<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: &VarCluster) -> Option<&Relation<D>> {
        self.slots.get(slot)
    }

    /// Join `relation` into `slot`.
    pub fn insert(&mut self, slot: VarCluster, relation: Relation<D>) {
        match self.slots.get_mut(&slot) {
            Some(existing) => *existing = existing.join(&relation),
            None => {
                self.slots.insert(slot, relation);
            }
        }
    }

    pub fn slots(&self) -> impl Iterator<Item = (&VarCluster, &Relation<D>)> {
        self.slots.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn join_with(&mut self, other: &Self) {
        for (slot, rel) in &other.slots {
            self.insert(slot.clone(), rel.clone());
        }
    }

    /// Every slot of `self` is below the same slot of `other`.
    pub fn leq(&self, other: &Self) -> bool {
        self.slots.iter().all(|(slot, rel)| match other.slots.get(slot) {
            Some(o) => rel.leq(o),
            None => rel.is_bottom(),
        })
    }
}

/// An update produced by a replay, applied between rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate<D> {
    pub cluster: ClusterId,
    pub contributor: Contributor,
    pub record: ClusterRecord<D>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedStore<D> {
    records: Vec<BTreeMap<Contributor, ClusterRecord<D>>>,
}

impl<D: ValueDomain> ProtectedStore<D> {
    /// A store with no contributions for `clusters` mutex clusters.
    pub fn empty(clusters: usize) -> Self {
        Self {
            records: vec![BTreeMap::new(); clusters],
        }
    }

    /// A store holding the initializer's contribution: every owned global at
    /// its initial constant, equal pairs for equal initial values.
    pub fn seeded(program: &ThreadedProgram, table: &ClusterTable, layout: &ClusterLayout) -> Self {
        let mut store = Self::empty(table.len());
        for cluster in 0..table.len() {
            let mut record = ClusterRecord::new();
            for slot in layout.slots_of(cluster) {
                let values = slot
                    .members()
                    .iter()
                    .map(|&g| (g, D::constant(program.globals[g].init)));
                let equal = slot
                    .pairs()
                    .filter(|&(a, b)| program.globals[a].init == program.globals[b].init);
                record.insert(slot.clone(), Relation::new(values, equal));
            }
            if !record.is_empty() {
                store.records[cluster].insert(Contributor::Init, record);
            }
        }
        store
    }

    /// Join of every contributor's record for `cluster`.
    pub fn read(&self, cluster: ClusterId) -> ClusterRecord<D> {
        self.join_where(cluster, |_| true)
    }

    /// Join of every contributor's record except the reader's own, unless
    /// `include_own`.
    pub fn read_for(
        &self,
        cluster: ClusterId,
        reader: ThreadId,
        include_own: bool,
    ) -> ClusterRecord<D> {
        self.join_where(cluster, |c| include_own || c != Contributor::Thread(reader))
    }

    fn join_where(
        &self,
        cluster: ClusterId,
        keep: impl Fn(Contributor) -> bool,
    ) -> ClusterRecord<D> {
        let mut out = ClusterRecord::new();
        for (contributor, record) in &self.records[cluster] {
            if keep(*contributor) {
                out.join_with(record);
            }
        }
        out
    }

    pub fn contribution(
        &self,
        cluster: ClusterId,
        contributor: Contributor,
    ) -> Option<&ClusterRecord<D>> {
        self.records[cluster].get(&contributor)
    }

    /// Fold `incoming` into the contributor's record. Returns whether any
    /// slot changed.
    pub fn update(
        &mut self,
        cluster: ClusterId,
        contributor: Contributor,
        incoming: &ClusterRecord<D>,
        mode: UpdateMode,
    ) -> bool {
        let record = self.records[cluster].entry(contributor).or_default();
        let mut changed = false;
        for (slot, rel) in incoming.slots() {
            let next = match record.slots.get(slot) {
                None => rel.clone(),
                Some(old) => match mode {
                    UpdateMode::Join => old.join(rel),
                    UpdateMode::Widen => old.widen(&old.join(rel)),
                },
            };
            if record.slots.get(slot) != Some(&next) {
                record.slots.insert(slot.clone(), next);
                changed = true;
            }
        }
        changed
    }

    pub fn apply(&mut self, update: &PendingUpdate<D>, mode: UpdateMode) -> bool {
        self.update(update.cluster, update.contributor, &update.record, mode)
    }

    /// Final joined value of every protected global.
    pub fn global_summary(&self, table: &ClusterTable) -> Vec<(GlobalId, D)> {
        let mut out = Vec::new();
        for cluster in 0..self.records.len() {
            let joined = self.read(cluster);
            for &g in table.globals_owned_by(cluster) {
                let single = VarCluster::new(vec![g]);
                let value = joined
                    .get(&single)
                    .map(|r| r.value(g))
                    .unwrap_or_else(D::bottom);
                out.push((g, value));
            }
        }
        out.sort_by_key(|(g, _)| *g);
        out
    }
}
