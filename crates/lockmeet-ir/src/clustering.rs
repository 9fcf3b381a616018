//! Mutex cluster table.
//!
//! Mutexes are partitioned into clusters; the engine tracks protected state
//! per cluster instead of per lock-set, which bounds the number of store
//! slots. Each protected global is owned by exactly one cluster: the cluster
//! of its first protecting mutex. Holding any protecting mutex of a global
//! synchronizes with its owner cluster, even when that mutex was placed in
//! another cluster.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::program::{EventKind, GlobalId, MutexId, ThreadedProgram};

pub type ClusterId = usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusteringError {
    #[error("Clustering policy '{policy}' left mutex '{mutex}' without a cluster")]
    MissingMutex { policy: String, mutex: String },
    #[error("Clustering policy '{policy}' placed mutex '{mutex}' in more than one cluster")]
    DuplicateMutex { policy: String, mutex: String },
    #[error("Clustering policy '{policy}' produced an empty cluster")]
    EmptyCluster { policy: String },
    #[error("Clustering policy '{policy}' referenced unknown mutex id {id}")]
    UnknownMutex { policy: String, id: MutexId },
}

/// Facts a clustering policy may use to group mutexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusteringInput {
    pub mutex_count: usize,
    /// `protects[m]` = globals protected by mutex `m`.
    pub protects: Vec<BTreeSet<GlobalId>>,
    /// Pairs `(a, b)`, `a < b`, protecting at least one common global.
    pub co_protecting: BTreeSet<(MutexId, MutexId)>,
    /// Pairs `(a, b)`, `a < b`, held at the same time by some thread.
    pub co_held: BTreeSet<(MutexId, MutexId)>,
}

impl ClusteringInput {
    pub fn from_program(program: &ThreadedProgram) -> Self {
        let mutex_count = program.mutexes.len();
        let protects: Vec<_> = program.mutexes.iter().map(|m| m.protects.clone()).collect();

        let mut co_protecting = BTreeSet::new();
        for a in 0..mutex_count {
            for b in (a + 1)..mutex_count {
                if !protects[a].is_disjoint(&protects[b]) {
                    co_protecting.insert((a, b));
                }
            }
        }

        let mut co_held = BTreeSet::new();
        for thread in &program.threads {
            let mut held: BTreeMap<MutexId, usize> = BTreeMap::new();
            for event in &thread.events {
                match event.kind {
                    EventKind::Lock(m) => {
                        for &other in held.keys() {
                            if other != m {
                                co_held.insert((other.min(m), other.max(m)));
                            }
                        }
                        *held.entry(m).or_insert(0) += 1;
                    }
                    EventKind::Unlock(m) => {
                        if let Some(depth) = held.get_mut(&m) {
                            *depth -= 1;
                            if *depth == 0 {
                                held.remove(&m);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Self {
            mutex_count,
            protects,
            co_protecting,
            co_held,
        }
    }
}

/// Strategy that partitions mutexes into clusters.
pub trait ClusteringPolicy {
    fn name(&self) -> &str;

    /// Groups of mutex ids. Every mutex must appear exactly once.
    fn partition(&self, input: &ClusteringInput) -> Vec<Vec<MutexId>>;
}

/// One cluster per mutex.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingletonClusters;

impl ClusteringPolicy for SingletonClusters {
    fn name(&self) -> &str {
        "singleton"
    }

    fn partition(&self, input: &ClusteringInput) -> Vec<Vec<MutexId>> {
        (0..input.mutex_count).map(|m| vec![m]).collect()
    }
}

/// Greedily merges co-protecting mutexes, then co-held ones, while no
/// cluster exceeds `max_size` members.
#[derive(Debug, Clone, Copy)]
pub struct BoundedClusters {
    pub max_size: usize,
}

impl ClusteringPolicy for BoundedClusters {
    fn name(&self) -> &str {
        "bounded"
    }

    fn partition(&self, input: &ClusteringInput) -> Vec<Vec<MutexId>> {
        let n = input.mutex_count;
        let mut parent: Vec<usize> = (0..n).collect();
        let mut size = vec![1usize; n];

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        if self.max_size > 1 {
            for &(a, b) in input.co_protecting.iter().chain(input.co_held.iter()) {
                if a >= n || b >= n {
                    continue;
                }
                let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
                if ra != rb && size[ra] + size[rb] <= self.max_size {
                    let (keep, merged) = if ra < rb { (ra, rb) } else { (rb, ra) };
                    parent[merged] = keep;
                    size[keep] += size[merged];
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<MutexId>> = BTreeMap::new();
        for m in 0..n {
            let root = find(&mut parent, m);
            groups.entry(root).or_default().push(m);
        }
        groups.into_values().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub mutexes: Vec<MutexId>,
    pub globals: BTreeSet<GlobalId>,
}

/// Validated, immutable mutex partition with global ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTable {
    policy: String,
    clusters: Vec<Cluster>,
    mutex_cluster: Vec<ClusterId>,
    global_owner: Vec<Option<ClusterId>>,
    /// Per mutex: its own cluster and the owners of the globals it protects.
    synced: Vec<Vec<ClusterId>>,
}

impl ClusterTable {
    pub fn build(
        program: &ThreadedProgram,
        policy: &dyn ClusteringPolicy,
    ) -> Result<Self, ClusteringError> {
        let input = ClusteringInput::from_program(program);
        let groups = policy.partition(&input);
        let policy_name = policy.name().to_string();
        let mutex_name = |m: MutexId| program.mutexes[m].name.clone();

        let mut mutex_cluster: Vec<Option<ClusterId>> = vec![None; program.mutexes.len()];
        let mut clusters = Vec::with_capacity(groups.len());
        for group in groups {
            if group.is_empty() {
                return Err(ClusteringError::EmptyCluster {
                    policy: policy_name,
                });
            }
            let id = clusters.len();
            let mut mutexes = Vec::with_capacity(group.len());
            for m in group {
                let slot = mutex_cluster
                    .get_mut(m)
                    .ok_or_else(|| ClusteringError::UnknownMutex {
                        policy: policy_name.clone(),
                        id: m,
                    })?;
                if slot.is_some() {
                    return Err(ClusteringError::DuplicateMutex {
                        policy: policy_name,
                        mutex: mutex_name(m),
                    });
                }
                *slot = Some(id);
                mutexes.push(m);
            }
            mutexes.sort_unstable();
            clusters.push(Cluster {
                mutexes,
                globals: BTreeSet::new(),
            });
        }

        let mutex_cluster = mutex_cluster
            .into_iter()
            .enumerate()
            .map(|(m, c)| {
                c.ok_or_else(|| ClusteringError::MissingMutex {
                    policy: policy_name.clone(),
                    mutex: mutex_name(m),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut global_owner = vec![None; program.globals.len()];
        for (g, owner) in global_owner.iter_mut().enumerate() {
            if let Some(&first) = program.protecting_mutexes(g).first() {
                let c = mutex_cluster[first];
                *owner = Some(c);
                clusters[c].globals.insert(g);
            }
        }

        let synced = program
            .mutexes
            .iter()
            .enumerate()
            .map(|(m, info)| {
                let mut reach: BTreeSet<ClusterId> = BTreeSet::from([mutex_cluster[m]]);
                reach.extend(info.protects.iter().filter_map(|&g| global_owner[g]));
                reach.into_iter().collect()
            })
            .collect();

        Ok(Self {
            policy: policy_name,
            clusters,
            mutex_cluster,
            global_owner,
            synced,
        })
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn cluster_of(&self, mutex: MutexId) -> ClusterId {
        self.mutex_cluster[mutex]
    }

    /// Clusters whose state is synchronized by holding `mutex`, ascending.
    pub fn synced_by(&self, mutex: MutexId) -> &[ClusterId] {
        &self.synced[mutex]
    }

    pub fn globals_owned_by(&self, cluster: ClusterId) -> &BTreeSet<GlobalId> {
        &self.clusters[cluster].globals
    }

    /// `None` for globals no mutex protects.
    pub fn owner_of(&self, global: GlobalId) -> Option<ClusterId> {
        self.global_owner.get(global).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }
}
