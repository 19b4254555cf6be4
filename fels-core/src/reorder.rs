//! Bandwidth-minimizing DOF reordering.
//!
//! The DOF adjacency graph is built once per topology from element incidence.
//! [`reverse_cuthill_mckee`] turns it into a [`Permutation`] whose bandwidth
//! decides which storage layout the global matrix can afford.

use crate::error::{Error, Result};
use crate::layout::Bandwidth;
use std::collections::BTreeSet;

/// DOF adjacency with neighbor lists sorted by ascending neighbor degree.
///
/// Ties in degree keep ascending DOF index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DofGraph {
    neighbors: Vec<Vec<usize>>,
    degree: Vec<usize>,
}

impl DofGraph {
    /// Build from element incidence: the DOFs of each element are mutually adjacent.
    ///
    /// # Errors
    ///
    /// Returns error if an element references a DOF `>= n_dofs`.
    pub fn from_incidence<I, E>(n_dofs: usize, elements: I) -> Result<Self>
    where
        I: IntoIterator<Item = E>,
        E: AsRef<[usize]>,
    {
        let mut sets = vec![BTreeSet::new(); n_dofs];
        for (elem_idx, element) in elements.into_iter().enumerate() {
            let dofs = element.as_ref();
            if let Some(&bad) = dofs.iter().find(|&&d| d >= n_dofs) {
                return Err(Error::Reorder(format!(
                    "element {elem_idx} references DOF {bad} but the graph has {n_dofs} DOFs"
                )));
            }
            for &a in dofs {
                for &b in dofs {
                    if a != b {
                        sets[a].insert(b);
                    }
                }
            }
        }
        Ok(Self::from_sets(sets))
    }

    /// Build from explicit per-DOF adjacency lists.
    ///
    /// Self loops and duplicate entries are dropped.
    pub fn from_adjacency(lists: Vec<Vec<usize>>) -> Result<Self> {
        let n = lists.len();
        let mut sets = Vec::with_capacity(n);
        for (dof, list) in lists.into_iter().enumerate() {
            if let Some(&bad) = list.iter().find(|&&d| d >= n) {
                return Err(Error::Reorder(format!(
                    "DOF {dof} lists neighbor {bad} but the graph has {n} DOFs"
                )));
            }
            sets.push(list.into_iter().filter(|&d| d != dof).collect::<BTreeSet<_>>());
        }
        Ok(Self::from_sets(sets))
    }

    fn from_sets(sets: Vec<BTreeSet<usize>>) -> Self {
        let degree: Vec<usize> = sets.iter().map(BTreeSet::len).collect();
        let neighbors = sets
            .into_iter()
            .map(|set| {
                let mut list: Vec<usize> = set.into_iter().collect();
                list.sort_by_key(|&d| degree[d]);
                list
            })
            .collect();
        Self { neighbors, degree }
    }

    pub fn n_dofs(&self) -> usize {
        self.degree.len()
    }

    /// Neighbors of `dof` in ascending-degree order.
    pub fn neighbors(&self, dof: usize) -> &[usize] {
        &self.neighbors[dof]
    }

    pub fn degree(&self, dof: usize) -> usize {
        self.degree[dof]
    }

    pub fn degrees(&self) -> &[usize] {
        &self.degree
    }

    /// Bandwidth of the operator once DOFs are numbered by `permutation`.
    ///
    /// An edge `u → v` stands for the matrix entry `(u, v)`.
    pub fn bandwidth(&self, permutation: &Permutation) -> Result<Bandwidth> {
        if permutation.len() != self.n_dofs() {
            return Err(Error::Reorder(format!(
                "permutation of length {} applied to a graph of {} DOFs",
                permutation.len(),
                self.n_dofs()
            )));
        }
        let mut bw = Bandwidth::default();
        for (u, list) in self.neighbors.iter().enumerate() {
            let row = permutation.new_index(u);
            for &v in list {
                let col = permutation.new_index(v);
                if row > col {
                    bw.lower = bw.lower.max(row - col);
                } else {
                    bw.upper = bw.upper.max(col - row);
                }
            }
        }
        Ok(bw)
    }
}

/// Bijection between original and reordered DOF indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    /// `order[new] = old`
    order: Vec<usize>,
    /// `position[old] = new`
    position: Vec<usize>,
}

impl Permutation {
    pub fn identity(n: usize) -> Self {
        Self {
            order: (0..n).collect(),
            position: (0..n).collect(),
        }
    }

    /// Build from `order[new] = old`.
    ///
    /// # Errors
    ///
    /// Returns error unless every index in `0..order.len()` appears exactly once.
    pub fn from_order(order: Vec<usize>) -> Result<Self> {
        let n = order.len();
        let mut position = vec![usize::MAX; n];
        for (new, &old) in order.iter().enumerate() {
            if old >= n || position[old] != usize::MAX {
                return Err(Error::Reorder(format!(
                    "index {old} at position {new} breaks the permutation of 0..{n}"
                )));
            }
            position[old] = new;
        }
        Ok(Self { order, position })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.order.iter().enumerate().all(|(i, &o)| i == o)
    }

    /// Reordered index of an original DOF.
    pub fn new_index(&self, old: usize) -> usize {
        self.position[old]
    }

    /// Original DOF at a reordered position.
    pub fn old_index(&self, new: usize) -> usize {
        self.order[new]
    }

    /// Original DOFs listed in reordered sequence.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn inverse(&self) -> Self {
        Self {
            order: self.position.clone(),
            position: self.order.clone(),
        }
    }

    /// Gather values indexed by original DOF into reordered sequence.
    pub fn apply<T: Clone>(&self, values: &[T]) -> Vec<T> {
        self.order.iter().map(|&old| values[old].clone()).collect()
    }
}

/// Reverse Cuthill–McKee ordering of `graph`.
///
/// Breadth-first level expansion from the lowest-degree unvisited DOF, written
/// from the back of the output so the sequence comes out reversed. When a
/// component is exhausted the next root is again the lowest-degree unvisited
/// DOF, so disconnected components are ordered one after another.
pub fn reverse_cuthill_mckee(graph: &DofGraph) -> Permutation {
    let n = graph.n_dofs();

    let mut by_degree: Vec<usize> = (0..n).collect();
    by_degree.sort_by_key(|&d| graph.degree[d]);

    let mut visited = vec![false; n];
    let mut order = vec![0; n];
    // Slots are filled from the back: `filled` counts written slots (tail),
    // `expanded` counts roots whose neighbors were pushed (frontier).
    let mut filled = 0;
    let mut expanded = 0;
    let mut head = 0;

    while filled < n {
        if expanded == filled {
            while head < n && visited[by_degree[head]] {
                head += 1;
            }
            if head == n {
                break;
            }
            let root = by_degree[head];
            visited[root] = true;
            order[n - 1 - filled] = root;
            filled += 1;
        } else {
            let node = order[n - 1 - expanded];
            for &next in &graph.neighbors[node] {
                if !visited[next] {
                    visited[next] = true;
                    order[n - 1 - filled] = next;
                    filled += 1;
                }
            }
            expanded += 1;
        }
    }

    let mut position = vec![0; n];
    for (new, &old) in order.iter().enumerate() {
        position[old] = new;
    }
    Permutation { order, position }
}

/// Result of reordering a topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reordering {
    pub permutation: Permutation,
    /// Bandwidth under `permutation`.
    pub bandwidth: Bandwidth,
    /// Bandwidth under the original numbering.
    pub original_bandwidth: Bandwidth,
}

/// Reorder `graph`, keeping the original numbering when RCM does not narrow the band.
pub fn reorder(graph: &DofGraph) -> Result<Reordering> {
    let identity = Permutation::identity(graph.n_dofs());
    let original_bandwidth = graph.bandwidth(&identity)?;

    let rcm = reverse_cuthill_mckee(graph);
    let rcm_bandwidth = graph.bandwidth(&rcm)?;

    let cost = |bw: Bandwidth| (bw.max(), bw.lower + bw.upper);
    let use_rcm = cost(rcm_bandwidth) <= cost(original_bandwidth);
    let reordering = if use_rcm {
        Reordering {
            permutation: rcm,
            bandwidth: rcm_bandwidth,
            original_bandwidth,
        }
    } else {
        Reordering {
            permutation: identity,
            bandwidth: original_bandwidth,
            original_bandwidth,
        }
    };

    tracing::debug!(
        n_dofs = graph.n_dofs(),
        original = %original_bandwidth,
        rcm = %rcm_bandwidth,
        kept_original = !use_rcm,
        "reverse Cuthill-McKee reordering"
    );
    Ok(reordering)
}
