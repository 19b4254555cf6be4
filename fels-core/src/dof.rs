//! Node and DOF bookkeeping.
//!
//! Maps `(node, local DOF)` pairs to equation numbers of the global system and
//! tracks which nodes take part in the current analysis.

use crate::error::{Error, Result};
use crate::reorder::Permutation;

/// Node/DOF queries the constraint applier needs from the domain.
pub trait DofRegistry {
    /// Whether the node currently takes part in the analysis.
    fn is_node_active(&self, node: usize) -> bool;

    /// Number of DOFs carried by the node.
    fn local_dof_count(&self, node: usize) -> usize;

    /// Global equation number of a local DOF after reordering.
    ///
    /// Only called for active nodes with `local_dof < local_dof_count(node)`.
    fn reordered_dof_index(&self, node: usize, local_dof: usize) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
struct NodeDofs {
    active: bool,
    /// Equation number of local DOF 0 in the original numbering.
    first: usize,
    /// Current equation numbers, one per local DOF.
    equations: Vec<usize>,
}

/// Table of nodes with consecutive original equation numbers.
#[derive(Debug, Clone, Default)]
pub struct NodeDofTable {
    nodes: Vec<NodeDofs>,
    n_dofs: usize,
}

impl NodeDofTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table of `n_nodes` active nodes with the same DOF count.
    pub fn uniform(n_nodes: usize, dofs_per_node: usize) -> Self {
        let mut table = Self::new();
        for _ in 0..n_nodes {
            table.add_node(dofs_per_node);
        }
        table
    }

    /// Add an active node, returning its index.
    pub fn add_node(&mut self, n_dofs: usize) -> usize {
        let idx = self.nodes.len();
        let first = self.n_dofs;
        self.nodes.push(NodeDofs {
            active: true,
            first,
            equations: (first..first + n_dofs).collect(),
        });
        self.n_dofs += n_dofs;
        idx
    }

    /// Number of nodes in the table.
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of equations.
    pub fn n_dofs(&self) -> usize {
        self.n_dofs
    }

    /// Activate or deactivate a node.
    pub fn set_active(&mut self, node: usize, active: bool) -> Result<()> {
        let n_nodes = self.nodes.len();
        let entry = self.nodes.get_mut(node).ok_or_else(|| {
            Error::DofTable(format!("node {node} out of bounds (table has {n_nodes} nodes)"))
        })?;
        entry.active = active;
        Ok(())
    }

    /// Current equation numbers of a node.
    pub fn node_dofs(&self, node: usize) -> Option<&[usize]> {
        self.nodes.get(node).map(|n| n.equations.as_slice())
    }

    /// Equation numbers of an element's nodes, node by node.
    pub fn element_dofs(&self, nodes: &[usize]) -> Result<Vec<usize>> {
        let mut dofs = Vec::new();
        for &node in nodes {
            let equations = self.node_dofs(node).ok_or_else(|| {
                Error::DofTable(format!(
                    "node {node} out of bounds (table has {} nodes)",
                    self.nodes.len()
                ))
            })?;
            dofs.extend_from_slice(equations);
        }
        Ok(dofs)
    }

    /// Renumber every equation through `permutation`.
    ///
    /// Always relative to the original numbering, so renumbering twice does
    /// not compose.
    pub fn renumber(&mut self, permutation: &Permutation) -> Result<()> {
        if permutation.len() != self.n_dofs {
            return Err(Error::DofTable(format!(
                "permutation covers {} equations but the table has {}",
                permutation.len(),
                self.n_dofs
            )));
        }
        for node in &mut self.nodes {
            for (k, eq) in node.equations.iter_mut().enumerate() {
                *eq = permutation.new_index(node.first + k);
            }
        }
        Ok(())
    }
}

impl DofRegistry for NodeDofTable {
    fn is_node_active(&self, node: usize) -> bool {
        self.nodes.get(node).is_some_and(|n| n.active)
    }

    fn local_dof_count(&self, node: usize) -> usize {
        self.nodes.get(node).map_or(0, |n| n.equations.len())
    }

    fn reordered_dof_index(&self, node: usize, local_dof: usize) -> usize {
        self.nodes[node].equations[local_dof]
    }
}
