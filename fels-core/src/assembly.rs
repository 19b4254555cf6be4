//! Global system setup and assembly.
//!
//! A topology change runs [`plan_topology`] once: the DOF graph is reordered,
//! its bandwidth measured and a storage layout chosen. Each load step then
//! reuses the plan through a [`GlobalSystem`]:
//!
//! 1. [`GlobalSystem::zero`] clears matrix and right-hand side
//! 2. element matrices are added with [`GlobalSystem::accumulate`]
//! 3. loads go in with [`GlobalSystem::add_load`]
//! 4. constraints are enforced with [`GlobalSystem::apply_constraints`]
//! 5. [`GlobalSystem::solve`] factorizes and solves
//!
//! Ties couple DOFs that no element connects, so their DOF pairs must be part
//! of the incidence the graph is built from or the tie falls outside the band.
//!
//! # Example
//!
//! ```ignore
//! use fels_core::assembly::{plan_topology, AssemblyOptions, GlobalSystem};
//! use fels_core::dof::NodeDofTable;
//! use fels_core::reorder::DofGraph;
//!
//! let mut table = NodeDofTable::uniform(n_nodes, 1);
//! let incidence: Vec<Vec<usize>> = elements
//!     .iter()
//!     .map(|e| table.element_dofs(e))
//!     .collect::<Result<_, _>>()?;
//! let graph = DofGraph::from_incidence(table.n_dofs(), &incidence)?;
//! let plan = plan_topology(&graph, &AssemblyOptions::default())?;
//! table.renumber(&plan.permutation)?;
//!
//! let mut system = GlobalSystem::allocate(&plan);
//! for e in &elements {
//!     system.accumulate(&stiffness(e), &table.element_dofs(e)?)?;
//! }
//! let (u, stats) = system.solve()?;
//! ```

use crate::dof::DofRegistry;
use crate::error::{Error, Result};
use crate::layout::{Bandwidth, GlobalMatrix, LayoutKind, MatrixStorage, StorageScheme};
use crate::penalty::{Constraint, ConstraintContext, ConstraintReport, PenaltyApplier};
use crate::reorder::{reorder, DofGraph, Permutation};
use crate::solver::{self, SolveStats};
use nalgebra::DMatrix;
use tracing::info;

/// Assembly options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyOptions {
    /// Layout selection.
    pub storage: StorageScheme,
    /// Whether the assembled operator is symmetric.
    pub symmetric: bool,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            storage: StorageScheme::Auto,
            symmetric: true,
        }
    }
}

/// Reordering and layout decided for one topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    pub permutation: Permutation,
    /// Bandwidth after reordering.
    pub bandwidth: Bandwidth,
    /// Bandwidth under the original numbering.
    pub original_bandwidth: Bandwidth,
    pub layout: LayoutKind,
    pub n_dofs: usize,
}

impl TopologyPlan {
    /// Stored entries the chosen layout will allocate.
    pub fn stored_entries(&self) -> usize {
        self.layout.elem_count(self.n_dofs, self.bandwidth)
    }
}

/// Reorder `graph` and choose a storage layout for the result.
///
/// A fixed symmetric layout requested for a non-symmetric operator is
/// rejected, since it could not hold both triangles.
pub fn plan_topology(graph: &DofGraph, options: &AssemblyOptions) -> Result<TopologyPlan> {
    if let StorageScheme::Fixed(kind) = options.storage {
        if kind.is_symmetric() && !options.symmetric {
            return Err(Error::Unsupported(format!(
                "{kind} storage cannot hold a non-symmetric operator"
            )));
        }
    }

    let reordering = reorder(graph)?;
    let n_dofs = graph.n_dofs();
    let layout = LayoutKind::select(
        options.storage,
        n_dofs,
        reordering.bandwidth,
        options.symmetric,
    );

    let plan = TopologyPlan {
        permutation: reordering.permutation,
        bandwidth: reordering.bandwidth,
        original_bandwidth: reordering.original_bandwidth,
        layout,
        n_dofs,
    };
    info!(
        n_dofs,
        layout = %plan.layout,
        bandwidth = %plan.bandwidth,
        original_bandwidth = %plan.original_bandwidth,
        stored_entries = plan.stored_entries(),
        "planned global system topology"
    );
    Ok(plan)
}

/// Global matrix and right-hand side for one solution pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSystem {
    matrix: GlobalMatrix,
    rhs: Vec<f64>,
}

impl GlobalSystem {
    /// Allocate a zeroed system following `plan`.
    pub fn allocate(plan: &TopologyPlan) -> Self {
        Self {
            matrix: GlobalMatrix::allocate(plan.layout, plan.n_dofs, plan.bandwidth),
            rhs: vec![0.0; plan.n_dofs],
        }
    }

    /// Wrap an existing square matrix with a zero right-hand side.
    pub fn from_matrix(matrix: GlobalMatrix) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(Error::Dimension(format!(
                "global matrix must be square, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let rhs = vec![0.0; matrix.nrows()];
        Ok(Self { matrix, rhs })
    }

    pub fn n_dofs(&self) -> usize {
        self.rhs.len()
    }

    pub fn matrix(&self) -> &GlobalMatrix {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut GlobalMatrix {
        &mut self.matrix
    }

    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    pub fn rhs_mut(&mut self) -> &mut [f64] {
        &mut self.rhs
    }

    /// Clear matrix and right-hand side, keeping the layout.
    pub fn zero(&mut self) {
        self.matrix.zero();
        self.rhs.fill(0.0);
    }

    /// Add an element matrix at the given (reordered) global DOFs.
    pub fn accumulate(&mut self, submatrix: &DMatrix<f64>, dofs: &[usize]) -> Result<()> {
        self.matrix.accumulate(submatrix, dofs)
    }

    /// Add a load to the right-hand side.
    pub fn add_load(&mut self, dof: usize, value: f64) -> Result<()> {
        let n = self.rhs.len();
        let slot = self.rhs.get_mut(dof).ok_or_else(|| {
            Error::Dimension(format!("load on DOF {dof} but the system has {n} DOFs"))
        })?;
        *slot += value;
        Ok(())
    }

    /// Enforce `constraints` by penalty; `trial` is the current displacement.
    pub fn apply_constraints<R>(
        &mut self,
        applier: &PenaltyApplier,
        ctx: &mut ConstraintContext<'_, R>,
        trial: &[f64],
        constraints: &[Constraint],
    ) -> Result<ConstraintReport>
    where
        R: DofRegistry + ?Sized,
    {
        applier.apply_all(&mut self.matrix, &mut self.rhs, trial, ctx, constraints)
    }

    /// Solve for the current right-hand side.
    pub fn solve(&self) -> Result<(Vec<f64>, SolveStats)> {
        solver::solve(&self.matrix, &self.rhs)
    }

    /// `K·x − f` for a candidate solution.
    pub fn residual(&self, x: &[f64]) -> Result<Vec<f64>> {
        let kx = self.matrix.multiply(x)?;
        Ok(kx.iter().zip(&self.rhs).map(|(a, b)| a - b).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::NodeDofTable;
    use crate::penalty::{ConstraintSets, Prescribed, SinglePoint, Tie};
    use approx::assert_relative_eq;

    fn spring(k: f64) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[k, -k, -k, k])
    }

    /// Chain of unit springs whose node numbering jumps around.
    struct Chain {
        table: NodeDofTable,
        elements: Vec<[usize; 2]>,
        /// Nodes from the fixed end to the free end.
        along: Vec<usize>,
    }

    fn scrambled_chain() -> Chain {
        let along = vec![3, 0, 5, 1, 4, 2];
        let elements = along.windows(2).map(|w| [w[0], w[1]]).collect();
        Chain {
            table: NodeDofTable::uniform(along.len(), 1),
            elements,
            along,
        }
    }

    fn plan_and_assemble(
        chain: &mut Chain,
        options: &AssemblyOptions,
    ) -> (TopologyPlan, GlobalSystem) {
        let incidence: Vec<Vec<usize>> = chain
            .elements
            .iter()
            .map(|e| chain.table.element_dofs(e).unwrap())
            .collect();
        let graph = DofGraph::from_incidence(chain.table.n_dofs(), &incidence).unwrap();
        let plan = plan_topology(&graph, options).unwrap();
        chain.table.renumber(&plan.permutation).unwrap();

        let mut system = GlobalSystem::allocate(&plan);
        for e in &chain.elements {
            let dofs = chain.table.element_dofs(e).unwrap();
            system.accumulate(&spring(1.0), &dofs).unwrap();
        }
        (plan, system)
    }

    #[test]
    fn test_plan_reorders_to_tridiagonal() {
        let mut chain = scrambled_chain();
        let (plan, system) = plan_and_assemble(&mut chain, &AssemblyOptions::default());
        assert_eq!(plan.bandwidth, Bandwidth::symmetric(1));
        assert!(plan.original_bandwidth.max() > 1);
        assert_eq!(plan.layout, LayoutKind::SymBand);
        assert_eq!(system.matrix().elem_count(), plan.stored_entries());
    }

    #[test]
    fn test_fixed_symmetric_layout_requires_symmetric_operator() {
        let graph = DofGraph::from_adjacency(vec![vec![1], vec![0]]).unwrap();
        let options = AssemblyOptions {
            storage: StorageScheme::Fixed(LayoutKind::SymPack),
            symmetric: false,
        };
        assert!(matches!(plan_topology(&graph, &options), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_spring_chain_tip_load() {
        for options in [
            AssemblyOptions::default(),
            AssemblyOptions { storage: StorageScheme::Auto, symmetric: false },
            AssemblyOptions { storage: StorageScheme::Fixed(LayoutKind::SymPack), symmetric: true },
            AssemblyOptions { storage: StorageScheme::Fixed(LayoutKind::Full), symmetric: false },
        ] {
            let mut chain = scrambled_chain();
            let (_, mut system) = plan_and_assemble(&mut chain, &options);

            let tip = *chain.along.last().unwrap();
            system.add_load(chain.table.node_dofs(tip).unwrap()[0], 1.0).unwrap();

            let mut sets = ConstraintSets::new();
            let mut ctx = ConstraintContext::new(&mut sets, &chain.table);
            let fix = vec![Constraint::SinglePoint(SinglePoint {
                node: chain.along[0],
                dofs: vec![0],
            })];
            let trial = vec![0.0; system.n_dofs()];
            let report = system
                .apply_constraints(&PenaltyApplier::default(), &mut ctx, &trial, &fix)
                .unwrap();
            assert_eq!(report.inserted, 1);

            let (u, stats) = system.solve().unwrap();
            assert_eq!(stats.layout, system.matrix().kind());
            for (i, &node) in chain.along.iter().enumerate() {
                let dof = chain.table.node_dofs(node).unwrap()[0];
                assert_relative_eq!(u[dof], i as f64, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_prescribed_displacement_converges() {
        let mut chain = scrambled_chain();
        let (_, mut system) = plan_and_assemble(&mut chain, &AssemblyOptions::default());
        let n = system.n_dofs();

        let mut sets = ConstraintSets::new();
        let mut ctx = ConstraintContext::new(&mut sets, &chain.table);
        let tip = *chain.along.last().unwrap();
        let constraints = vec![
            Constraint::SinglePoint(SinglePoint { node: chain.along[0], dofs: vec![0] }),
            Constraint::Prescribed(Prescribed { node: tip, dof: 0, value: 0.5 }),
        ];
        system
            .apply_constraints(&PenaltyApplier::default(), &mut ctx, &vec![0.0; n], &constraints)
            .unwrap();
        let (u, _) = system.solve().unwrap();

        // Linear interpolation between the two ends.
        let last = (chain.along.len() - 1) as f64;
        for (i, &node) in chain.along.iter().enumerate() {
            let dof = chain.table.node_dofs(node).unwrap()[0];
            assert_relative_eq!(u[dof], 0.5 * i as f64 / last, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_tie_joins_two_chains() {
        // 0 -k- 1   2 -k- 3, with 1 tied to 2: two springs in series.
        let mut table = NodeDofTable::uniform(4, 1);
        let elements = [[0, 1], [2, 3]];
        let tie_pair = [1, 2];
        let incidence: Vec<Vec<usize>> = elements
            .iter()
            .chain(std::iter::once(&tie_pair))
            .map(|e| table.element_dofs(e).unwrap())
            .collect();
        let graph = DofGraph::from_incidence(4, &incidence).unwrap();
        let plan = plan_topology(&graph, &AssemblyOptions::default()).unwrap();
        table.renumber(&plan.permutation).unwrap();

        let mut system = GlobalSystem::allocate(&plan);
        for e in &elements {
            system.accumulate(&spring(2.0), &table.element_dofs(e).unwrap()).unwrap();
        }
        system.add_load(table.node_dofs(3).unwrap()[0], 1.0).unwrap();

        let mut sets = ConstraintSets::new();
        let mut ctx = ConstraintContext::new(&mut sets, &table);
        // Tie before the support so the tie penalty is not scaled off the support penalty.
        let constraints = vec![
            Constraint::Tie(Tie { first: 1, second: 2, dofs: vec![0] }),
            Constraint::SinglePoint(SinglePoint { node: 0, dofs: vec![0] }),
        ];
        let report = system
            .apply_constraints(&PenaltyApplier::default(), &mut ctx, &[0.0; 4], &constraints)
            .unwrap();
        assert_eq!(report.tied, 1);

        let (u, _) = system.solve().unwrap();
        let at = |node: usize| u[table.node_dofs(node).unwrap()[0]];
        assert_relative_eq!(at(1), at(2), epsilon = 1e-5);
        assert_relative_eq!(at(1), 0.5, epsilon = 1e-5);
        assert_relative_eq!(at(3), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_zero_and_reassemble_is_repeatable() {
        let mut chain = scrambled_chain();
        let (_, mut system) = plan_and_assemble(&mut chain, &AssemblyOptions::default());
        let first = system.clone();

        system.add_load(0, 3.0).unwrap();
        system.zero();
        for e in &chain.elements {
            system.accumulate(&spring(1.0), &chain.table.element_dofs(e).unwrap()).unwrap();
        }
        assert_eq!(system, first);
    }

    #[test]
    fn test_residual_of_solution_vanishes() {
        let mut chain = scrambled_chain();
        let (_, mut system) = plan_and_assemble(&mut chain, &AssemblyOptions::default());
        let mut sets = ConstraintSets::new();
        let mut ctx = ConstraintContext::new(&mut sets, &chain.table);
        let fix = vec![Constraint::SinglePoint(SinglePoint {
            node: chain.along[0],
            dofs: vec![0],
        })];
        system
            .apply_constraints(&PenaltyApplier::default(), &mut ctx, &[0.0; 6], &fix)
            .unwrap();
        system.add_load(2, 1.0).unwrap();
        let (u, _) = system.solve().unwrap();
        let r = system.residual(&u).unwrap();
        assert!(r.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_load_out_of_range() {
        let system = GlobalMatrix::allocate(LayoutKind::Full, 2, Bandwidth::full(2));
        let mut system = GlobalSystem::from_matrix(system).unwrap();
        assert!(matches!(system.add_load(2, 1.0), Err(Error::Dimension(_))));
    }
}
