//! Penalty enforcement of kinematic constraints.
//!
//! Constraints are imposed on the already assembled operator by writing large
//! values onto the affected diagonals (and, for ties, off-diagonals) instead of
//! eliminating DOFs, so the system keeps its size and layout.
//!
//! Three kinds are supported:
//!
//! - [`SinglePoint`]: pins DOFs to zero (homogeneous).
//! - [`Prescribed`]: drives a DOF toward a nonzero target (inhomogeneous), also
//!   writing the right-hand side.
//! - [`Tie`]: makes the same local DOF of two nodes move together.
//!
//! Penalties of the single-point kinds are kept at a common magnitude: the
//! first constrained DOF fixes `scale × max_entry`, later DOFs copy the
//! diagonal of an already penalized DOF. Re-applying a constraint to a DOF that
//! is already in its set multiplies the diagonal by `scale` again.

use crate::dof::DofRegistry;
use crate::error::{Error, Result};
use crate::layout::MatrixStorage;
use std::collections::BTreeSet;
use std::ops::AddAssign;
use tracing::{debug, trace};

/// Default multiplier applied to the largest matrix entry.
pub const DEFAULT_PENALTY_SCALE: f64 = 1.0e6;

/// How a newly constrained DOF picks its penalty magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PenaltyPolicy {
    /// Copy the diagonal of the smallest constrained DOF, or of the second
    /// smallest when the new DOF is itself the smallest.
    #[default]
    SetOrder,
    /// Remember one magnitude per constraint kind and reuse it.
    Tracked,
}

/// Penalty configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyConfig {
    /// Multiplier on the largest matrix entry.
    pub scale: f64,
    /// Magnitude matching strategy.
    pub policy: PenaltyPolicy,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_PENALTY_SCALE,
            policy: PenaltyPolicy::SetOrder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetKind {
    Restrained,
    Constrained,
}

impl SetKind {
    fn other(self) -> Self {
        match self {
            SetKind::Restrained => SetKind::Constrained,
            SetKind::Constrained => SetKind::Restrained,
        }
    }
}

/// DOFs already penalized by homogeneous (restrained) and inhomogeneous
/// (constrained) single-point constraints.
///
/// Owned by the caller across load steps; cleared on topology changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSets {
    restrained: BTreeSet<usize>,
    constrained: BTreeSet<usize>,
    restrained_penalty: Option<f64>,
    constrained_penalty: Option<f64>,
}

impl ConstraintSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_restrained(&self, dof: usize) -> bool {
        self.restrained.contains(&dof)
    }

    /// Returns `true` when `dof` was not restrained before.
    pub fn insert_restrained(&mut self, dof: usize) -> bool {
        self.restrained.insert(dof)
    }

    pub fn is_constrained(&self, dof: usize) -> bool {
        self.constrained.contains(&dof)
    }

    /// Returns `true` when `dof` was not constrained before.
    pub fn insert_constrained(&mut self, dof: usize) -> bool {
        self.constrained.insert(dof)
    }

    /// Restrained DOFs in ascending order.
    pub fn restrained(&self) -> &BTreeSet<usize> {
        &self.restrained
    }

    /// Constrained DOFs in ascending order.
    pub fn constrained(&self) -> &BTreeSet<usize> {
        &self.constrained
    }

    /// Forget all constrained DOFs and tracked magnitudes.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn members(&self, kind: SetKind) -> &BTreeSet<usize> {
        match kind {
            SetKind::Restrained => &self.restrained,
            SetKind::Constrained => &self.constrained,
        }
    }

    fn insert(&mut self, kind: SetKind, dof: usize) -> bool {
        match kind {
            SetKind::Restrained => self.insert_restrained(dof),
            SetKind::Constrained => self.insert_constrained(dof),
        }
    }

    fn tracked(&self, kind: SetKind) -> Option<f64> {
        match kind {
            SetKind::Restrained => self.restrained_penalty,
            SetKind::Constrained => self.constrained_penalty,
        }
    }

    fn track(&mut self, kind: SetKind, penalty: f64) {
        match kind {
            SetKind::Restrained => self.restrained_penalty = Some(penalty),
            SetKind::Constrained => self.constrained_penalty = Some(penalty),
        }
    }
}

/// Everything the applier reads or mutates besides the matrix.
pub struct ConstraintContext<'a, R: DofRegistry + ?Sized> {
    pub sets: &'a mut ConstraintSets,
    pub registry: &'a R,
}

impl<'a, R: DofRegistry + ?Sized> ConstraintContext<'a, R> {
    pub fn new(sets: &'a mut ConstraintSets, registry: &'a R) -> Self {
        Self { sets, registry }
    }
}

/// Pin local DOFs of a node to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SinglePoint {
    pub node: usize,
    pub dofs: Vec<usize>,
}

/// Drive one local DOF of a node toward `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prescribed {
    pub node: usize,
    pub dof: usize,
    pub value: f64,
}

/// Tie the listed local DOFs of two nodes together.
#[derive(Debug, Clone, PartialEq)]
pub struct Tie {
    pub first: usize,
    pub second: usize,
    pub dofs: Vec<usize>,
}

/// Any supported constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    SinglePoint(SinglePoint),
    Prescribed(Prescribed),
    Tie(Tie),
}

/// What happened to a single-point constrained DOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyOutcome {
    /// First application: the matched penalty was written.
    Inserted,
    /// Already in its set: the diagonal was multiplied by the scale.
    Stacked,
}

/// Counts from one constraint pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstraintReport {
    pub inserted: usize,
    pub stacked: usize,
    pub tied: usize,
    /// Targets on inactive nodes or beyond a node's DOF count.
    pub skipped: usize,
}

impl ConstraintReport {
    fn record(&mut self, outcome: PenaltyOutcome) {
        match outcome {
            PenaltyOutcome::Inserted => self.inserted += 1,
            PenaltyOutcome::Stacked => self.stacked += 1,
        }
    }
}

impl AddAssign for ConstraintReport {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.stacked += rhs.stacked;
        self.tied += rhs.tied;
        self.skipped += rhs.skipped;
    }
}

/// Resolve a node-local DOF, or `None` when the target is to be skipped.
fn resolve<R: DofRegistry + ?Sized>(registry: &R, node: usize, local_dof: usize) -> Option<usize> {
    if !registry.is_node_active(node) {
        trace!(node, local_dof, "skipping constraint on inactive node");
        return None;
    }
    if local_dof >= registry.local_dof_count(node) {
        trace!(node, local_dof, "skipping constraint beyond node DOF count");
        return None;
    }
    Some(registry.reordered_dof_index(node, local_dof))
}

/// Applies penalty constraints to an assembled operator.
#[derive(Debug, Clone, Default)]
pub struct PenaltyApplier {
    config: PenaltyConfig,
}

impl PenaltyApplier {
    pub fn new(config: PenaltyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PenaltyConfig {
        &self.config
    }

    /// Pin global DOF `dof` to zero.
    pub fn restrain_dof<M>(
        &self,
        matrix: &mut M,
        sets: &mut ConstraintSets,
        dof: usize,
    ) -> Result<PenaltyOutcome>
    where
        M: MatrixStorage + ?Sized,
    {
        self.penalize(matrix, sets, SetKind::Restrained, dof)
    }

    /// Penalize global DOF `dof` toward `target` and write its right-hand side.
    ///
    /// `rhs[dof]` becomes `K(dof, dof) × (target − trial[dof])`.
    pub fn prescribe_dof<M>(
        &self,
        matrix: &mut M,
        rhs: &mut [f64],
        trial: &[f64],
        sets: &mut ConstraintSets,
        dof: usize,
        target: f64,
    ) -> Result<PenaltyOutcome>
    where
        M: MatrixStorage + ?Sized,
    {
        if dof >= rhs.len() || dof >= trial.len() {
            return Err(Error::Dimension(format!(
                "prescribed DOF {dof} outside rhs ({}) or trial displacement ({})",
                rhs.len(),
                trial.len()
            )));
        }
        let outcome = self.penalize(matrix, sets, SetKind::Constrained, dof)?;
        rhs[dof] = matrix.get(dof, dof)? * (target - trial[dof]);
        Ok(outcome)
    }

    /// Tie global DOFs `i` and `j` with penalty `big`.
    ///
    /// Symmetric layouts share one cell for `(i, j)` and `(j, i)`, which is
    /// decremented once. Returns `false` when `i == j`.
    pub fn tie_dofs<M>(&self, matrix: &mut M, i: usize, j: usize, big: f64) -> Result<bool>
    where
        M: MatrixStorage + ?Sized,
    {
        if i == j {
            return Ok(false);
        }
        for (r, c) in [(i, i), (j, j), (i, j), (j, i)] {
            matrix.offset(r, c)?;
        }
        matrix.add(i, i, big)?;
        matrix.add(j, j, big)?;
        matrix.add(i, j, -big)?;
        if !matrix.is_symmetric() {
            matrix.add(j, i, -big)?;
        }
        Ok(true)
    }

    /// Apply a homogeneous single-point constraint.
    pub fn apply_single_point<M, R>(
        &self,
        matrix: &mut M,
        ctx: &mut ConstraintContext<'_, R>,
        constraint: &SinglePoint,
    ) -> Result<ConstraintReport>
    where
        M: MatrixStorage + ?Sized,
        R: DofRegistry + ?Sized,
    {
        let mut report = ConstraintReport::default();
        for &local in &constraint.dofs {
            match resolve(ctx.registry, constraint.node, local) {
                Some(dof) => report.record(self.restrain_dof(matrix, ctx.sets, dof)?),
                None => report.skipped += 1,
            }
        }
        Ok(report)
    }

    /// Apply an inhomogeneous single-point constraint.
    pub fn apply_prescribed<M, R>(
        &self,
        matrix: &mut M,
        rhs: &mut [f64],
        trial: &[f64],
        ctx: &mut ConstraintContext<'_, R>,
        constraint: &Prescribed,
    ) -> Result<ConstraintReport>
    where
        M: MatrixStorage + ?Sized,
        R: DofRegistry + ?Sized,
    {
        let mut report = ConstraintReport::default();
        match resolve(ctx.registry, constraint.node, constraint.dof) {
            Some(dof) => {
                let outcome =
                    self.prescribe_dof(matrix, rhs, trial, ctx.sets, dof, constraint.value)?;
                report.record(outcome);
            }
            None => report.skipped += 1,
        }
        Ok(report)
    }

    /// Apply a two-point equality constraint.
    ///
    /// The penalty is `scale × max_entry` measured once, before any pair of
    /// this tie is written.
    pub fn apply_tie<M, R>(
        &self,
        matrix: &mut M,
        registry: &R,
        constraint: &Tie,
    ) -> Result<ConstraintReport>
    where
        M: MatrixStorage + ?Sized,
        R: DofRegistry + ?Sized,
    {
        let mut report = ConstraintReport::default();
        let big = self.config.scale * matrix.max_entry();
        for &local in &constraint.dofs {
            let pair = (
                resolve(registry, constraint.first, local),
                resolve(registry, constraint.second, local),
            );
            match pair {
                (Some(i), Some(j)) => {
                    if self.tie_dofs(matrix, i, j, big)? {
                        report.tied += 1;
                    }
                }
                _ => report.skipped += 1,
            }
        }
        Ok(report)
    }

    /// Apply every constraint in order.
    pub fn apply_all<M, R>(
        &self,
        matrix: &mut M,
        rhs: &mut [f64],
        trial: &[f64],
        ctx: &mut ConstraintContext<'_, R>,
        constraints: &[Constraint],
    ) -> Result<ConstraintReport>
    where
        M: MatrixStorage + ?Sized,
        R: DofRegistry + ?Sized,
    {
        let mut report = ConstraintReport::default();
        for constraint in constraints {
            report += match constraint {
                Constraint::SinglePoint(c) => self.apply_single_point(matrix, ctx, c)?,
                Constraint::Prescribed(c) => self.apply_prescribed(matrix, rhs, trial, ctx, c)?,
                Constraint::Tie(c) => self.apply_tie(matrix, ctx.registry, c)?,
            };
        }
        debug!(
            inserted = report.inserted,
            stacked = report.stacked,
            tied = report.tied,
            skipped = report.skipped,
            "applied penalty constraints"
        );
        Ok(report)
    }

    fn penalize<M>(
        &self,
        matrix: &mut M,
        sets: &mut ConstraintSets,
        kind: SetKind,
        dof: usize,
    ) -> Result<PenaltyOutcome>
    where
        M: MatrixStorage + ?Sized,
    {
        // Validate before touching the set so a bad DOF leaves no trace.
        matrix.offset(dof, dof)?;

        if !sets.insert(kind, dof) {
            let stacked = matrix.get(dof, dof)? * self.config.scale;
            matrix.set(dof, dof, stacked)?;
            debug!(dof, ?kind, penalty = stacked, "stacked penalty on already constrained DOF");
            return Ok(PenaltyOutcome::Stacked);
        }

        let penalty = match self.config.policy {
            PenaltyPolicy::SetOrder => self.set_order_penalty(matrix, sets, kind, dof)?,
            PenaltyPolicy::Tracked => self.tracked_penalty(matrix, sets, kind),
        };
        matrix.set(dof, dof, penalty)?;
        trace!(dof, ?kind, penalty, "penalized DOF");
        Ok(PenaltyOutcome::Inserted)
    }

    /// Penalty for a DOF just inserted into its set, copied by set position.
    fn set_order_penalty<M>(
        &self,
        matrix: &M,
        sets: &ConstraintSets,
        kind: SetKind,
        dof: usize,
    ) -> Result<f64>
    where
        M: MatrixStorage + ?Sized,
    {
        let mut members = sets.members(kind).iter().copied();
        let smallest = members.next();
        let reference = if smallest == Some(dof) {
            members.next()
        } else {
            smallest
        };
        // Only member of its own set: borrow from the other kind if it has any.
        let reference = reference.or_else(|| sets.members(kind.other()).first().copied());

        match reference {
            Some(r) => matrix.get(r, r),
            None => Ok(self.config.scale * matrix.max_entry()),
        }
    }

    fn tracked_penalty<M>(&self, matrix: &M, sets: &mut ConstraintSets, kind: SetKind) -> f64
    where
        M: MatrixStorage + ?Sized,
    {
        if let Some(penalty) = sets.tracked(kind) {
            return penalty;
        }
        let penalty = sets
            .tracked(kind.other())
            .unwrap_or_else(|| self.config.scale * matrix.max_entry());
        sets.track(kind, penalty);
        penalty
    }
}
