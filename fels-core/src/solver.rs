//! Solve entry points for the assembled system `K·u = f`.
//!
//! The factorization itself lives with each layout (see
//! [`MatrixStorage::solve_many`]); this module adds the bookkeeping around it:
//! dimension checks, timing, logging and [`SolveStats`].
//!
//! # Solver Backends
//!
//! | Layout | Factorization |
//! |--------|---------------|
//! | full | pivoted LU (nalgebra) |
//! | general band | banded LU with partial pivoting |
//! | symmetric band | banded Cholesky |
//! | symmetric packed | unpivoted `UᵀDU` |
//!
//! The operator is never factorized in place, so the same store can be used
//! for a residual multiply after the solve.

use crate::error::{Error, Result};
use crate::layout::{LayoutKind, MatrixStorage};
use nalgebra::DMatrix;
use std::time::Instant;
use tracing::{info, warn};

/// Solution statistics.
#[derive(Debug, Clone)]
pub struct SolveStats {
    /// Layout that was factorized.
    pub layout: LayoutKind,
    /// Number of equations.
    pub n_dofs: usize,
    /// Number of right-hand sides solved for.
    pub n_rhs: usize,
    /// Physically stored entries of the operator.
    pub stored_entries: usize,
    /// Wall-clock time in seconds.
    pub time_seconds: f64,
}

/// Solve `A·x = b` for one right-hand side.
pub fn solve<M>(matrix: &M, rhs: &[f64]) -> Result<(Vec<f64>, SolveStats)>
where
    M: MatrixStorage + ?Sized,
{
    let b = DMatrix::from_column_slice(rhs.len(), 1, rhs);
    let (x, stats) = solve_many(matrix, &b)?;
    Ok((x.as_slice().to_vec(), stats))
}

/// Solve `A·X = B` for every column of `rhs`.
///
/// # Errors
///
/// - [`Error::Dimension`] when the operator is not square or `rhs` has the
///   wrong number of rows.
/// - [`Error::SingularOperator`] when the factorization fails; the status is
///   the 1-based index of the failing pivot.
pub fn solve_many<M>(matrix: &M, rhs: &DMatrix<f64>) -> Result<(DMatrix<f64>, SolveStats)>
where
    M: MatrixStorage + ?Sized,
{
    let n = matrix.nrows();
    if matrix.ncols() != n {
        return Err(Error::Dimension(format!(
            "cannot solve with a non-square {}x{} operator",
            n,
            matrix.ncols()
        )));
    }
    if rhs.nrows() != n {
        return Err(Error::Dimension(format!(
            "right-hand side has {} rows but the operator has {n} equations",
            rhs.nrows()
        )));
    }

    let start = Instant::now();
    let solution = matrix.solve_many(rhs).inspect_err(|e| {
        if let Error::SingularOperator { layout, status } = e {
            warn!(%layout, status, n_dofs = n, "factorization failed");
        }
    })?;

    let stats = SolveStats {
        layout: matrix.kind(),
        n_dofs: n,
        n_rhs: rhs.ncols(),
        stored_entries: matrix.elem_count(),
        time_seconds: start.elapsed().as_secs_f64(),
    };
    info!(
        layout = %stats.layout,
        n_dofs = stats.n_dofs,
        n_rhs = stats.n_rhs,
        stored_entries = stats.stored_entries,
        time_seconds = stats.time_seconds,
        "solved linear system"
    );
    Ok((solution, stats))
}

/// Euclidean norm of `A·x − b`.
pub fn residual_norm<M>(matrix: &M, x: &[f64], rhs: &[f64]) -> Result<f64>
where
    M: MatrixStorage + ?Sized,
{
    let ax = matrix.multiply(x)?;
    if ax.len() != rhs.len() {
        return Err(Error::Dimension(format!(
            "right-hand side has {} entries but A·x has {}",
            rhs.len(),
            ax.len()
        )));
    }
    Ok(ax
        .iter()
        .zip(rhs)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt())
}
