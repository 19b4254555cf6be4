//! Storage layouts for the global system matrix.
//!
//! Every layout keeps its entries in one contiguous column-oriented buffer and
//! implements the same [`MatrixStorage`] contract: checked element access,
//! matrix-vector products and a factorize-and-solve kernel. The layouts differ
//! in how much of the logical `n × n` operator they physically store:
//!
//! | Layout | Buffer size | Offset of `(r, c)` | Solve |
//! |--------|-------------|--------------------|-------|
//! | [`FullMatrix`] | `R·C` | `r + c·R` | pivoted LU |
//! | [`BandMatrix`] | `(2kl+ku+1)·n` | `(r − c + kl + ku) + c·(2kl+ku+1)` | banded pivoted LU |
//! | [`SymBandMatrix`] | `(k+1)·n` | `|r − c| + min(r, c)·(k+1)` | banded Cholesky |
//! | [`SymPackMatrix`] | `n(n+1)/2` | `c(c+1)/2 + r` for `r ≤ c` | `UᵀDU` |
//!
//! Symmetric layouts resolve `(r, c)` and `(c, r)` to the same physical cell:
//! a write through either coordinate updates the single canonical entry.
//!
//! [`GlobalMatrix`] closes the set of layouts into one enum so the assembly and
//! constraint code can work with whichever layout the bandwidth made affordable.

use crate::error::{Error, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;
use sealed::RawBuffer;
use std::fmt;

pub mod band;
pub mod full;
pub mod sym_band;
pub mod sym_pack;

pub use band::BandMatrix;
pub use full::FullMatrix;
pub use sym_band::SymBandMatrix;
pub use sym_pack::SymPackMatrix;

/// Buffers at least this long are scanned in parallel by [`MatrixStorage::max_entry`].
const PARALLEL_SCAN_THRESHOLD: usize = 1 << 16;

mod sealed {
    /// Mutable access to the physical buffer, reserved for the layouts themselves.
    pub trait RawBuffer {
        fn raw_mut(&mut self) -> &mut [f64];
    }
}

/// Identifies one of the four storage schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutKind {
    /// Dense column-major storage.
    Full,
    /// General band storage with room for LU fill-in.
    Band,
    /// Lower triangle of a symmetric band.
    SymBand,
    /// Upper triangle of a symmetric matrix, packed by columns.
    SymPack,
}

impl LayoutKind {
    /// Whether mirrored coordinates share one physical cell.
    pub fn is_symmetric(self) -> bool {
        matches!(self, LayoutKind::SymBand | LayoutKind::SymPack)
    }

    /// Closed-form physical element count for an `n × n` operator.
    pub fn elem_count(self, n: usize, bandwidth: Bandwidth) -> usize {
        let bw = bandwidth.clamp(n);
        match self {
            LayoutKind::Full => n * n,
            LayoutKind::Band => (2 * bw.lower + bw.upper + 1) * n,
            LayoutKind::SymBand => (bw.max() + 1) * n,
            LayoutKind::SymPack => n * (n + 1) / 2,
        }
    }

    /// Pick a layout for an `n × n` operator with the given bandwidth.
    ///
    /// `Auto` takes the banded variant only when it stores fewer entries than
    /// its dense counterpart.
    pub fn select(scheme: StorageScheme, n: usize, bandwidth: Bandwidth, symmetric: bool) -> Self {
        match scheme {
            StorageScheme::Fixed(kind) => kind,
            StorageScheme::Auto if symmetric => {
                if Self::SymBand.elem_count(n, bandwidth) < Self::SymPack.elem_count(n, bandwidth) {
                    Self::SymBand
                } else {
                    Self::SymPack
                }
            }
            StorageScheme::Auto => {
                if Self::Band.elem_count(n, bandwidth) < Self::Full.elem_count(n, bandwidth) {
                    Self::Band
                } else {
                    Self::Full
                }
            }
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayoutKind::Full => "full",
            LayoutKind::Band => "general band",
            LayoutKind::SymBand => "symmetric band",
            LayoutKind::SymPack => "symmetric packed",
        };
        f.write_str(name)
    }
}

/// Layout selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageScheme {
    /// Choose the cheapest layout for the measured bandwidth.
    #[default]
    Auto,
    /// Always use the given layout.
    Fixed(LayoutKind),
}

/// Number of sub-diagonals (`lower`) and super-diagonals (`upper`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bandwidth {
    pub lower: usize,
    pub upper: usize,
}

impl Bandwidth {
    pub fn new(lower: usize, upper: usize) -> Self {
        Self { lower, upper }
    }

    /// Equal lower and upper bandwidth.
    pub fn symmetric(k: usize) -> Self {
        Self { lower: k, upper: k }
    }

    /// Bandwidth of a dense `n × n` operator.
    pub fn full(n: usize) -> Self {
        Self::symmetric(n.saturating_sub(1))
    }

    /// Single bandwidth used by the symmetric layouts.
    pub fn max(self) -> usize {
        self.lower.max(self.upper)
    }

    /// Limit both sides to what an `n × n` operator can have.
    pub fn clamp(self, n: usize) -> Self {
        let limit = n.saturating_sub(1);
        Self {
            lower: self.lower.min(limit),
            upper: self.upper.min(limit),
        }
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kl={}, ku={}", self.lower, self.upper)
    }
}

/// Uniform contract over all storage layouts.
///
/// Element access is checked: coordinates outside the shape or outside the
/// declared band are reported as [`Error::IndexOutOfBand`].
pub trait MatrixStorage: sealed::RawBuffer {
    /// Layout of this store.
    fn kind(&self) -> LayoutKind;

    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    /// Declared bandwidth; dense layouts report the full width.
    fn bandwidth(&self) -> Bandwidth;

    /// Physical offset of a logical coordinate.
    fn offset(&self, row: usize, col: usize) -> Result<usize>;

    /// Read-only view of the physical buffer.
    fn as_slice(&self) -> &[f64];

    /// Compute `A·x` for a column vector.
    fn multiply(&self, x: &[f64]) -> Result<Vec<f64>>;

    /// Compute `A·X` for a dense matrix.
    fn multiply_matrix(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>>;

    /// Factorize a copy of the operator and solve for every column of `rhs`.
    ///
    /// # Errors
    ///
    /// [`Error::SingularOperator`] when the factorization hits a zero (or, for
    /// Cholesky, non-positive) pivot.
    fn solve_many(&self, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>>;

    fn is_symmetric(&self) -> bool {
        self.kind().is_symmetric()
    }

    /// Number of physically stored entries.
    fn elem_count(&self) -> usize {
        self.as_slice().len()
    }

    fn get(&self, row: usize, col: usize) -> Result<f64> {
        let k = self.offset(row, col)?;
        Ok(self.as_slice()[k])
    }

    fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let k = self.offset(row, col)?;
        self.raw_mut()[k] = value;
        Ok(())
    }

    fn add(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let k = self.offset(row, col)?;
        self.raw_mut()[k] += value;
        Ok(())
    }

    /// Reset every stored entry to zero, keeping the layout.
    fn zero(&mut self) {
        self.raw_mut().fill(0.0);
    }

    /// Largest stored magnitude.
    fn max_entry(&self) -> f64 {
        let data = self.as_slice();
        if data.len() >= PARALLEL_SCAN_THRESHOLD {
            data.par_iter().map(|v| v.abs()).reduce(|| 0.0, f64::max)
        } else {
            data.iter().fold(0.0, |m, v| m.max(v.abs()))
        }
    }

    /// Solve `A·x = b` for a single right-hand side.
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let b = DMatrix::from_column_slice(rhs.len(), 1, rhs);
        let x = self.solve_many(&b)?;
        Ok(x.as_slice().to_vec())
    }

    /// Add a dense element submatrix at the cross product of `indices`.
    ///
    /// Symmetric layouts receive each canonical cell once (entries with
    /// global row ≤ global column), so `submatrix` must be symmetric there.
    /// Every target cell is checked before anything is written.
    fn accumulate(&mut self, submatrix: &DMatrix<f64>, indices: &[usize]) -> Result<()> {
        let n = indices.len();
        if submatrix.nrows() != n || submatrix.ncols() != n {
            return Err(Error::Dimension(format!(
                "element matrix is {}x{} but {} global indices were given",
                submatrix.nrows(),
                submatrix.ncols(),
                n
            )));
        }

        let symmetric = self.is_symmetric();
        for &row in indices {
            for &col in indices {
                if !symmetric || row <= col {
                    self.offset(row, col)?;
                }
            }
        }

        for (p, &row) in indices.iter().enumerate() {
            for (q, &col) in indices.iter().enumerate() {
                if symmetric && row > col {
                    continue;
                }
                let value = submatrix[(p, q)];
                if value != 0.0 {
                    self.add(row, col, value)?;
                }
            }
        }
        Ok(())
    }

    /// Expand to a dense matrix; entries outside the band read as zero.
    fn to_dense(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.nrows(), self.ncols(), |r, c| {
            self.get(r, c).unwrap_or(0.0)
        })
    }
}

/// Check a vector length against the operator dimension.
pub(crate) fn check_len(kind: LayoutKind, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::Dimension(format!(
            "{kind} operator expects length {expected}, got {actual}"
        )));
    }
    Ok(())
}

/// Matrix product computed one column at a time through [`MatrixStorage::multiply`].
pub(crate) fn multiply_columns<S>(storage: &S, x: &DMatrix<f64>) -> Result<DMatrix<f64>>
where
    S: MatrixStorage + ?Sized,
{
    check_len(storage.kind(), storage.ncols(), x.nrows())?;
    let mut y = DMatrix::zeros(storage.nrows(), x.ncols());
    for (j, column) in x.column_iter().enumerate() {
        let column: Vec<f64> = column.iter().copied().collect();
        let product = storage.multiply(&column)?;
        y.column_mut(j).copy_from_slice(&product);
    }
    Ok(y)
}

/// Run an in-place triangular solve on every right-hand side column.
///
/// Columns are independent once the factorization exists, so several
/// right-hand sides are processed in parallel.
pub(crate) fn solve_columns<F>(rhs: &DMatrix<f64>, solve: F) -> DMatrix<f64>
where
    F: Fn(&mut [f64]) + Sync,
{
    let n = rhs.nrows();
    let mut columns: Vec<Vec<f64>> = rhs
        .column_iter()
        .map(|c| c.iter().copied().collect())
        .collect();
    if columns.len() > 1 {
        columns.par_iter_mut().for_each(|b| solve(b));
    } else {
        columns.iter_mut().for_each(|b| solve(b));
    }
    DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i])
}

/// Closed set of storage layouts for the global operator.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalMatrix {
    Full(FullMatrix),
    Band(BandMatrix),
    SymBand(SymBandMatrix),
    SymPack(SymPackMatrix),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            GlobalMatrix::Full($m) => $body,
            GlobalMatrix::Band($m) => $body,
            GlobalMatrix::SymBand($m) => $body,
            GlobalMatrix::SymPack($m) => $body,
        }
    };
}

impl GlobalMatrix {
    /// Allocate a zero-filled `n × n` store of the given layout.
    ///
    /// The bandwidth is clamped to `n - 1`; symmetric band storage uses the
    /// larger of the two sides.
    pub fn allocate(kind: LayoutKind, n: usize, bandwidth: Bandwidth) -> Self {
        let bw = bandwidth.clamp(n);
        let matrix = match kind {
            LayoutKind::Full => GlobalMatrix::Full(FullMatrix::new(n, n)),
            LayoutKind::Band => GlobalMatrix::Band(BandMatrix::new(n, bw.lower, bw.upper)),
            LayoutKind::SymBand => GlobalMatrix::SymBand(SymBandMatrix::new(n, bw.max())),
            LayoutKind::SymPack => GlobalMatrix::SymPack(SymPackMatrix::new(n)),
        };
        tracing::debug!(
            layout = %kind,
            n,
            bandwidth = %bw,
            entries = matrix.elem_count(),
            "allocated global matrix"
        );
        matrix
    }

    /// `self += alpha · other` for two stores of identical layout and shape.
    ///
    /// # Errors
    ///
    /// [`Error::LayoutMismatch`] when the layouts, shapes or bandwidths differ.
    pub fn add_scaled(&mut self, other: &GlobalMatrix, alpha: f64) -> Result<()> {
        if self.kind() != other.kind()
            || self.nrows() != other.nrows()
            || self.ncols() != other.ncols()
            || self.bandwidth() != other.bandwidth()
        {
            return Err(Error::LayoutMismatch(format!(
                "cannot combine {} {}x{} ({}) with {} {}x{} ({})",
                self.kind(),
                self.nrows(),
                self.ncols(),
                self.bandwidth(),
                other.kind(),
                other.nrows(),
                other.ncols(),
                other.bandwidth()
            )));
        }
        for (a, b) in self.raw_mut().iter_mut().zip(other.as_slice()) {
            *a += alpha * b;
        }
        Ok(())
    }
}

impl sealed::RawBuffer for GlobalMatrix {
    fn raw_mut(&mut self) -> &mut [f64] {
        dispatch!(self, m => m.raw_mut())
    }
}

impl MatrixStorage for GlobalMatrix {
    fn kind(&self) -> LayoutKind {
        dispatch!(self, m => m.kind())
    }

    fn nrows(&self) -> usize {
        dispatch!(self, m => m.nrows())
    }

    fn ncols(&self) -> usize {
        dispatch!(self, m => m.ncols())
    }

    fn bandwidth(&self) -> Bandwidth {
        dispatch!(self, m => m.bandwidth())
    }

    fn offset(&self, row: usize, col: usize) -> Result<usize> {
        dispatch!(self, m => m.offset(row, col))
    }

    fn as_slice(&self) -> &[f64] {
        dispatch!(self, m => m.as_slice())
    }

    fn multiply(&self, x: &[f64]) -> Result<Vec<f64>> {
        dispatch!(self, m => m.multiply(x))
    }

    fn multiply_matrix(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        dispatch!(self, m => m.multiply_matrix(x))
    }

    fn solve_many(&self, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        dispatch!(self, m => m.solve_many(rhs))
    }
}

impl From<FullMatrix> for GlobalMatrix {
    fn from(m: FullMatrix) -> Self {
        GlobalMatrix::Full(m)
    }
}

impl From<BandMatrix> for GlobalMatrix {
    fn from(m: BandMatrix) -> Self {
        GlobalMatrix::Band(m)
    }
}

impl From<SymBandMatrix> for GlobalMatrix {
    fn from(m: SymBandMatrix) -> Self {
        GlobalMatrix::SymBand(m)
    }
}

impl From<SymPackMatrix> for GlobalMatrix {
    fn from(m: SymPackMatrix) -> Self {
        GlobalMatrix::SymPack(m)
    }
}

impl fmt::Display for GlobalMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} matrix {}x{} ({}, {} stored entries)",
            self.kind(),
            self.nrows(),
            self.ncols(),
            self.bandwidth(),
            self.elem_count()
        )?;
        for r in 0..self.nrows() {
            for c in 0..self.ncols() {
                if c > 0 {
                    f.write_str(" ")?;
                }
                match self.get(r, c) {
                    Ok(v) => write!(f, "{v:12.4e}")?,
                    Err(_) => write!(f, "{:>12}", ".")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
