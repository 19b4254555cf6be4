//! Symmetric band storage (lower triangle) with banded Cholesky.
//!
//! Column `c` holds the diagonal followed by the `k` entries below it, so
//! `(r, c)` and `(c, r)` both resolve to `|r - c| + min(r, c)·(k + 1)`.

use super::{
    check_len, multiply_columns, sealed, solve_columns, Bandwidth, LayoutKind, MatrixStorage,
};
use crate::error::{Error, Result};
use nalgebra::DMatrix;

/// Symmetric `n × n` band of half-bandwidth `k`.
#[derive(Debug, Clone, PartialEq)]
pub struct SymBandMatrix {
    n: usize,
    k: usize,
    data: Vec<f64>,
}

impl SymBandMatrix {
    /// Zero-filled band; `k` is clamped to `n - 1`.
    pub fn new(n: usize, k: usize) -> Self {
        let k = k.min(n.saturating_sub(1));
        Self {
            n,
            k,
            data: vec![0.0; (k + 1) * n],
        }
    }

    /// Half-bandwidth.
    pub fn half_bandwidth(&self) -> usize {
        self.k
    }
}

impl sealed::RawBuffer for SymBandMatrix {
    fn raw_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

impl MatrixStorage for SymBandMatrix {
    fn kind(&self) -> LayoutKind {
        LayoutKind::SymBand
    }

    fn nrows(&self) -> usize {
        self.n
    }

    fn ncols(&self) -> usize {
        self.n
    }

    fn bandwidth(&self) -> Bandwidth {
        Bandwidth::symmetric(self.k)
    }

    fn offset(&self, row: usize, col: usize) -> Result<usize> {
        let distance = row.abs_diff(col);
        if row >= self.n || col >= self.n || distance > self.k {
            return Err(Error::IndexOutOfBand {
                layout: LayoutKind::SymBand,
                row,
                col,
            });
        }
        Ok(distance + row.min(col) * (self.k + 1))
    }

    fn as_slice(&self) -> &[f64] {
        &self.data
    }

    fn multiply(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_len(LayoutKind::SymBand, self.n, x.len())?;
        let ld = self.k + 1;
        let mut y = vec![0.0; self.n];
        for j in 0..self.n {
            let col = &self.data[j * ld..(j + 1) * ld];
            y[j] += col[0] * x[j];
            for d in 1..=self.k.min(self.n - 1 - j) {
                y[j + d] += col[d] * x[j];
                y[j] += col[d] * x[j + d];
            }
        }
        Ok(y)
    }

    fn multiply_matrix(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        multiply_columns(self, x)
    }

    fn solve_many(&self, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        check_len(LayoutKind::SymBand, self.n, rhs.nrows())?;
        let factor = BandCholesky::factor(self).map_err(|status| Error::SingularOperator {
            layout: LayoutKind::SymBand,
            status,
        })?;
        Ok(solve_columns(rhs, |b| factor.solve_in_place(b)))
    }
}

/// Lower banded Cholesky factor `L` with `A = L·Lᵀ`.
struct BandCholesky {
    n: usize,
    k: usize,
    l: Vec<f64>,
}

impl BandCholesky {
    /// `Err` carries the 1-based index of the first non-positive pivot.
    fn factor(m: &SymBandMatrix) -> std::result::Result<Self, usize> {
        let (n, k) = (m.n, m.k);
        let ld = k + 1;
        let mut l = m.data.clone();

        for j in 0..n {
            let ajj = l[j * ld];
            if ajj <= 0.0 || !ajj.is_finite() {
                return Err(j + 1);
            }
            let ljj = ajj.sqrt();
            l[j * ld] = ljj;

            let kn = k.min(n - 1 - j);
            for d in 1..=kn {
                l[d + j * ld] /= ljj;
            }
            for c in 1..=kn {
                let lc = l[c + j * ld];
                if lc == 0.0 {
                    continue;
                }
                for r in c..=kn {
                    l[(r - c) + (j + c) * ld] -= l[r + j * ld] * lc;
                }
            }
        }

        Ok(Self { n, k, l })
    }

    fn solve_in_place(&self, b: &mut [f64]) {
        let (n, k) = (self.n, self.k);
        let ld = k + 1;

        for j in 0..n {
            b[j] /= self.l[j * ld];
            let bj = b[j];
            for d in 1..=k.min(n - 1 - j) {
                b[j + d] -= self.l[d + j * ld] * bj;
            }
        }

        for j in (0..n).rev() {
            let mut s = b[j];
            for d in 1..=k.min(n - 1 - j) {
                s -= self.l[d + j * ld] * b[j + d];
            }
            b[j] = s / self.l[j * ld];
        }
    }
}
