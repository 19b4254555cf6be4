//! Symmetric packed storage (upper triangle by columns) with `UᵀDU` factorization.

use super::{
    check_len, multiply_columns, sealed, solve_columns, Bandwidth, LayoutKind, MatrixStorage,
};
use crate::error::{Error, Result};
use nalgebra::DMatrix;

/// Symmetric `n × n` matrix storing only its upper triangle, `n(n+1)/2` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct SymPackMatrix {
    n: usize,
    data: Vec<f64>,
}

/// Offset of `(r, c)` with `r ≤ c`.
#[inline]
fn packed(r: usize, c: usize) -> usize {
    c * (c + 1) / 2 + r
}

impl SymPackMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * (n + 1) / 2],
        }
    }
}

impl sealed::RawBuffer for SymPackMatrix {
    fn raw_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

impl MatrixStorage for SymPackMatrix {
    fn kind(&self) -> LayoutKind {
        LayoutKind::SymPack
    }

    fn nrows(&self) -> usize {
        self.n
    }

    fn ncols(&self) -> usize {
        self.n
    }

    fn bandwidth(&self) -> Bandwidth {
        Bandwidth::full(self.n)
    }

    fn offset(&self, row: usize, col: usize) -> Result<usize> {
        if row >= self.n || col >= self.n {
            return Err(Error::IndexOutOfBand {
                layout: LayoutKind::SymPack,
                row,
                col,
            });
        }
        Ok(if row <= col { packed(row, col) } else { packed(col, row) })
    }

    fn as_slice(&self) -> &[f64] {
        &self.data
    }

    fn multiply(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_len(LayoutKind::SymPack, self.n, x.len())?;
        let mut y = vec![0.0; self.n];
        for c in 0..self.n {
            let base = packed(0, c);
            for r in 0..c {
                let a = self.data[base + r];
                y[r] += a * x[c];
                y[c] += a * x[r];
            }
            y[c] += self.data[base + c] * x[c];
        }
        Ok(y)
    }

    fn multiply_matrix(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        multiply_columns(self, x)
    }

    fn solve_many(&self, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        check_len(LayoutKind::SymPack, self.n, rhs.nrows())?;
        let factor = PackedLdl::factor(self).map_err(|status| Error::SingularOperator {
            layout: LayoutKind::SymPack,
            status,
        })?;
        Ok(solve_columns(rhs, |b| factor.solve_in_place(b)))
    }
}

/// `A = Uᵀ·D·U` with unit upper `U` stored off the diagonal and `D` on it.
///
/// No pivoting: indefinite operators factor as long as no leading minor vanishes.
struct PackedLdl {
    n: usize,
    ap: Vec<f64>,
}

impl PackedLdl {
    /// `Err` carries the 1-based index of the first zero pivot.
    fn factor(m: &SymPackMatrix) -> std::result::Result<Self, usize> {
        let n = m.n;
        let mut ap = m.data.clone();

        for j in 0..n {
            let cj = packed(0, j);
            // Column j first holds D(i)·U(i, j), then is scaled to U(i, j).
            for i in 0..j {
                let ci = packed(0, i);
                let mut s = ap[cj + i];
                for k in 0..i {
                    s -= ap[ci + k] * ap[cj + k];
                }
                ap[cj + i] = s;
            }
            let mut d = ap[cj + j];
            for i in 0..j {
                let t = ap[cj + i];
                let u = t / ap[packed(i, i)];
                d -= u * t;
                ap[cj + i] = u;
            }
            if d == 0.0 || !d.is_finite() {
                return Err(j + 1);
            }
            ap[cj + j] = d;
        }

        Ok(Self { n, ap })
    }

    fn solve_in_place(&self, b: &mut [f64]) {
        let n = self.n;

        for j in 0..n {
            let cj = packed(0, j);
            let mut s = b[j];
            for i in 0..j {
                s -= self.ap[cj + i] * b[i];
            }
            b[j] = s;
        }

        for (j, bj) in b.iter_mut().enumerate().take(n) {
            *bj /= self.ap[packed(j, j)];
        }

        for j in (0..n).rev() {
            let cj = packed(0, j);
            let xj = b[j];
            for i in 0..j {
                b[i] -= self.ap[cj + i] * xj;
            }
        }
    }
}
