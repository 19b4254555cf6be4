//! General band storage with banded LU factorization.
//!
//! Column `c` of the buffer holds rows `c - ku ..= c + kl` of the operator,
//! shifted down by `kl` extra rows that receive fill-in from row interchanges
//! during factorization. With `ld = 2·kl + ku + 1` the entry `(r, c)` lives at
//! `(r - c + kl + ku) + c·ld`.

use super::{check_len, sealed, solve_columns, Bandwidth, LayoutKind, MatrixStorage};
use crate::error::{Error, Result};
use nalgebra::DMatrix;

/// Square banded matrix with `kl` sub-diagonals and `ku` super-diagonals.
#[derive(Debug, Clone, PartialEq)]
pub struct BandMatrix {
    n: usize,
    kl: usize,
    ku: usize,
    ld: usize,
    data: Vec<f64>,
}

impl BandMatrix {
    /// Zero-filled `n × n` band; both bandwidths are clamped to `n - 1`.
    pub fn new(n: usize, kl: usize, ku: usize) -> Self {
        let bw = Bandwidth::new(kl, ku).clamp(n);
        let ld = 2 * bw.lower + bw.upper + 1;
        Self {
            n,
            kl: bw.lower,
            ku: bw.upper,
            ld,
            data: vec![0.0; ld * n],
        }
    }

    /// Leading dimension of the physical buffer.
    pub fn leading_dim(&self) -> usize {
        self.ld
    }

    #[inline]
    fn at(&self, row: usize, col: usize) -> usize {
        row + self.kl + self.ku - col + col * self.ld
    }
}

impl sealed::RawBuffer for BandMatrix {
    fn raw_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

impl MatrixStorage for BandMatrix {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Band
    }

    fn nrows(&self) -> usize {
        self.n
    }

    fn ncols(&self) -> usize {
        self.n
    }

    fn bandwidth(&self) -> Bandwidth {
        Bandwidth::new(self.kl, self.ku)
    }

    fn offset(&self, row: usize, col: usize) -> Result<usize> {
        let inside = row < self.n
            && col < self.n
            && if row >= col {
                row - col <= self.kl
            } else {
                col - row <= self.ku
            };
        if !inside {
            return Err(Error::IndexOutOfBand {
                layout: LayoutKind::Band,
                row,
                col,
            });
        }
        Ok(self.at(row, col))
    }

    fn as_slice(&self) -> &[f64] {
        &self.data
    }

    fn multiply(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_len(LayoutKind::Band, self.n, x.len())?;
        let mut y = vec![0.0; self.n];
        for (col, &xc) in x.iter().enumerate() {
            if xc == 0.0 {
                continue;
            }
            let last = (col + self.kl).min(self.n - 1);
            for row in col.saturating_sub(self.ku)..=last {
                y[row] += self.data[self.at(row, col)] * xc;
            }
        }
        Ok(y)
    }

    fn multiply_matrix(&self, _x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        Err(Error::Unsupported(
            "general band layout only multiplies column vectors".into(),
        ))
    }

    fn solve_many(&self, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        check_len(LayoutKind::Band, self.n, rhs.nrows())?;
        let lu = BandLu::factor(self).map_err(|status| Error::SingularOperator {
            layout: LayoutKind::Band,
            status,
        })?;
        Ok(solve_columns(rhs, |b| lu.solve_in_place(b)))
    }
}

/// Banded LU factors with the row interchanges applied during elimination.
struct BandLu {
    n: usize,
    kl: usize,
    ku: usize,
    ld: usize,
    ab: Vec<f64>,
    ipiv: Vec<usize>,
}

impl BandLu {
    /// Factorize a copy of `m`; `Err` carries the 1-based index of the zero pivot.
    fn factor(m: &BandMatrix) -> std::result::Result<Self, usize> {
        let (n, kl, ku, ld) = (m.n, m.kl, m.ku, m.ld);
        let kv = kl + ku;
        let at = move |r: usize, c: usize| r + kv - c + c * ld;

        let mut ab = m.data.clone();
        for col in ab.chunks_mut(ld) {
            col[..kl].fill(0.0);
        }

        let mut ipiv = vec![0; n];
        // Last column touched by U so far; grows with each interchange.
        let mut ju = 0;
        for j in 0..n {
            let km = kl.min(n - 1 - j);

            let mut p = j;
            let mut pmax = ab[at(j, j)].abs();
            for i in j + 1..=j + km {
                let v = ab[at(i, j)].abs();
                if v > pmax {
                    pmax = v;
                    p = i;
                }
            }
            ipiv[j] = p;
            if ab[at(p, j)] == 0.0 {
                return Err(j + 1);
            }

            ju = ju.max((p + ku).min(n - 1));
            if p != j {
                for c in j..=ju {
                    ab.swap(at(p, c), at(j, c));
                }
            }

            let pivot = ab[at(j, j)];
            for i in j + 1..=j + km {
                ab[at(i, j)] /= pivot;
            }
            for c in j + 1..=ju {
                let t = ab[at(j, c)];
                if t != 0.0 {
                    for i in j + 1..=j + km {
                        ab[at(i, c)] -= ab[at(i, j)] * t;
                    }
                }
            }
        }

        Ok(Self { n, kl, ku, ld, ab, ipiv })
    }

    fn solve_in_place(&self, b: &mut [f64]) {
        let (n, kl, ld) = (self.n, self.kl, self.ld);
        let kv = kl + self.ku;
        let at = |r: usize, c: usize| r + kv - c + c * ld;

        for j in 0..n {
            let p = self.ipiv[j];
            if p != j {
                b.swap(p, j);
            }
            let bj = b[j];
            if bj != 0.0 {
                for i in j + 1..=j + kl.min(n - 1 - j) {
                    b[i] -= self.ab[at(i, j)] * bj;
                }
            }
        }

        for j in (0..n).rev() {
            b[j] /= self.ab[at(j, j)];
            let bj = b[j];
            for i in j.saturating_sub(kv)..j {
                b[i] -= self.ab[at(i, j)] * bj;
            }
        }
    }
}
