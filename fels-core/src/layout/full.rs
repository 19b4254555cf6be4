//! Dense column-major storage.

use super::{check_len, sealed, Bandwidth, LayoutKind, MatrixStorage};
use crate::error::{Error, Result};
use nalgebra::{DMatrix, DMatrixView, DVector};

/// Dense `nrows × ncols` matrix stored column by column.
///
/// The buffer layout matches nalgebra's, so products and the LU solve run on
/// a borrowed view without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct FullMatrix {
    nrows: usize,
    ncols: usize,
    data: Vec<f64>,
}

impl FullMatrix {
    /// Zero-filled matrix.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            data: vec![0.0; nrows * ncols],
        }
    }

    /// Copy a dense nalgebra matrix.
    pub fn from_dense(matrix: &DMatrix<f64>) -> Self {
        Self {
            nrows: matrix.nrows(),
            ncols: matrix.ncols(),
            data: matrix.as_slice().to_vec(),
        }
    }

    fn view(&self) -> DMatrixView<'_, f64> {
        DMatrixView::from_slice(&self.data, self.nrows, self.ncols)
    }
}

impl sealed::RawBuffer for FullMatrix {
    fn raw_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

impl MatrixStorage for FullMatrix {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Full
    }

    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn bandwidth(&self) -> Bandwidth {
        Bandwidth::new(self.nrows.saturating_sub(1), self.ncols.saturating_sub(1))
    }

    fn offset(&self, row: usize, col: usize) -> Result<usize> {
        if row >= self.nrows || col >= self.ncols {
            return Err(Error::IndexOutOfBand {
                layout: LayoutKind::Full,
                row,
                col,
            });
        }
        Ok(row + col * self.nrows)
    }

    fn as_slice(&self) -> &[f64] {
        &self.data
    }

    fn multiply(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_len(LayoutKind::Full, self.ncols, x.len())?;
        let y = self.view() * DVector::from_column_slice(x);
        Ok(y.as_slice().to_vec())
    }

    fn multiply_matrix(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        check_len(LayoutKind::Full, self.ncols, x.nrows())?;
        Ok(self.view() * x)
    }

    fn solve_many(&self, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if self.nrows != self.ncols {
            return Err(Error::Dimension(format!(
                "cannot factorize a non-square {}x{} matrix",
                self.nrows, self.ncols
            )));
        }
        let n = self.nrows;
        check_len(LayoutKind::Full, n, rhs.nrows())?;
        if n == 0 {
            return Ok(DMatrix::zeros(0, rhs.ncols()));
        }

        let lu = self.view().clone_owned().lu();
        match lu.solve(rhs) {
            Some(x) => Ok(x),
            None => {
                let status = lu
                    .u()
                    .diagonal()
                    .iter()
                    .position(|p| *p == 0.0)
                    .map_or(n, |i| i + 1);
                Err(Error::SingularOperator {
                    layout: LayoutKind::Full,
                    status,
                })
            }
        }
    }
}
