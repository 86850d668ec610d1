//! Dense real matrices and row/column selections over them.

use bitvec::prelude::*;
use rand::Rng;
use std::ops::Index;

use crate::error::{MsrError, Result};

/// Representation of a real matrix as a flattened row-major order vector.
#[derive(Clone, Debug, PartialEq)]
pub struct PlainMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl PlainMatrix {
    /// Constructs the `rows x cols` zero matrix.
    pub fn zero(rows: usize, cols: usize) -> Self {
        PlainMatrix {
            rows,
            cols,
            data: vec![0_f64; rows * cols],
        }
    }

    /// Wraps a row-major vector of length `rows * cols`.
    pub fn from_flat(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(MsrError::ShapeMismatch {
                expected: format!("{} values for {rows}x{cols}", rows * cols),
                actual: format!("{} values", data.len()),
            });
        }
        Ok(PlainMatrix { rows, cols, data })
    }

    /// Builds a matrix from nested rows. Ragged input is rejected.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(MsrError::ShapeMismatch {
                    expected: format!("{cols} columns"),
                    actual: format!("{} columns in row {i}", row.len()),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(PlainMatrix {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Fills a matrix by evaluating `f(row, col)`.
    pub fn from_fn<F: FnMut(usize, usize) -> f64>(rows: usize, cols: usize, mut f: F) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        PlainMatrix { rows, cols, data }
    }

    /// Samples every entry uniformly from `[low, high)`.
    pub fn rand_uniform<T: Rng>(
        rng: &mut T,
        rows: usize,
        cols: usize,
        low: f64,
        high: f64,
    ) -> Self {
        Self::from_fn(rows, cols, |_, _| rng.gen_range(low..high))
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// The row-major flattening.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Row-major values of rows `start..end`, clamped to the matrix.
    pub fn row_block(&self, start: usize, end: usize) -> &[f64] {
        let start = start.min(self.rows);
        let end = end.min(self.rows).max(start);
        &self.data[start * self.cols..end * self.cols]
    }

    /// Extracts the submatrix of selected rows and columns, keeping their order.
    pub fn select(&self, selection: &Selection) -> Result<Self> {
        if selection.rows.len() != self.rows || selection.cols.len() != self.cols {
            return Err(MsrError::ShapeMismatch {
                expected: format!("selection over {}x{}", self.rows, self.cols),
                actual: format!(
                    "selection over {}x{}",
                    selection.rows.len(),
                    selection.cols.len()
                ),
            });
        }
        let cols = selection.col_indices();
        let mut data = Vec::with_capacity(selection.num_rows() * selection.num_cols());
        for r in selection.row_indices() {
            let row = self.row(r);
            data.extend(cols.iter().map(|&c| row[c]));
        }
        Ok(PlainMatrix {
            rows: selection.num_rows(),
            cols: selection.num_cols(),
            data,
        })
    }
}

/// Indexing

impl Index<(usize, usize)> for PlainMatrix {
    type Output = f64;

    /// Returns the `(row, col)` element of the matrix.
    fn index(&self, index: (usize, usize)) -> &Self::Output {
        debug_assert!(index.0 < self.rows, "index out of bounds");
        debug_assert!(index.1 < self.cols, "index out of bounds");
        &self.data[index.0 * self.cols + index.1]
    }
}

///
/// The rows and columns of a data matrix currently belonging to a bicluster.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub rows: BitVec,
    pub cols: BitVec,
}

impl Selection {
    /// Selects every row and column of a `rows x cols` matrix.
    pub fn all(rows: usize, cols: usize) -> Self {
        Selection {
            rows: bitvec![1; rows],
            cols: bitvec![1; cols],
        }
    }

    pub fn from_masks(rows: &[bool], cols: &[bool]) -> Self {
        Selection {
            rows: rows.iter().copied().collect(),
            cols: cols.iter().copied().collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.count_ones()
    }

    pub fn num_cols(&self) -> usize {
        self.cols.count_ones()
    }

    pub fn row_indices(&self) -> Vec<usize> {
        self.rows.iter_ones().collect()
    }

    pub fn col_indices(&self) -> Vec<usize> {
        self.cols.iter_ones().collect()
    }
}
