// src/linalg/csr.rs
//! Compressed sparse row matrices for finite-element operators
//!
//! Storage is `faer`'s row-major sparse format: the symbolic structure is a
//! [`SymbolicSparseRowMat`] computed once from element connectivity and
//! shared (behind an `Arc`) by every matrix assembled on the same function
//! space, so mass, stiffness and the θ-scheme operators can be combined
//! entry by entry. Values live next to the shared structure and are viewed
//! as a [`SparseRowMatRef`] whenever `faer` operates on the matrix.

use crate::error::{PdeError, PdeResult};
use faer::dyn_stack::{MemBuffer, MemStack};
use faer::matrix_free::LinOp;
use faer::sparse::{SparseRowMatRef, SymbolicSparseRowMat};
use faer::{MatMut, MatRef, Par};
use nalgebra::DMatrix;
use std::sync::Arc;

/// Sparsity structure of a square CSR matrix
#[derive(Debug, Clone)]
pub struct CsrPattern {
    symbolic: SymbolicSparseRowMat<usize>,
}

impl PartialEq for CsrPattern {
    fn eq(&self, other: &Self) -> bool {
        self.symbolic.row_ptr() == other.symbolic.row_ptr() && self.symbolic.col_idx() == other.symbolic.col_idx()
    }
}

impl Eq for CsrPattern {}

impl CsrPattern {
    /// Pattern coupling every pair of dofs that share an element.
    pub fn from_elements<'a, I>(n: usize, elements: I) -> Self
    where
        I: IntoIterator<Item = &'a [usize]>,
    {
        let mut rows: Vec<Vec<usize>> = vec![Vec::new(); n];
        for dofs in elements {
            for &i in dofs {
                rows[i].extend_from_slice(dofs);
            }
        }
        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut col_idx = Vec::new();
        row_ptr.push(0);
        for mut row in rows {
            row.sort_unstable();
            row.dedup();
            col_idx.extend(row);
            row_ptr.push(col_idx.len());
        }
        CsrPattern {
            symbolic: SymbolicSparseRowMat::new_checked(n, n, row_ptr, None, col_idx),
        }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.symbolic.nrows()
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.symbolic.col_idx().len()
    }

    #[inline]
    pub fn row_indices(&self, row: usize) -> &[usize] {
        self.symbolic.col_idx_of_row_raw(row)
    }

    fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        let row_ptr = self.symbolic.row_ptr();
        row_ptr[row]..row_ptr[row + 1]
    }

    /// Storage index of `(row, col)`, if the entry is part of the pattern.
    pub fn find_index(&self, row: usize, col: usize) -> Option<usize> {
        let start = self.row_range(row).start;
        self.row_indices(row)
            .binary_search(&col)
            .ok()
            .map(|local| start + local)
    }
}

/// Square CSR matrix over a shared pattern
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    pattern: Arc<CsrPattern>,
    values: Vec<f64>,
}

impl CsrMatrix {
    pub fn zeros(pattern: Arc<CsrPattern>) -> Self {
        let values = vec![0.0; pattern.nnz()];
        CsrMatrix { pattern, values }
    }

    pub fn pattern(&self) -> &Arc<CsrPattern> {
        &self.pattern
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.pattern.n_rows()
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Borrow the matrix as a `faer` sparse view.
    pub fn as_faer(&self) -> SparseRowMatRef<'_, usize, f64> {
        SparseRowMatRef::new(self.pattern.symbolic.as_ref(), &self.values)
    }

    /// Column indices and values of one row.
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let range = self.pattern.row_range(row);
        (self.pattern.row_indices(row), &self.values[range])
    }

    pub(crate) fn row_mut(&mut self, row: usize) -> (&[usize], &mut [f64]) {
        let range = self.pattern.row_range(row);
        (self.pattern.row_indices(row), &mut self.values[range])
    }

    /// Add `value` at `(row, col)`.
    ///
    /// Entries outside the pattern are reported as
    /// [`PdeError::SparsityPattern`] instead of being dropped.
    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f64) -> PdeResult<()> {
        match self.pattern.find_index(row, col) {
            Some(idx) => {
                self.values[idx] += value;
                Ok(())
            }
            None => Err(PdeError::SparsityPattern { row, col }),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.pattern
            .find_index(row, col)
            .map_or(0.0, |idx| self.values[idx])
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n_rows()).map(|i| self.get(i, i)).collect()
    }

    /// y = A x
    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        let n = self.n_rows();
        let op = self.as_faer();
        let par = Par::rayon(0);
        let mut buffer = MemBuffer::new(op.apply_scratch(1, par));
        op.apply(
            MatMut::from_column_major_slice_mut(y, n, 1),
            MatRef::from_column_major_slice(x, n, 1),
            par,
            MemStack::new(&mut buffer),
        );
    }

    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.n_rows()];
        self.mul_vec(x, &mut y);
        y
    }

    /// `alpha * self + beta * other` on the shared pattern.
    ///
    /// Both matrices must come from the same pattern.
    pub fn linear_combination(&self, alpha: f64, other: &CsrMatrix, beta: f64) -> CsrMatrix {
        debug_assert!(
            Arc::ptr_eq(&self.pattern, &other.pattern) || *self.pattern == *other.pattern,
            "matrices must share a sparsity pattern"
        );
        let values = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| alpha * a + beta * b)
            .collect();
        CsrMatrix {
            pattern: Arc::clone(&self.pattern),
            values,
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.n_rows();
        let mut dense = DMatrix::zeros(n, n);
        for i in 0..n {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                dense[(i, j)] += v;
            }
        }
        dense
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        (0..self.n_rows()).all(|i| {
            let (cols, vals) = self.row(i);
            cols.iter()
                .zip(vals)
                .all(|(&j, &v)| (v - self.get(j, i)).abs() <= tol * v.abs().max(1.0))
        })
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tridiagonal(n: usize) -> CsrMatrix {
        let elements: Vec<[usize; 2]> = (0..n - 1).map(|i| [i, i + 1]).collect();
        let pattern = Arc::new(CsrPattern::from_elements(n, elements.iter().map(|e| &e[..])));
        let mut a = CsrMatrix::zeros(pattern);
        for e in &elements {
            a.add(e[0], e[0], 2.0).unwrap();
            a.add(e[1], e[1], 2.0).unwrap();
            a.add(e[0], e[1], -1.0).unwrap();
            a.add(e[1], e[0], -1.0).unwrap();
        }
        a
    }

    #[test]
    fn test_pattern_from_elements() {
        let a = tridiagonal(4);
        assert_eq!(a.nnz(), 10);
        assert_eq!(a.pattern().row_indices(1), &[0, 1, 2]);
        assert!(a.pattern().find_index(0, 3).is_none());
        assert_eq!(a.as_faer().compute_nnz(), 10);
    }

    #[test]
    fn test_add_outside_pattern_is_rejected() {
        let mut a = tridiagonal(4);
        assert!(matches!(a.add(0, 3, 1.0), Err(PdeError::SparsityPattern { row: 0, col: 3 })));
        assert_eq!(a.get(0, 3), 0.0);
    }

    #[test]
    fn test_mul_vec_and_dense_agree() {
        let a = tridiagonal(5);
        let x = [1.0, -2.0, 0.5, 3.0, 1.5];
        let y = a.apply(&x);
        let dense = a.to_dense() * nalgebra::DVector::from_column_slice(&x);
        for i in 0..5 {
            assert!((y[i] - dense[i]).abs() < 1e-14);
        }
        assert!(a.is_symmetric(1e-14));
    }

    #[test]
    fn test_linear_combination() {
        let a = tridiagonal(3);
        let b = a.linear_combination(1.0, &a, 0.5);
        assert_eq!(b.get(1, 1), 6.0);
        assert_eq!(b.get(0, 1), -1.5);
        assert!(Arc::ptr_eq(a.pattern(), b.pattern()));
    }
}
