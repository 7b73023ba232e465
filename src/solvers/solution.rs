// src/solvers/solution.rs
use crate::fem::FunctionSpace;
use ndarray::{Array2, ArrayView1, Axis};

/// Coefficient vectors of the discrete solution, one row per time point
#[derive(Clone, Debug)]
pub struct SolutionGrid {
    space: FunctionSpace,
    times: Vec<f64>,
    values: Array2<f64>,
}

impl SolutionGrid {
    pub(crate) fn new(space: FunctionSpace, times: Vec<f64>, values: Array2<f64>) -> Self {
        debug_assert_eq!(values.nrows(), times.len());
        debug_assert_eq!(values.ncols(), space.num_dofs());
        SolutionGrid {
            space,
            times,
            values,
        }
    }

    pub fn space(&self) -> &FunctionSpace {
        &self.space
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.index_axis(Axis(0), index)
    }

    pub fn final_values(&self) -> ArrayView1<'_, f64> {
        self.row(self.len() - 1)
    }

    /// `(τ, coefficients)` in time order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, ArrayView1<'_, f64>)> + '_ {
        self.times
            .iter()
            .copied()
            .zip(self.values.axis_iter(Axis(0)))
    }

    /// Solution at time index `index` and physical point `x`.
    pub fn value_at(&self, index: usize, x: &[f64]) -> Option<f64> {
        let row = self.row(index);
        let coefficients = row.as_slice()?;
        self.space.evaluate(coefficients, x)
    }

    /// Solution at the last time point.
    pub fn final_value_at(&self, x: &[f64]) -> Option<f64> {
        self.value_at(self.len() - 1, x)
    }
}
