// src/linalg/solver.rs
//! Linear solvers for the θ-scheme systems
//!
//! - [`SolverMethod::DenseLu`]: partial-pivoting LU from `nalgebra`, factored
//!   once and reused for every right-hand side
//! - [`SolverMethod::BiCgStab`]: `faer`'s BiCGStab on the sparse matrix with
//!   a right Jacobi preconditioner, for systems too large to factor densely
//! - [`SolverMethod::Auto`]: LU up to `dense_threshold` unknowns, BiCGStab above
//!
//! A factorization whose pivots span more than fourteen orders of magnitude
//! is rejected as numerically singular.

use super::csr::CsrMatrix;
use crate::error::{validation::*, PdeError, PdeResult};
use faer::dyn_stack::{MemBuffer, MemStack};
use faer::matrix_free::bicgstab::{bicgstab, bicgstab_scratch, BicgError, BicgParams};
use faer::matrix_free::{IdentityPrecond, InitialGuessStatus};
use faer::{Col, MatMut, MatRef, Par};
use nalgebra::{linalg::LU, DVector, Dynamic};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverMethod {
    Auto,
    DenseLu,
    BiCgStab,
}

/// Linear solver configuration
#[derive(Clone, Debug)]
pub struct SolverConfig {
    pub method: SolverMethod,
    /// Relative residual tolerance of the iterative solver
    pub rtol: f64,
    /// Absolute residual tolerance of the iterative solver
    pub atol: f64,
    pub max_iterations: usize,
    /// Largest system `Auto` factors densely
    pub dense_threshold: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            method: SolverMethod::Auto,
            rtol: 1e-10,
            atol: 1e-14,
            max_iterations: 2000,
            dense_threshold: 1000,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> PdeResult<()> {
        validate_positive("rtol", self.rtol)?;
        validate_non_negative("atol", self.atol)?;
        validate_count("max_iterations", self.max_iterations)?;
        if self.rtol >= 1.0 {
            return Err(PdeError::InvalidConfiguration {
                field: "rtol".to_string(),
                reason: format!("relative tolerance {} must be below 1", self.rtol),
            });
        }
        Ok(())
    }

    fn resolve(&self, n: usize) -> SolverMethod {
        match self.method {
            SolverMethod::Auto if n <= self.dense_threshold => SolverMethod::DenseLu,
            SolverMethod::Auto => SolverMethod::BiCgStab,
            other => other,
        }
    }
}

/// Smallest allowed ratio between the smallest and largest LU pivot.
const PIVOT_RATIO_LIMIT: f64 = 1e-14;

/// Convergence report of an iterative solve
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterativeReport {
    pub iterations: usize,
    pub residual_norm: f64,
    pub relative_residual: f64,
}

/// A matrix prepared for repeated solves
pub enum LinearSolver {
    Dense(LU<f64, Dynamic, Dynamic>),
    Iterative {
        matrix: CsrMatrix,
        inverse_diagonal: Col<f64>,
        config: SolverConfig,
    },
}

impl LinearSolver {
    pub fn factor(matrix: &CsrMatrix, config: &SolverConfig) -> PdeResult<Self> {
        if !matrix.is_finite() {
            return Err(PdeError::LinearSolve {
                method: "factor".to_string(),
                reason: "matrix has non-finite entries".to_string(),
            });
        }
        match config.resolve(matrix.n_rows()) {
            SolverMethod::DenseLu => {
                let lu = matrix.to_dense().lu();
                let pivots = lu.u().diagonal();
                let (min, max) = pivots.iter().fold((f64::INFINITY, 0.0f64), |(lo, hi), p| {
                    (lo.min(p.abs()), hi.max(p.abs()))
                });
                if !(max > 0.0) || min / max < PIVOT_RATIO_LIMIT {
                    return Err(PdeError::LinearSolve {
                        method: "LU".to_string(),
                        reason: format!(
                            "singular or ill-conditioned system (pivot ratio {:.3e})",
                            if max > 0.0 { min / max } else { 0.0 }
                        ),
                    });
                }
                Ok(LinearSolver::Dense(lu))
            }
            _ => {
                let diagonal = matrix.diagonal();
                let inverse_diagonal =
                    Col::from_fn(diagonal.len(), |i| if diagonal[i].abs() > 0.0 { 1.0 / diagonal[i] } else { 1.0 });
                Ok(LinearSolver::Iterative {
                    matrix: matrix.clone(),
                    inverse_diagonal,
                    config: config.clone(),
                })
            }
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            LinearSolver::Dense(_) => "LU",
            LinearSolver::Iterative { .. } => "BiCGStab",
        }
    }

    /// Solve `A x = b`; `guess` seeds the iterative solver.
    pub fn solve(&self, b: &[f64], guess: Option<&[f64]>) -> PdeResult<Vec<f64>> {
        let x = match self {
            LinearSolver::Dense(lu) => lu
                .solve(&DVector::from_column_slice(b))
                .map(|x| x.as_slice().to_vec())
                .ok_or_else(|| PdeError::LinearSolve {
                    method: "LU".to_string(),
                    reason: "singular system".to_string(),
                })?,
            LinearSolver::Iterative {
                matrix,
                inverse_diagonal,
                config,
            } => {
                let mut x = guess.map_or_else(|| vec![0.0; b.len()], |g| g.to_vec());
                let report = iterative_solve(matrix, inverse_diagonal, b, &mut x, guess.is_some(), config)?;
                log::trace!(
                    "BiCGStab converged in {} iterations (relative residual {:.3e})",
                    report.iterations,
                    report.relative_residual
                );
                x
            }
        };
        if x.iter().any(|v| !v.is_finite()) {
            return Err(PdeError::LinearSolve {
                method: self.method_name().to_string(),
                reason: "solution has non-finite entries".to_string(),
            });
        }
        Ok(x)
    }
}

/// Right-preconditioned BiCGStab on `faer`'s sparse operator.
fn iterative_solve(
    matrix: &CsrMatrix,
    inverse_diagonal: &Col<f64>,
    b: &[f64],
    x: &mut [f64],
    seeded: bool,
    config: &SolverConfig,
) -> PdeResult<IterativeReport> {
    let n = b.len();
    let op = matrix.as_faer();
    let left = IdentityPrecond { dim: n };
    let right = inverse_diagonal.as_diagonal();
    let par = Par::Seq;
    let params = BicgParams {
        initial_guess: if seeded {
            InitialGuessStatus::MaybeNonZero
        } else {
            InitialGuessStatus::Zero
        },
        abs_tolerance: config.atol,
        rel_tolerance: config.rtol,
        max_iters: config.max_iterations,
        ..Default::default()
    };
    let mut buffer = MemBuffer::new(bicgstab_scratch(left, right, op, 1, par));
    let result = bicgstab(
        MatMut::from_column_major_slice_mut(x, n, 1),
        left,
        right,
        op,
        MatRef::from_column_major_slice(b, n, 1),
        params,
        |_| {},
        par,
        MemStack::new(&mut buffer),
    );
    match result {
        Ok(info) => Ok(IterativeReport {
            iterations: info.iter_count,
            residual_norm: info.abs_residual,
            relative_residual: info.rel_residual,
        }),
        Err(BicgError::NoConvergence {
            abs_residual,
            rel_residual,
        }) => Err(PdeError::LinearSolve {
            method: "BiCGStab".to_string(),
            reason: format!(
                "no convergence within {} iterations (residual {:.3e}, relative {:.3e})",
                config.max_iterations, abs_residual, rel_residual
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::csr::CsrPattern;
    use std::sync::Arc;

    fn convection_diffusion(n: usize) -> CsrMatrix {
        let elements: Vec<[usize; 2]> = (0..n - 1).map(|i| [i, i + 1]).collect();
        let pattern = Arc::new(CsrPattern::from_elements(n, elements.iter().map(|e| &e[..])));
        let mut a = CsrMatrix::zeros(pattern);
        for i in 0..n {
            a.add(i, i, 4.0).unwrap();
            if i > 0 {
                a.add(i, i - 1, -1.5).unwrap();
            }
            if i + 1 < n {
                a.add(i, i + 1, -0.5).unwrap();
            }
        }
        a
    }

    #[test]
    fn test_bicgstab_matches_lu() {
        let a = convection_diffusion(60);
        let b: Vec<f64> = (0..60).map(|i| (i as f64 * 0.3).sin()).collect();
        let lu = LinearSolver::factor(
            &a,
            &SolverConfig {
                method: SolverMethod::DenseLu,
                ..SolverConfig::default()
            },
        )
        .unwrap();
        let iterative = LinearSolver::factor(
            &a,
            &SolverConfig {
                method: SolverMethod::BiCgStab,
                ..SolverConfig::default()
            },
        )
        .unwrap();
        assert_eq!(lu.method_name(), "LU");
        assert_eq!(iterative.method_name(), "BiCGStab");
        let x1 = lu.solve(&b, None).unwrap();
        let x2 = iterative.solve(&b, None).unwrap();
        for (u, v) in x1.iter().zip(&x2) {
            assert!((u - v).abs() < 1e-8, "{} vs {}", u, v);
        }
    }

    #[test]
    fn test_exact_guess_needs_no_iterations() {
        let a = convection_diffusion(40);
        let exact: Vec<f64> = (0..40).map(|i| 1.0 + 0.1 * i as f64).collect();
        let b = a.apply(&exact);
        let config = SolverConfig {
            method: SolverMethod::BiCgStab,
            rtol: 1e-8,
            ..SolverConfig::default()
        };
        let inverse_diagonal = Col::from_fn(40, |_| 0.25);
        let mut x = exact.clone();
        let report = iterative_solve(&a, &inverse_diagonal, &b, &mut x, true, &config).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(x, exact);

        let mut cold = vec![0.0; 40];
        let report = iterative_solve(&a, &inverse_diagonal, &b, &mut cold, false, &config).unwrap();
        assert!(report.iterations > 0);
        assert!(report.relative_residual <= 1e-8);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let mut a = convection_diffusion(4);
        // Zero out the last row
        let (_, vals) = a.row_mut(3);
        vals.iter_mut().for_each(|v| *v = 0.0);
        let err = LinearSolver::factor(
            &a,
            &SolverConfig {
                method: SolverMethod::DenseLu,
                ..SolverConfig::default()
            },
        );
        assert!(matches!(err, Err(PdeError::LinearSolve { .. })));
    }

    #[test]
    fn test_iteration_limit_reported() {
        let a = convection_diffusion(200);
        let b = vec![1.0; 200];
        let config = SolverConfig {
            method: SolverMethod::BiCgStab,
            max_iterations: 1,
            rtol: 1e-14,
            ..SolverConfig::default()
        };
        let solver = LinearSolver::factor(&a, &config).unwrap();
        match solver.solve(&b, None) {
            Err(PdeError::LinearSolve { reason, .. }) => assert!(reason.contains("no convergence")),
            other => panic!("unexpected {:?}", other.map(|x| x.len())),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(SolverConfig::default().validate().is_ok());
        let bad = SolverConfig {
            rtol: 0.0,
            ..SolverConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
