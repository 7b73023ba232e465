// src/fem/assembly.rs
//! Weak-form assembly of the pricing operator
//!
//! # Mathematical Description
//!
//! The generator in divergence form
//! ```text
//! L u = ½ ∇·(A∇u) + (b - ½ ∇·A)·∇u - r u
//! ```
//! is tested against each basis function and integrated by parts:
//! ```text
//! M_ij = ∫ φ_i φ_j
//! K_ij = ∫ ½ ∇φ_i·A∇φ_j - φ_i (b - ½ ∇·A)·∇φ_j + r φ_i φ_j
//! ```
//! so that the semi-discrete system reads `M u' + K u = f`, with `f` the
//! natural boundary load.
//!
//! # Determinism
//!
//! Element matrices are computed in parallel, collected in element order
//! and scattered into the shared CSR pattern on a single thread, so the
//! floating-point summation order never depends on scheduling.

use super::config::DiscretizationConfig;
use super::quadrature::QuadratureRule;
use super::space::{ElementGeometry, FunctionSpace};
use crate::error::{PdeError, PdeResult};
use crate::linalg::CsrMatrix;
use crate::math_utils::Timer;
use crate::models::PricingDynamics;
use rayon::prelude::*;

/// Mass and stiffness matrices on one function space
#[derive(Clone, Debug)]
pub struct SpatialOperators {
    pub mass: CsrMatrix,
    pub stiffness: CsrMatrix,
}

impl SpatialOperators {
    pub fn num_dofs(&self) -> usize {
        self.mass.n_rows()
    }
}

struct LocalMatrices {
    mass: Vec<f64>,
    stiffness: Vec<f64>,
}

pub struct OperatorBuilder<'a> {
    space: &'a FunctionSpace,
    rule: QuadratureRule,
}

impl<'a> OperatorBuilder<'a> {
    pub fn new(space: &'a FunctionSpace, config: &DiscretizationConfig) -> PdeResult<Self> {
        config.validate()?;
        if config.order != space.order() {
            return Err(PdeError::InvalidConfiguration {
                field: "order".to_string(),
                reason: format!(
                    "configuration asks for {:?} elements but the space is {:?}",
                    config.order,
                    space.order()
                ),
            });
        }
        Ok(OperatorBuilder {
            space,
            rule: QuadratureRule::simplex(space.dimension(), config.quadrature_degree()),
        })
    }

    pub fn space(&self) -> &FunctionSpace {
        self.space
    }

    /// Assemble `M` and `K` for the given dynamics.
    pub fn assemble(&self, dynamics: &dyn PricingDynamics) -> PdeResult<SpatialOperators> {
        if dynamics.dimension() != self.space.dimension() {
            return Err(PdeError::InvalidConfiguration {
                field: "dynamics".to_string(),
                reason: format!(
                    "{} model is {}-dimensional but the mesh is {}-dimensional",
                    dynamics.name(),
                    dynamics.dimension(),
                    self.space.dimension()
                ),
            });
        }

        let timer = Timer::new();
        let num_elements = self.space.mesh().num_elements();
        let locals: Vec<PdeResult<LocalMatrices>> = (0..num_elements)
            .into_par_iter()
            .map(|e| self.local_matrices(e, Some(dynamics)))
            .collect();

        let mut mass = CsrMatrix::zeros(self.space.pattern().clone());
        let mut stiffness = CsrMatrix::zeros(self.space.pattern().clone());
        let n = self.space.local_dofs();
        for (e, local) in locals.into_iter().enumerate() {
            let local = local?;
            let dofs = self.space.element_dofs(e);
            for (i, &row) in dofs.iter().enumerate() {
                for (j, &col) in dofs.iter().enumerate() {
                    scatter(&mut mass, e, row, col, local.mass[i * n + j])?;
                    scatter(&mut stiffness, e, row, col, local.stiffness[i * n + j])?;
                }
            }
        }

        log::debug!(
            "Assembled {} operator on {} elements ({} dofs, {} nonzeros) in {:.2} ms",
            dynamics.name(),
            num_elements,
            self.space.num_dofs(),
            mass.nnz(),
            timer.elapsed_ms()
        );

        Ok(SpatialOperators { mass, stiffness })
    }

    /// Assemble the mass matrix alone.
    pub fn assemble_mass(&self) -> PdeResult<CsrMatrix> {
        let num_elements = self.space.mesh().num_elements();
        let locals: Vec<PdeResult<LocalMatrices>> = (0..num_elements)
            .into_par_iter()
            .map(|e| self.local_matrices(e, None))
            .collect();
        let mut mass = CsrMatrix::zeros(self.space.pattern().clone());
        let n = self.space.local_dofs();
        for (e, local) in locals.into_iter().enumerate() {
            let local = local?;
            let dofs = self.space.element_dofs(e);
            for (i, &row) in dofs.iter().enumerate() {
                for (j, &col) in dofs.iter().enumerate() {
                    scatter(&mut mass, e, row, col, local.mass[i * n + j])?;
                }
            }
        }
        Ok(mass)
    }

    /// Load vector `(f, φ_i)`.
    pub fn load_vector<F>(&self, f: F) -> PdeResult<Vec<f64>>
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        let num_elements = self.space.mesh().num_elements();
        let locals: Vec<PdeResult<Vec<f64>>> = (0..num_elements)
            .into_par_iter()
            .map(|e| {
                let geometry = self.geometry(e)?;
                let mut local = vec![0.0; self.space.local_dofs()];
                for q in 0..self.rule.len() {
                    let lambda = self.rule.barycentric(q);
                    let x = geometry.map(self.rule.point(q));
                    let value = f(&x);
                    if !value.is_finite() {
                        return Err(PdeError::Assembly {
                            element: e,
                            reason: format!("non-finite load value at x = {:?}", x),
                        });
                    }
                    let w = self.rule.weight(q) * geometry.measure;
                    for (l, phi) in local.iter_mut().zip(self.space.shape_values(&lambda)) {
                        *l += w * value * phi;
                    }
                }
                Ok(local)
            })
            .collect();

        let mut load = vec![0.0; self.space.num_dofs()];
        for (e, local) in locals.into_iter().enumerate() {
            for (&dof, value) in self.space.element_dofs(e).iter().zip(local?) {
                load[dof] += value;
            }
        }
        Ok(load)
    }

    fn geometry(&self, e: usize) -> PdeResult<ElementGeometry> {
        ElementGeometry::new(self.space.mesh(), e).ok_or_else(|| PdeError::Assembly {
            element: e,
            reason: "singular element Jacobian".to_string(),
        })
    }

    fn local_matrices(
        &self,
        e: usize,
        dynamics: Option<&dyn PricingDynamics>,
    ) -> PdeResult<LocalMatrices> {
        let geometry = self.geometry(e)?;
        let n = self.space.local_dofs();
        let d = self.space.dimension();
        let mut mass = vec![0.0; n * n];
        let mut stiffness = vec![0.0; n * n];

        for q in 0..self.rule.len() {
            let lambda = self.rule.barycentric(q);
            let w = self.rule.weight(q) * geometry.measure;
            let phi = self.space.shape_values(&lambda);
            for i in 0..n {
                for j in 0..n {
                    mass[i * n + j] += w * phi[i] * phi[j];
                }
            }

            let Some(dynamics) = dynamics else {
                continue;
            };
            let x = geometry.map(self.rule.point(q));
            let a = dynamics.diffusion(&x);
            let div_a = dynamics.diffusion_divergence(&x);
            let b = dynamics.drift(&x);
            let r = dynamics.discount_rate(&x);
            let coefficients_finite = a.iter().all(|v| v.is_finite())
                && div_a.iter().all(|v| v.is_finite())
                && b.iter().all(|v| v.is_finite())
                && r.is_finite();
            if !coefficients_finite {
                return Err(PdeError::Assembly {
                    element: e,
                    reason: format!("non-finite {} coefficient at x = {:?}", dynamics.name(), x),
                });
            }

            // Effective advection μ = b - ½ ∇·A
            let mu: Vec<f64> = (0..d).map(|k| b[k] - 0.5 * div_a[k]).collect();
            let grads = self.space.shape_gradients(&lambda, &geometry);
            let a_grads: Vec<Vec<f64>> = grads
                .iter()
                .map(|g| (0..d).map(|k| (0..d).map(|l| a[(k, l)] * g[l]).sum()).collect())
                .collect();
            let mu_grads: Vec<f64> = grads
                .iter()
                .map(|g| g.iter().zip(&mu).map(|(gk, mk)| gk * mk).sum())
                .collect();

            for i in 0..n {
                for j in 0..n {
                    let diffusion: f64 = grads[i].iter().zip(&a_grads[j]).map(|(x, y)| x * y).sum();
                    stiffness[i * n + j] +=
                        w * (0.5 * diffusion - phi[i] * mu_grads[j] + r * phi[i] * phi[j]);
                }
            }
        }

        if mass.iter().chain(&stiffness).any(|v| !v.is_finite()) {
            return Err(PdeError::Assembly {
                element: e,
                reason: "non-finite local matrix entry".to_string(),
            });
        }

        Ok(LocalMatrices { mass, stiffness })
    }
}

/// Add one local entry, tagging pattern misses with the element they came from.
fn scatter(matrix: &mut CsrMatrix, element: usize, row: usize, col: usize, value: f64) -> PdeResult<()> {
    matrix.add(row, col, value).map_err(|err| PdeError::Assembly {
        element,
        reason: err.to_string(),
    })
}
