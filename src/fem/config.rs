// src/fem/config.rs
use crate::error::{validation::*, PdeError, PdeResult};
use crate::linalg::SolverConfig;

/// Polynomial degree of the Lagrange elements
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementOrder {
    Linear,
    Quadratic,
}

impl ElementOrder {
    pub fn degree(&self) -> usize {
        match self {
            ElementOrder::Linear => 1,
            ElementOrder::Quadratic => 2,
        }
    }
}

/// How the terminal payoff becomes the initial coefficient vector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialCondition {
    /// Nodal values of the payoff
    Interpolation,
    /// Solve `M u₀ = (g, φ_i)`
    L2Projection,
}

/// Limits of the adaptive loop and of mesh growth
#[derive(Clone, Debug)]
pub struct RefinementLimits {
    pub max_iterations: usize,
    /// Stop once the global estimate falls to or below this value
    pub tolerance: f64,
    /// Coarsening never goes below this many elements
    pub min_elements: usize,
    /// Refinement stops once a new mesh would exceed this many elements
    pub max_elements: usize,
    /// Refine elements with η_T > refine_fraction · max η
    pub refine_fraction: f64,
    /// Coarsen elements with η_T ≤ coarsen_fraction · max η
    pub coarsen_fraction: Option<f64>,
}

impl Default for RefinementLimits {
    fn default() -> Self {
        RefinementLimits {
            max_iterations: 8,
            tolerance: 1e-3,
            min_elements: 4,
            max_elements: 200_000,
            refine_fraction: 0.5,
            coarsen_fraction: None,
        }
    }
}

impl RefinementLimits {
    pub fn validate(&self) -> PdeResult<()> {
        validate_count("max_iterations", self.max_iterations)?;
        validate_non_negative("tolerance", self.tolerance)?;
        validate_count("max_elements", self.max_elements)?;
        validate_range("refine_fraction", self.refine_fraction, 0.0, 1.0)?;
        if self.min_elements > self.max_elements {
            return Err(PdeError::InvalidConfiguration {
                field: "min_elements".to_string(),
                reason: format!(
                    "minimum element count {} exceeds the maximum {}",
                    self.min_elements, self.max_elements
                ),
            });
        }
        if let Some(coarsen) = self.coarsen_fraction {
            validate_range("coarsen_fraction", coarsen, 0.0, 1.0)?;
            if coarsen >= self.refine_fraction {
                return Err(PdeError::InvalidConfiguration {
                    field: "coarsen_fraction".to_string(),
                    reason: format!(
                        "coarsen fraction {} must be below the refine fraction {}",
                        coarsen, self.refine_fraction
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Spatial discretization settings, passed by reference to every stage
#[derive(Clone, Debug)]
pub struct DiscretizationConfig {
    pub order: ElementOrder,
    /// Polynomial degree integrated exactly; `None` picks `2p + 2`
    pub quadrature_degree: Option<usize>,
    pub initial_condition: InitialCondition,
    pub solver: SolverConfig,
    pub refinement: RefinementLimits,
}

impl Default for DiscretizationConfig {
    fn default() -> Self {
        DiscretizationConfig {
            order: ElementOrder::Linear,
            quadrature_degree: None,
            initial_condition: InitialCondition::Interpolation,
            solver: SolverConfig::default(),
            refinement: RefinementLimits::default(),
        }
    }
}

impl DiscretizationConfig {
    pub fn quadratic() -> Self {
        DiscretizationConfig {
            order: ElementOrder::Quadratic,
            ..Default::default()
        }
    }

    pub fn quadrature_degree(&self) -> usize {
        self.quadrature_degree
            .unwrap_or(2 * self.order.degree() + 2)
    }

    pub fn validate(&self) -> PdeResult<()> {
        if let Some(degree) = self.quadrature_degree {
            if degree < 2 * self.order.degree() {
                return Err(PdeError::InvalidConfiguration {
                    field: "quadrature_degree".to_string(),
                    reason: format!(
                        "degree {} cannot integrate the mass matrix of order-{} elements exactly",
                        degree,
                        self.order.degree()
                    ),
                });
            }
            if degree > 30 {
                return Err(PdeError::InvalidConfiguration {
                    field: "quadrature_degree".to_string(),
                    reason: format!("degree {} is unreasonably high (max 30)", degree),
                });
            }
        }
        self.solver.validate()?;
        self.refinement.validate()
    }
}
