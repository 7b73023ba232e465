// src/solvers/boundary.rs
//! Boundary conditions for the discrete pricing problem
//!
//! # Dirichlet data
//!
//! `Elimination` enforces u_D = g exactly and keeps the system symmetric in
//! structure:
//! ```text
//! b ← b - A x_D        (x_D holds g on D, zero elsewhere)
//! A_Dj = A_jD = 0,  A_DD = 1,  b_D = g
//! ```
//! `Penalty { weight }` adds `weight · |A_ii|` to each constrained diagonal
//! and the matching multiple of g to the right-hand side.
//!
//! # Neumann data
//!
//! A Neumann value is the conormal flux `½ n·A∇u` on the selected faces and
//! enters the right-hand side as the load `∫_Γ g φ_i`.
//!
//! # Boundary values
//!
//! Value functions receive the elapsed time τ - τ₀ and the physical point.
//! `Asymptotic` discounts the payoff of the forward, `e^{-rτ} g(s e^{(r-q)τ})`,
//! the deep in/out-of-the-money limit. `MeanVarianceBlackScholes` prices a
//! vanilla with Black-Scholes at the model's mean variance over the
//! remaining horizon.

use crate::analytics::bs_analytic::bs_price_with_variance;
use crate::error::{validation::*, PdeError, PdeResult};
use crate::fem::{FunctionSpace, QuadratureRule};
use crate::linalg::CsrMatrix;
use crate::mesh::BoundaryFaces;
use crate::models::PricingDynamics;
use crate::pricing::payoffs::Payoff;
use std::fmt;
use std::sync::Arc;

pub type BoundaryFunction = Arc<dyn Fn(f64, &[f64]) -> f64 + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DirichletMethod {
    Elimination,
    Penalty { weight: f64 },
}

impl Default for DirichletMethod {
    fn default() -> Self {
        DirichletMethod::Elimination
    }
}

#[derive(Clone)]
pub enum BoundaryValue {
    Constant(f64),
    Asymptotic,
    MeanVarianceBlackScholes,
    /// `g(τ - τ₀, x)`
    Function(BoundaryFunction),
}

impl fmt::Debug for BoundaryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryValue::Constant(c) => write!(f, "Constant({})", c),
            BoundaryValue::Asymptotic => write!(f, "Asymptotic"),
            BoundaryValue::MeanVarianceBlackScholes => write!(f, "MeanVarianceBlackScholes"),
            BoundaryValue::Function(_) => write!(f, "Function(..)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryKind {
    Dirichlet,
    Neumann,
}

#[derive(Clone, Debug)]
pub struct BoundaryRule {
    pub kind: BoundaryKind,
    pub faces: BoundaryFaces,
    pub value: BoundaryValue,
}

impl BoundaryRule {
    pub fn dirichlet(faces: BoundaryFaces, value: BoundaryValue) -> Self {
        BoundaryRule {
            kind: BoundaryKind::Dirichlet,
            faces,
            value,
        }
    }

    pub fn neumann(faces: BoundaryFaces, value: BoundaryValue) -> Self {
        BoundaryRule {
            kind: BoundaryKind::Neumann,
            faces,
            value,
        }
    }
}

/// Boundary specification of a pricing problem
#[derive(Clone, Debug, Default)]
pub enum BoundaryCondition {
    /// Natural (flux-free) condition of the weak form on every face
    #[default]
    None,
    Constraints(Vec<BoundaryRule>),
}

impl BoundaryCondition {
    pub fn rules(&self) -> &[BoundaryRule] {
        match self {
            BoundaryCondition::None => &[],
            BoundaryCondition::Constraints(rules) => rules,
        }
    }
}

/// Model and payoff the built-in boundary values are derived from
#[derive(Clone, Copy)]
pub struct BoundaryData<'a> {
    pub dynamics: &'a dyn PricingDynamics,
    pub payoff: &'a Payoff,
}

impl BoundaryValue {
    /// Value at elapsed time `tau` and point `x`.
    pub fn evaluate(&self, data: &BoundaryData<'_>, tau: f64, x: &[f64]) -> f64 {
        match self {
            BoundaryValue::Constant(c) => *c,
            BoundaryValue::Function(g) => g(tau, x),
            BoundaryValue::Asymptotic => asymptotic_value(data, tau, x),
            BoundaryValue::MeanVarianceBlackScholes => match data.payoff {
                Payoff::Call { strike } | Payoff::Put { strike } => {
                    let market = data.dynamics.market();
                    let variance = data.dynamics.mean_variance(tau, x);
                    bs_price_with_variance(
                        data.payoff.is_call(),
                        data.dynamics.spot(x),
                        *strike,
                        market.rate,
                        market.dividend_yield,
                        variance,
                        tau,
                    )
                }
                // No closed form for arbitrary payoffs
                Payoff::Custom { .. } => asymptotic_value(data, tau, x),
            },
        }
    }
}

fn asymptotic_value(data: &BoundaryData<'_>, tau: f64, x: &[f64]) -> f64 {
    let market = data.dynamics.market();
    let forward = market.forward(data.dynamics.spot(x), tau);
    market.discount_factor(tau) * data.payoff.evaluate(forward)
}

struct NeumannFacet {
    element: usize,
    /// Local vertex positions of the facet nodes inside `element`
    local: Vec<usize>,
    nodes: Vec<usize>,
    measure: f64,
    rule: usize,
}

/// Applies a [`BoundaryCondition`] to the systems of one function space
pub struct BoundaryApplier<'a> {
    space: &'a FunctionSpace,
    rules: &'a [BoundaryRule],
    method: DirichletMethod,
    /// Constrained dof and the rule that owns it
    dirichlet: Vec<(usize, usize)>,
    constrained: Vec<bool>,
    neumann: Vec<NeumannFacet>,
    facet_rule: QuadratureRule,
}

impl<'a> BoundaryApplier<'a> {
    pub fn new(
        space: &'a FunctionSpace,
        condition: &'a BoundaryCondition,
        method: DirichletMethod,
        quadrature_degree: usize,
    ) -> PdeResult<Self> {
        let dim = space.dimension();
        let admissible = BoundaryFaces::all_for_dimension(dim);
        let rules = condition.rules();

        if let DirichletMethod::Penalty { weight } = method {
            validate_positive("penalty_weight", weight)?;
        }
        for (k, rule) in rules.iter().enumerate() {
            if rule.faces.is_empty() || !admissible.contains(rule.faces) {
                return Err(PdeError::InvalidConfiguration {
                    field: format!("boundary rule {}", k),
                    reason: format!(
                        "faces {:?} are not faces of a {}-dimensional domain",
                        rule.faces, dim
                    ),
                });
            }
            if let BoundaryValue::Constant(c) = rule.value {
                validate_finite("boundary constant", c)?;
            }
        }

        // First Dirichlet rule touching a dof owns it
        let mut dirichlet = Vec::new();
        let mut constrained = vec![false; space.num_dofs()];
        for dof in 0..space.num_dofs() {
            let faces = space.dof_faces(dof);
            if faces.is_empty() {
                continue;
            }
            if let Some(k) = rules
                .iter()
                .position(|r| r.kind == BoundaryKind::Dirichlet && r.faces.intersects(faces))
            {
                dirichlet.push((dof, k));
                constrained[dof] = true;
            }
        }

        let mut neumann = Vec::new();
        if rules.iter().any(|r| r.kind == BoundaryKind::Neumann) {
            let mesh = space.mesh();
            for facet in mesh.facets().into_iter().filter(|f| f.is_boundary()) {
                let faces = mesh.facet_faces(&facet.nodes);
                let Some(k) = rules
                    .iter()
                    .position(|r| r.kind == BoundaryKind::Neumann && r.faces.intersects(faces))
                else {
                    continue;
                };
                let element = facet.owners.0;
                let vertices = mesh.element(element);
                let local = facet
                    .nodes
                    .iter()
                    .filter_map(|n| vertices.iter().position(|v| v == n))
                    .collect();
                neumann.push(NeumannFacet {
                    element,
                    local,
                    measure: mesh.facet_measure(&facet.nodes),
                    nodes: facet.nodes,
                    rule: k,
                });
            }
        }

        log::debug!(
            "Boundary: {} Dirichlet dofs, {} Neumann facets ({:?})",
            dirichlet.len(),
            neumann.len(),
            method
        );

        Ok(BoundaryApplier {
            space,
            rules,
            method,
            dirichlet,
            constrained,
            neumann,
            facet_rule: QuadratureRule::simplex(dim - 1, quadrature_degree),
        })
    }

    pub fn method(&self) -> DirichletMethod {
        self.method
    }

    pub fn dirichlet_dofs(&self) -> impl Iterator<Item = usize> + '_ {
        self.dirichlet.iter().map(|&(dof, _)| dof)
    }

    pub fn num_dirichlet(&self) -> usize {
        self.dirichlet.len()
    }

    pub fn has_neumann(&self) -> bool {
        !self.neumann.is_empty()
    }

    /// Dirichlet values at elapsed time `tau`, aligned with [`Self::dirichlet_dofs`].
    pub fn dirichlet_values(&self, data: &BoundaryData<'_>, tau: f64) -> PdeResult<Vec<f64>> {
        self.dirichlet
            .iter()
            .map(|&(dof, k)| {
                let x = self.space.dof_coord(dof);
                let value = self.rules[k].value.evaluate(data, tau, x);
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(PdeError::InvalidConfiguration {
                        field: format!("boundary rule {}", k),
                        reason: format!("non-finite Dirichlet value at x = {:?}", x),
                    })
                }
            })
            .collect()
    }

    /// Natural boundary load `∫_Γ g φ_i`, or `None` without Neumann rules.
    pub fn neumann_load(&self, data: &BoundaryData<'_>, tau: f64) -> PdeResult<Option<Vec<f64>>> {
        if self.neumann.is_empty() {
            return Ok(None);
        }
        let mesh = self.space.mesh();
        let dim = self.space.dimension();
        let mut load = vec![0.0; self.space.num_dofs()];
        for facet in &self.neumann {
            let dofs = self.space.element_dofs(facet.element);
            for q in 0..self.facet_rule.len() {
                let mu = self.facet_rule.barycentric(q);
                let mut lambda = vec![0.0; dim + 1];
                let mut x = vec![0.0; dim];
                for ((&pos, &node), &m) in facet.local.iter().zip(&facet.nodes).zip(&mu) {
                    lambda[pos] = m;
                    for (xi, ci) in x.iter_mut().zip(mesh.node(node)) {
                        *xi += m * ci;
                    }
                }
                let g = self.rules[facet.rule].value.evaluate(data, tau, &x);
                if !g.is_finite() {
                    return Err(PdeError::InvalidConfiguration {
                        field: format!("boundary rule {}", facet.rule),
                        reason: format!("non-finite Neumann value at x = {:?}", x),
                    });
                }
                let w = self.facet_rule.weight(q) * facet.measure;
                for (&dof, phi) in dofs.iter().zip(self.space.shape_values(&lambda)) {
                    load[dof] += w * g * phi;
                }
            }
        }
        Ok(Some(load))
    }

    /// Modify a system matrix for the Dirichlet constraints. The result only
    /// depends on which dofs are constrained, not on the values.
    pub fn constrain_matrix(&self, matrix: &mut CsrMatrix) -> PdeResult<()> {
        if self.dirichlet.is_empty() {
            return Ok(());
        }
        match self.method {
            DirichletMethod::Elimination => {
                for row in 0..matrix.n_rows() {
                    let row_constrained = self.constrained[row];
                    let (cols, vals) = matrix.row_mut(row);
                    for (&col, val) in cols.iter().zip(vals.iter_mut()) {
                        if row_constrained {
                            *val = if col == row { 1.0 } else { 0.0 };
                        } else if self.constrained[col] {
                            *val = 0.0;
                        }
                    }
                }
            }
            DirichletMethod::Penalty { weight } => {
                for &(dof, _) in &self.dirichlet {
                    let diagonal = matrix.get(dof, dof);
                    matrix.add(dof, dof, weight * diagonal.abs().max(f64::MIN_POSITIVE))?;
                }
            }
        }
        Ok(())
    }

    /// Impose Dirichlet `values` on a right-hand side. `original` is the
    /// system matrix before [`Self::constrain_matrix`].
    pub fn constrain_rhs(&self, original: &CsrMatrix, rhs: &mut [f64], values: &[f64]) {
        if self.dirichlet.is_empty() {
            return;
        }
        match self.method {
            DirichletMethod::Elimination => {
                let mut lifted = vec![0.0; rhs.len()];
                for (&(dof, _), &g) in self.dirichlet.iter().zip(values) {
                    lifted[dof] = g;
                }
                let correction = original.apply(&lifted);
                for (i, r) in rhs.iter_mut().enumerate() {
                    if !self.constrained[i] {
                        *r -= correction[i];
                    }
                }
                for (&(dof, _), &g) in self.dirichlet.iter().zip(values) {
                    rhs[dof] = g;
                }
            }
            DirichletMethod::Penalty { weight } => {
                for (&(dof, _), &g) in self.dirichlet.iter().zip(values) {
                    let diagonal = original.get(dof, dof);
                    rhs[dof] += weight * diagonal.abs().max(f64::MIN_POSITIVE) * g;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fem::{DiscretizationConfig, ElementOrder, OperatorBuilder};
    use crate::linalg::{LinearSolver, SolverConfig};
    use crate::mesh::{Domain, Mesh};
    use crate::models::{BlackScholes, Market};
    use approx::assert_relative_eq;
    use rand::Rng;

    fn square_space() -> FunctionSpace {
        let domain = Domain::new(2, vec![(0.0, 2.0), (0.0, 1.0)]).unwrap();
        FunctionSpace::new(Arc::new(Mesh::uniform(&domain, 2).unwrap()), ElementOrder::Linear)
    }

    fn model() -> BlackScholes {
        BlackScholes::price(Market::new(0.03, 0.0).unwrap(), 0.2).unwrap()
    }

    #[test]
    fn test_dirichlet_dof_selection() {
        let space = square_space();
        let condition = BoundaryCondition::Constraints(vec![BoundaryRule::dirichlet(
            BoundaryFaces::X_MIN | BoundaryFaces::X_MAX,
            BoundaryValue::Constant(1.0),
        )]);
        let applier = BoundaryApplier::new(&space, &condition, DirichletMethod::Elimination, 4).unwrap();
        assert_eq!(applier.num_dirichlet(), 10);
        for dof in applier.dirichlet_dofs() {
            let x = space.dof_coord(dof)[0];
            assert!(x == 0.0 || x == 2.0);
        }
    }

    #[test]
    fn test_elimination_enforces_values_exactly() {
        let space = square_space();
        let config = DiscretizationConfig::default();
        let ops = OperatorBuilder::new(&space, &config).unwrap().assemble(&ProductBs(model())).unwrap();
        let system = ops.mass.linear_combination(1.0, &ops.stiffness, 0.01);

        let mut rng = crate::rng::seed_rng_from_u64(7);
        let condition = BoundaryCondition::Constraints(vec![BoundaryRule::dirichlet(
            BoundaryFaces::all_for_dimension(2),
            BoundaryValue::Function(Arc::new(|_: f64, x: &[f64]| 1.0 + x[0] * x[1])),
        )]);
        let applier = BoundaryApplier::new(&space, &condition, DirichletMethod::Elimination, 4).unwrap();
        let payoff = Payoff::call(1.0).unwrap();
        let dynamics = ProductBs(model());
        let data = BoundaryData {
            dynamics: &dynamics,
            payoff: &payoff,
        };
        let values = applier.dirichlet_values(&data, 0.0).unwrap();

        let mut constrained = system.clone();
        applier.constrain_matrix(&mut constrained).unwrap();
        let mut rhs: Vec<f64> = (0..space.num_dofs()).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let original_rhs = rhs.clone();
        applier.constrain_rhs(&system, &mut rhs, &values);

        let solver = LinearSolver::factor(&constrained, &SolverConfig::default()).unwrap();
        let u = solver.solve(&rhs, None).unwrap();
        for (dof, g) in applier.dirichlet_dofs().zip(&values) {
            assert_relative_eq!(u[dof], *g, epsilon = 1e-12);
        }
        // Interior rows of the original system hold
        let residual = system.apply(&u);
        for i in 0..space.num_dofs() {
            if !applier.constrained[i] {
                assert_relative_eq!(residual[i], original_rhs[i], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_penalty_approximates_values() {
        let space = square_space();
        let config = DiscretizationConfig::default();
        let ops = OperatorBuilder::new(&space, &config).unwrap().assemble(&ProductBs(model())).unwrap();
        let system = ops.mass.linear_combination(1.0, &ops.stiffness, 0.01);
        let condition = BoundaryCondition::Constraints(vec![BoundaryRule::dirichlet(
            BoundaryFaces::X_MAX,
            BoundaryValue::Constant(2.5),
        )]);
        let applier =
            BoundaryApplier::new(&space, &condition, DirichletMethod::Penalty { weight: 1e10 }, 4).unwrap();
        let payoff = Payoff::call(1.0).unwrap();
        let dynamics = ProductBs(model());
        let data = BoundaryData {
            dynamics: &dynamics,
            payoff: &payoff,
        };
        let values = applier.dirichlet_values(&data, 0.0).unwrap();
        let mut constrained = system.clone();
        applier.constrain_matrix(&mut constrained).unwrap();
        let mut rhs = vec![0.0; space.num_dofs()];
        applier.constrain_rhs(&system, &mut rhs, &values);
        let u = LinearSolver::factor(&constrained, &SolverConfig::default())
            .unwrap()
            .solve(&rhs, None)
            .unwrap();
        for dof in applier.dirichlet_dofs() {
            assert_relative_eq!(u[dof], 2.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_neumann_load_integrates_flux() {
        let space = square_space();
        let condition = BoundaryCondition::Constraints(vec![BoundaryRule::neumann(
            BoundaryFaces::Y_MAX,
            BoundaryValue::Function(Arc::new(|_: f64, x: &[f64]| x[0])),
        )]);
        let applier = BoundaryApplier::new(&space, &condition, DirichletMethod::Elimination, 4).unwrap();
        let payoff = Payoff::call(1.0).unwrap();
        let dynamics = ProductBs(model());
        let data = BoundaryData {
            dynamics: &dynamics,
            payoff: &payoff,
        };
        let load = applier.neumann_load(&data, 0.0).unwrap().unwrap();
        // ∫_0^2 x dx on the top face
        assert_relative_eq!(load.iter().sum::<f64>(), 2.0, epsilon = 1e-13);
        for (dof, value) in load.iter().enumerate() {
            if space.dof_coord(dof)[1] < 1.0 {
                assert_eq!(*value, 0.0);
            }
        }
    }

    #[test]
    fn test_asymptotic_and_mean_variance_values() {
        let dynamics = model();
        let call = Payoff::call(1.0).unwrap();
        let data = BoundaryData {
            dynamics: &dynamics,
            payoff: &call,
        };
        let tau = 0.5;
        let asymptotic = BoundaryValue::Asymptotic.evaluate(&data, tau, &[3.0]);
        assert_relative_eq!(
            asymptotic,
            3.0 - (-0.03f64 * 0.5).exp(),
            epsilon = 1e-12
        );
        let bs = BoundaryValue::MeanVarianceBlackScholes.evaluate(&data, tau, &[1.0]);
        let expected = crate::analytics::bs_analytic::bs_call_price(1.0, 1.0, 0.03, 0.0, 0.2, 0.5);
        assert_relative_eq!(bs, expected, epsilon = 1e-14);
    }

    #[test]
    fn test_rule_validation() {
        let space = square_space();
        let condition = BoundaryCondition::Constraints(vec![BoundaryRule::dirichlet(
            BoundaryFaces::Z_MIN,
            BoundaryValue::Constant(0.0),
        )]);
        assert!(BoundaryApplier::new(&space, &condition, DirichletMethod::Elimination, 4).is_err());
        let none = BoundaryCondition::None;
        let applier = BoundaryApplier::new(&space, &none, DirichletMethod::Penalty { weight: 0.0 }, 4);
        assert!(applier.is_err());
    }

    /// Two independent Black-Scholes factors for 2D tests.
    struct ProductBs(BlackScholes);

    impl PricingDynamics for ProductBs {
        fn dimension(&self) -> usize {
            2
        }
        fn market(&self) -> &crate::models::Market {
            self.0.market()
        }
        fn diffusion(&self, x: &[f64]) -> nalgebra::DMatrix<f64> {
            nalgebra::DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
                0.04 * x[0] * x[0],
                0.04 * x[1] * x[1],
            ]))
        }
        fn diffusion_divergence(&self, x: &[f64]) -> nalgebra::DVector<f64> {
            nalgebra::DVector::from_vec(vec![0.08 * x[0], 0.08 * x[1]])
        }
        fn drift(&self, x: &[f64]) -> nalgebra::DVector<f64> {
            nalgebra::DVector::from_vec(vec![0.03 * x[0], 0.03 * x[1]])
        }
        fn mean_variance(&self, _tau: f64, _x: &[f64]) -> f64 {
            0.04
        }
        fn name(&self) -> &'static str {
            "product Black-Scholes"
        }
    }
}
