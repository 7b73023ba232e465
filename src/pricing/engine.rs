// src/pricing/engine.rs
//! Pricing problem: model, payoff, domain and discretization in one place
//!
//! [`PricingProblem::solve_on`] runs the whole pipeline on a given mesh:
//! ```text
//! mesh → function space → (M, K) → initial payoff vector → θ-stepper → solution grid
//! ```
//! and [`PricingProblem::solve_adaptive`] wraps it in the adaptive loop.

use crate::adaptive::{AdaptiveConfig, AdaptiveOutcome, AdaptiveRefiner};
use crate::error::{validation::*, PdeError, PdeResult};
use crate::fem::{DiscretizationConfig, FunctionSpace, InitialCondition, OperatorBuilder};
use crate::linalg::LinearSolver;
use crate::math_utils::Timer;
use crate::mesh::{BoundaryFaces, Domain, Mesh};
use crate::models::{BlackScholes, CreditRisk, Market, PricingDynamics};
use crate::pricing::payoffs::Payoff;
use crate::solvers::{
    BoundaryCondition, BoundaryData, BoundaryRule, BoundaryValue, SolutionGrid, ThetaConfig,
    ThetaStepper, TimeGrid,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct PricingProblem {
    pub dynamics: Arc<dyn PricingDynamics>,
    pub payoff: Payoff,
    pub domain: Domain,
    pub maturity: f64,
    pub time_steps: usize,
    pub theta: ThetaConfig,
    pub boundary: BoundaryCondition,
    pub discretization: DiscretizationConfig,
    pub adaptive: AdaptiveConfig,
}

impl PricingProblem {
    /// Problem with Crank-Nicolson (two damping steps), 100 time steps,
    /// P1 elements and the natural boundary condition.
    pub fn new(
        dynamics: Arc<dyn PricingDynamics>,
        payoff: Payoff,
        domain: Domain,
        maturity: f64,
    ) -> PdeResult<Self> {
        let problem = PricingProblem {
            dynamics,
            payoff,
            domain,
            maturity,
            time_steps: 100,
            theta: ThetaConfig::rannacher(2),
            boundary: BoundaryCondition::None,
            discretization: DiscretizationConfig::default(),
            adaptive: AdaptiveConfig::default(),
        };
        problem.validate()?;
        Ok(problem)
    }

    /// Black-Scholes call with r = 3%, q = 0, σ = 20%, K = 1, T = 1 on
    /// S ∈ [0, 4], with asymptotic Dirichlet data at both price boundaries.
    pub fn default_call() -> PdeResult<Self> {
        let market = Market::new(0.03, 0.0)?;
        let dynamics = Arc::new(BlackScholes::price(market, 0.2)?);
        let mut problem = Self::new(dynamics, Payoff::call(1.0)?, Domain::interval(0.0, 4.0)?, 1.0)?;
        problem.boundary = price_boundaries(BoundaryValue::Asymptotic);
        Ok(problem)
    }

    /// Defaultable zero-coupon bond losing `1 - recovery` at maturity T = 1,
    /// on the intensity state s ∈ [0, 1] with discounted-loss Dirichlet data
    /// at both ends.
    pub fn credit_risk(rate: f64, intensity: f64, recovery: f64) -> PdeResult<Self> {
        let market = Market::new(rate, 0.0)?;
        let dynamics = Arc::new(CreditRisk::new(market, intensity)?);
        let payoff = Payoff::loss_given_default(recovery)?;
        let mut problem = Self::new(dynamics, payoff, Domain::interval(0.0, 1.0)?, 1.0)?;
        problem.boundary = price_boundaries(BoundaryValue::Asymptotic);
        Ok(problem)
    }

    pub fn validate(&self) -> PdeResult<()> {
        validate_positive("maturity", self.maturity)?;
        validate_count("time_steps", self.time_steps)?;
        self.theta.validate()?;
        self.discretization.validate()?;
        if self.domain.dimension() != self.dynamics.dimension() {
            return Err(PdeError::InvalidDomain {
                reason: format!(
                    "{} model needs a {}-dimensional domain, got {}",
                    self.dynamics.name(),
                    self.dynamics.dimension(),
                    self.domain.dimension()
                ),
            });
        }
        Ok(())
    }

    pub fn time_grid(&self) -> PdeResult<TimeGrid> {
        TimeGrid::uniform(0.0, self.maturity, self.time_steps)
    }

    /// Terminal payoff as coefficients of `space`.
    pub fn initial_values(&self, builder: &OperatorBuilder<'_>) -> PdeResult<Vec<f64>> {
        let dynamics = &self.dynamics;
        let payoff = &self.payoff;
        let terminal = |x: &[f64]| payoff.evaluate(dynamics.spot(x));
        match self.discretization.initial_condition {
            InitialCondition::Interpolation => Ok(builder.space().interpolate(terminal)),
            InitialCondition::L2Projection => {
                let mass = builder.assemble_mass()?;
                let load = builder.load_vector(terminal)?;
                LinearSolver::factor(&mass, &self.discretization.solver)?.solve(&load, None)
            }
        }
    }

    /// Solve on a fixed mesh.
    pub fn solve_on(&self, mesh: &Arc<Mesh>) -> PdeResult<SolutionGrid> {
        self.validate()?;
        if mesh.dimension() != self.dynamics.dimension() {
            return Err(PdeError::InvalidDomain {
                reason: format!(
                    "mesh is {}-dimensional but the {} model is {}-dimensional",
                    mesh.dimension(),
                    self.dynamics.name(),
                    self.dynamics.dimension()
                ),
            });
        }
        let timer = Timer::new();
        let space = FunctionSpace::new(Arc::clone(mesh), self.discretization.order);
        let builder = OperatorBuilder::new(&space, &self.discretization)?;
        let operators = builder.assemble(self.dynamics.as_ref())?;
        let initial = self.initial_values(&builder)?;
        let data = BoundaryData {
            dynamics: self.dynamics.as_ref(),
            payoff: &self.payoff,
        };
        let solution = ThetaStepper::new(
            &space,
            &operators,
            &self.boundary,
            data,
            initial,
            self.time_grid()?,
            &self.theta,
            &self.discretization.solver,
        )?
        .run()?;
        log::debug!(
            "Solved {} {} on {} elements ({} dofs, {} steps) in {:.1} ms",
            self.dynamics.name(),
            self.payoff.name(),
            mesh.num_elements(),
            space.num_dofs(),
            self.time_steps,
            timer.elapsed_ms()
        );
        Ok(solution)
    }

    /// Solve on the uniform mesh with `2^level` cells per axis.
    pub fn solve(&self, level: u32) -> PdeResult<SolutionGrid> {
        let mesh = Arc::new(Mesh::uniform(&self.domain, level)?);
        self.solve_on(&mesh)
    }

    /// Adaptive solve starting from the uniform mesh of `level`.
    pub fn solve_adaptive(&self, level: u32) -> PdeResult<AdaptiveOutcome> {
        let mesh = Arc::new(Mesh::uniform(&self.domain, level)?);
        AdaptiveRefiner::new(
            mesh,
            &self.discretization.refinement,
            &self.adaptive,
            |mesh: &Arc<Mesh>| self.solve_on(mesh),
        )?
        .run()
    }

    /// Price today at spot `spot`; `state` holds the remaining coordinates
    /// (variance, short rate) of multi-factor models.
    pub fn price_at(&self, solution: &SolutionGrid, spot: f64, state: &[f64]) -> PdeResult<f64> {
        validate_positive("spot", spot)?;
        let mut x = Vec::with_capacity(1 + state.len());
        x.push(self.dynamics.price_coordinate().from_spot(spot));
        x.extend_from_slice(state);
        solution.final_value_at(&x).ok_or_else(|| PdeError::InvalidConfiguration {
            field: "spot".to_string(),
            reason: format!("point {:?} lies outside the mesh", x),
        })
    }
}

/// Dirichlet `value` on both faces of the price axis.
pub fn price_boundaries(value: BoundaryValue) -> BoundaryCondition {
    BoundaryCondition::Constraints(vec![BoundaryRule::dirichlet(
        BoundaryFaces::X_MIN | BoundaryFaces::X_MAX,
        value,
    )])
}
