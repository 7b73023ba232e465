// src/solvers/theta.rs
//! θ-Scheme Time Integration
//!
//! # Mathematical Framework
//!
//! For the semi-discrete system
//! ```text
//! M du/dτ + K u = f
//! ```
//!
//! one step from τ_n to τ_{n+1} = τ_n + Δτ solves
//! ```text
//! (M + θΔτK) u_{n+1} = (M - (1-θ)ΔτK) u_n + Δτ(θ f_{n+1} + (1-θ) f_n)
//! ```
//!
//! - θ = 0: explicit Euler (only mass matrix solves)
//! - θ = ½: Crank-Nicolson, second order in Δτ
//! - θ = 1: implicit Euler, L-stable
//!
//! # Startup Damping
//!
//! Crank-Nicolson does not damp the high-frequency error of a payoff kink.
//! The first `startup_implicit_steps` steps use θ = 1 (Rannacher smoothing)
//! before switching to the configured θ.
//!
//! # Stability
//!
//! For θ < ½ the scheme is stable only for
//! ```text
//! Δτ ≤ 2 / ((1 - 2θ) λ_max(M⁻¹K))
//! ```
//! The check is configurable: disabled, a fixed maximum step, or an
//! estimate of λ_max by power iteration.
//!
//! # Factorization Reuse
//!
//! The left-hand operator is rebuilt and refactored only when Δτ or the
//! effective θ changes, so a uniform grid factors once (twice with startup
//! damping).

use super::boundary::{BoundaryApplier, BoundaryCondition, BoundaryData, DirichletMethod};
use super::solution::SolutionGrid;
use super::time_grid::TimeGrid;
use crate::error::{validation::*, PdeError, PdeResult};
use crate::fem::{FunctionSpace, SpatialOperators};
use crate::linalg::{CsrMatrix, LinearSolver, SolverConfig};
use crate::rng;
use ndarray::{Array2, ArrayView1};

/// Step size check applied when θ < ½
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StabilityCheck {
    Disabled,
    /// Fixed upper bound on Δτ
    MaxTimeStep(f64),
    /// Bound from a power-iteration estimate of λ_max(M⁻¹K), scaled by
    /// `safety_factor`
    Estimated {
        safety_factor: f64,
        iterations: usize,
    },
}

#[derive(Clone, Debug)]
pub struct ThetaConfig {
    pub theta: f64,
    /// Leading steps taken with θ = 1
    pub startup_implicit_steps: usize,
    pub stability: StabilityCheck,
    pub dirichlet: DirichletMethod,
    /// Seed of the power-iteration start vector
    pub seed: u64,
}

impl Default for ThetaConfig {
    fn default() -> Self {
        ThetaConfig {
            theta: 0.5,
            startup_implicit_steps: 0,
            stability: StabilityCheck::Estimated {
                safety_factor: 0.9,
                iterations: 50,
            },
            dirichlet: DirichletMethod::Elimination,
            seed: 42,
        }
    }
}

impl ThetaConfig {
    /// Crank-Nicolson with `steps` implicit startup steps
    pub fn rannacher(steps: usize) -> Self {
        ThetaConfig {
            startup_implicit_steps: steps,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> PdeResult<()> {
        validate_theta(self.theta)?;
        match self.stability {
            StabilityCheck::Disabled => {}
            StabilityCheck::MaxTimeStep(max) => validate_positive("max_time_step", max)?,
            StabilityCheck::Estimated {
                safety_factor,
                iterations,
            } => {
                validate_range("safety_factor", safety_factor, f64::MIN_POSITIVE, 1.0)?;
                validate_count("iterations", iterations)?;
            }
        }
        if let DirichletMethod::Penalty { weight } = self.dirichlet {
            validate_positive("penalty_weight", weight)?;
        }
        if self.theta < 0.5 && self.stability == StabilityCheck::Disabled {
            log::warn!(
                "θ = {} is only conditionally stable and the stability check is disabled",
                self.theta
            );
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepperState {
    Initialized,
    Stepping,
    Completed,
    Failed,
}

/// Left-hand system for one (Δτ, θ) pair
struct StepOperators {
    dt: f64,
    theta: f64,
    lhs: CsrMatrix,
    rhs: CsrMatrix,
    solver: LinearSolver,
}

impl StepOperators {
    fn matches(&self, dt: f64, theta: f64) -> bool {
        self.theta == theta && (dt - self.dt).abs() <= 1e-10 * self.dt
    }
}

/// Marches the initial coefficients over a [`TimeGrid`]
pub struct ThetaStepper<'a> {
    space: &'a FunctionSpace,
    operators: &'a SpatialOperators,
    boundary: BoundaryApplier<'a>,
    data: BoundaryData<'a>,
    grid: TimeGrid,
    config: ThetaConfig,
    solver_config: SolverConfig,
    state: StepperState,
    step: usize,
    current: Vec<f64>,
    values: Array2<f64>,
    cache: Option<StepOperators>,
    /// Neumann load at the current time
    load: Option<Vec<f64>>,
    lambda_max: Option<f64>,
}

impl<'a> ThetaStepper<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        space: &'a FunctionSpace,
        operators: &'a SpatialOperators,
        condition: &'a BoundaryCondition,
        data: BoundaryData<'a>,
        initial: Vec<f64>,
        grid: TimeGrid,
        config: &ThetaConfig,
        solver_config: &SolverConfig,
    ) -> PdeResult<Self> {
        config.validate()?;
        solver_config.validate()?;
        let n = space.num_dofs();
        if operators.num_dofs() != n {
            return Err(PdeError::InvalidConfiguration {
                field: "operators".to_string(),
                reason: format!(
                    "operators have {} dofs but the space has {}",
                    operators.num_dofs(),
                    n
                ),
            });
        }
        if initial.len() != n {
            return Err(PdeError::InvalidConfiguration {
                field: "initial".to_string(),
                reason: format!("initial vector has {} entries, expected {}", initial.len(), n),
            });
        }
        if let Some(i) = initial.iter().position(|v| !v.is_finite()) {
            return Err(PdeError::InvalidConfiguration {
                field: "initial".to_string(),
                reason: format!("non-finite initial value at dof {}", i),
            });
        }

        let boundary = BoundaryApplier::new(
            space,
            condition,
            config.dirichlet,
            2 * space.order().degree() + 2,
        )?;
        let load = boundary.neumann_load(&data, 0.0)?;

        let mut values = Array2::zeros((grid.len(), n));
        values.row_mut(0).assign(&ArrayView1::from(&initial[..]));

        Ok(ThetaStepper {
            space,
            operators,
            boundary,
            data,
            grid,
            config: config.clone(),
            solver_config: solver_config.clone(),
            state: StepperState::Initialized,
            step: 0,
            current: initial,
            values,
            cache: None,
            load,
            lambda_max: None,
        })
    }

    pub fn state(&self) -> StepperState {
        self.state
    }

    /// Number of completed steps.
    pub fn steps_taken(&self) -> usize {
        self.step
    }

    /// Coefficients at the last completed time point.
    pub fn current(&self) -> &[f64] {
        &self.current
    }

    pub fn time(&self) -> f64 {
        self.grid.points()[self.step]
    }

    /// Advance one step. Fails once the grid is exhausted or after an
    /// earlier failure.
    pub fn step(&mut self) -> PdeResult<()> {
        match self.state {
            StepperState::Completed => {
                return Err(PdeError::InvalidConfiguration {
                    field: "stepper".to_string(),
                    reason: "all time steps have been taken".to_string(),
                })
            }
            StepperState::Failed => {
                return Err(PdeError::InvalidConfiguration {
                    field: "stepper".to_string(),
                    reason: "stepper failed earlier and cannot continue".to_string(),
                })
            }
            StepperState::Initialized | StepperState::Stepping => {}
        }

        let n = self.step;
        match self.advance(n) {
            Ok(next) => {
                self.values.row_mut(n + 1).assign(&ArrayView1::from(&next[..]));
                self.current = next;
                self.step += 1;
                self.state = if self.step == self.grid.num_steps() {
                    StepperState::Completed
                } else {
                    StepperState::Stepping
                };
                Ok(())
            }
            Err(e) => {
                self.state = StepperState::Failed;
                let reason = match e {
                    PdeError::TimeIntegration { reason, .. } => reason,
                    other => other.to_string(),
                };
                Err(PdeError::TimeIntegration {
                    step: n + 1,
                    time: self.grid.points()[n + 1],
                    reason,
                })
            }
        }
    }

    /// Take every remaining step and return the solution grid.
    pub fn run(mut self) -> PdeResult<SolutionGrid> {
        while self.state != StepperState::Completed {
            self.step()?;
        }
        self.into_solution()
    }

    /// Solution grid of a completed run.
    pub fn into_solution(self) -> PdeResult<SolutionGrid> {
        if self.state != StepperState::Completed {
            return Err(PdeError::InvalidConfiguration {
                field: "stepper".to_string(),
                reason: format!(
                    "solution requested in state {:?} after {} of {} steps",
                    self.state,
                    self.step,
                    self.grid.num_steps()
                ),
            });
        }
        Ok(SolutionGrid::new(
            self.space.clone(),
            self.grid.points().to_vec(),
            self.values,
        ))
    }

    fn advance(&mut self, n: usize) -> PdeResult<Vec<f64>> {
        let dt = self.grid.step_size(n);
        let theta = if n < self.config.startup_implicit_steps {
            1.0
        } else {
            self.config.theta
        };
        if theta < 0.5 {
            self.check_stability(dt, theta)?;
        }

        let (ops, reuse) = match self.cache.take() {
            Some(ops) if ops.matches(dt, theta) => (ops, true),
            _ => (self.build_operators(dt, theta)?, false),
        };
        let ops = &*self.cache.insert(ops);

        let elapsed = self.grid.points()[n + 1] - self.grid.start();
        let mut rhs = ops.rhs.apply(&self.current);
        let next_load = self.boundary.neumann_load(&self.data, elapsed)?;
        if let (Some(prev), Some(next)) = (self.load.as_ref(), next_load.as_ref()) {
            for ((r, p), f) in rhs.iter_mut().zip(prev).zip(next) {
                *r += dt * (theta * f + (1.0 - theta) * p);
            }
        }
        let dirichlet = self.boundary.dirichlet_values(&self.data, elapsed)?;
        self.boundary.constrain_rhs(&ops.lhs, &mut rhs, &dirichlet);

        let next = ops.solver.solve(&rhs, Some(&self.current))?;
        if let Some(i) = next.iter().position(|v| !v.is_finite()) {
            return Err(PdeError::TimeIntegration {
                step: n + 1,
                time: self.grid.points()[n + 1],
                reason: format!("non-finite value at dof {}", i),
            });
        }
        self.load = next_load;

        log::debug!(
            "θ-step {}/{}: τ = {:.6}, Δτ = {:.3e}, θ = {}{}",
            n + 1,
            self.grid.num_steps(),
            self.grid.points()[n + 1],
            dt,
            theta,
            if reuse { "" } else { " (refactored)" }
        );
        Ok(next)
    }

    fn build_operators(&self, dt: f64, theta: f64) -> PdeResult<StepOperators> {
        let mass = &self.operators.mass;
        let stiffness = &self.operators.stiffness;
        let lhs = mass.linear_combination(1.0, stiffness, theta * dt);
        let rhs = mass.linear_combination(1.0, stiffness, -(1.0 - theta) * dt);
        let mut constrained = lhs.clone();
        self.boundary.constrain_matrix(&mut constrained)?;
        let solver = LinearSolver::factor(&constrained, &self.solver_config)?;
        log::trace!(
            "Factored θ-system ({}, Δτ = {:.3e}, θ = {})",
            solver.method_name(),
            dt,
            theta
        );
        Ok(StepOperators {
            dt,
            theta,
            lhs,
            rhs,
            solver,
        })
    }

    fn check_stability(&mut self, dt: f64, theta: f64) -> PdeResult<()> {
        let bound = match self.config.stability {
            StabilityCheck::Disabled => return Ok(()),
            StabilityCheck::MaxTimeStep(max) => max,
            StabilityCheck::Estimated {
                safety_factor,
                iterations,
            } => {
                let lambda = match self.lambda_max {
                    Some(lambda) => lambda,
                    None => {
                        let lambda = self.estimate_lambda_max(iterations)?;
                        log::debug!("Estimated λ_max(M⁻¹K) = {:.6e}", lambda);
                        self.lambda_max = Some(lambda);
                        lambda
                    }
                };
                if lambda <= 0.0 {
                    return Ok(());
                }
                safety_factor * 2.0 / ((1.0 - 2.0 * theta) * lambda)
            }
        };
        if dt > bound * (1.0 + 1e-12) {
            return Err(PdeError::TimeIntegration {
                step: self.step + 1,
                time: self.grid.points()[self.step + 1],
                reason: format!(
                    "Δτ = {:.6e} exceeds the stability bound {:.6e} for θ = {}",
                    dt, bound, theta
                ),
            });
        }
        Ok(())
    }

    /// Power iteration on M⁻¹K from a seeded random start.
    fn estimate_lambda_max(&self, iterations: usize) -> PdeResult<f64> {
        let mass = LinearSolver::factor(&self.operators.mass, &self.solver_config)?;
        let mut v = rng::unit_normal_vector(self.config.seed, self.space.num_dofs());
        let mut lambda = 0.0;
        for _ in 0..iterations {
            let kv = self.operators.stiffness.apply(&v);
            let w = mass.solve(&kv, None)?;
            let norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
            if !(norm > 0.0) || !norm.is_finite() {
                break;
            }
            lambda = norm;
            v = w.into_iter().map(|x| x / norm).collect();
        }
        Ok(lambda)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fem::{DiscretizationConfig, ElementOrder, OperatorBuilder};
    use crate::mesh::{Domain, Mesh};
    use crate::models::{BlackScholes, Market};
    use crate::pricing::payoffs::Payoff;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    struct Fixture {
        space: FunctionSpace,
        operators: SpatialOperators,
        model: BlackScholes,
        payoff: Payoff,
    }

    fn fixture(sigma: f64, level: u32) -> Fixture {
        let domain = Domain::interval(0.0, 2.0).unwrap();
        let space = FunctionSpace::new(Arc::new(Mesh::uniform(&domain, level).unwrap()), ElementOrder::Linear);
        let model = BlackScholes::price(Market::new(0.03, 0.0).unwrap(), sigma).unwrap();
        let operators = OperatorBuilder::new(&space, &DiscretizationConfig::default())
            .unwrap()
            .assemble(&model)
            .unwrap();
        Fixture {
            space,
            operators,
            model,
            payoff: Payoff::custom("unit", |_| 1.0),
        }
    }

    #[test]
    fn test_state_machine() {
        let f = fixture(0.0, 3);
        let condition = BoundaryCondition::None;
        let data = BoundaryData {
            dynamics: &f.model,
            payoff: &f.payoff,
        };
        let initial = vec![1.0; f.space.num_dofs()];
        let grid = TimeGrid::uniform(0.0, 0.2, 2).unwrap();
        let mut stepper = ThetaStepper::new(
            &f.space,
            &f.operators,
            &condition,
            data,
            initial,
            grid,
            &ThetaConfig::default(),
            &SolverConfig::default(),
        )
        .unwrap();
        assert_eq!(stepper.state(), StepperState::Initialized);
        stepper.step().unwrap();
        assert_eq!(stepper.state(), StepperState::Stepping);
        assert_relative_eq!(stepper.time(), 0.1, epsilon = 1e-15);
        stepper.step().unwrap();
        assert_eq!(stepper.state(), StepperState::Completed);
        assert!(stepper.step().is_err());
        assert_eq!(stepper.state(), StepperState::Completed);

        let solution = stepper.into_solution().unwrap();
        assert_eq!(solution.len(), 3);
        assert!(solution.row(0).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_flat_volatility_discounting() {
        let f = fixture(0.0, 4);
        let condition = BoundaryCondition::None;
        for theta in [0.0, 0.5, 1.0] {
            let data = BoundaryData {
                dynamics: &f.model,
                payoff: &f.payoff,
            };
            let config = ThetaConfig {
                theta,
                ..Default::default()
            };
            let solution = ThetaStepper::new(
                &f.space,
                &f.operators,
                &condition,
                data,
                vec![1.0; f.space.num_dofs()],
                TimeGrid::uniform(0.0, 1.0, 1000).unwrap(),
                &config,
                &SolverConfig::default(),
            )
            .unwrap()
            .run()
            .unwrap();
            let expected = (-0.03f64).exp();
            for &v in solution.final_values().iter() {
                assert_relative_eq!(v, expected, max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn test_explicit_step_too_large_fails() {
        let f = fixture(0.2, 5);
        let condition = BoundaryCondition::None;
        let payoff = Payoff::call(1.0).unwrap();
        let data = BoundaryData {
            dynamics: &f.model,
            payoff: &payoff,
        };
        let initial = f.space.interpolate(|x| payoff.evaluate(x[0]));
        let config = ThetaConfig {
            theta: 0.0,
            ..Default::default()
        };
        let mut stepper = ThetaStepper::new(
            &f.space,
            &f.operators,
            &condition,
            data,
            initial,
            TimeGrid::uniform(0.0, 1.0, 10).unwrap(),
            &config,
            &SolverConfig::default(),
        )
        .unwrap();
        match stepper.step() {
            Err(PdeError::TimeIntegration { step, time, reason }) => {
                assert_eq!(step, 1);
                assert_relative_eq!(time, 0.1, epsilon = 1e-15);
                assert!(reason.contains("stability bound"), "{}", reason);
            }
            other => panic!("expected a stability failure, got {:?}", other.map(|_| ())),
        }
        assert_eq!(stepper.state(), StepperState::Failed);
        assert!(stepper.step().is_err());

        let fixed = ThetaConfig {
            theta: 0.0,
            stability: StabilityCheck::MaxTimeStep(0.01),
            ..Default::default()
        };
        let data = BoundaryData {
            dynamics: &f.model,
            payoff: &payoff,
        };
        let mut stepper = ThetaStepper::new(
            &f.space,
            &f.operators,
            &condition,
            data,
            vec![0.0; f.space.num_dofs()],
            TimeGrid::uniform(0.0, 1.0, 10).unwrap(),
            &fixed,
            &SolverConfig::default(),
        )
        .unwrap();
        assert!(stepper.step().is_err());
    }

    #[test]
    fn test_irregular_grid_and_startup_steps() {
        let f = fixture(0.2, 4);
        let payoff = Payoff::put(1.0).unwrap();
        let condition = BoundaryCondition::None;
        let data = BoundaryData {
            dynamics: &f.model,
            payoff: &payoff,
        };
        let initial = f.space.interpolate(|x| payoff.evaluate(x[0]));
        let grid = TimeGrid::new(vec![0.0, 0.01, 0.02, 0.05, 0.1, 0.2, 0.25]).unwrap();
        let solution = ThetaStepper::new(
            &f.space,
            &f.operators,
            &condition,
            data,
            initial,
            grid,
            &ThetaConfig::rannacher(2),
            &SolverConfig::default(),
        )
        .unwrap()
        .run()
        .unwrap();
        assert_eq!(solution.len(), 7);
        assert_eq!(solution.times()[3], 0.05);
        assert!(solution.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rejects_mismatched_initial_vector() {
        let f = fixture(0.2, 3);
        let condition = BoundaryCondition::None;
        let data = BoundaryData {
            dynamics: &f.model,
            payoff: &f.payoff,
        };
        let result = ThetaStepper::new(
            &f.space,
            &f.operators,
            &condition,
            data,
            vec![1.0; 3],
            TimeGrid::uniform(0.0, 1.0, 4).unwrap(),
            &ThetaConfig::default(),
            &SolverConfig::default(),
        );
        assert!(result.is_err());
        let bad = ThetaConfig {
            theta: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
