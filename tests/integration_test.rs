// tests/integration_test.rs
use fast_fem::fem::{DiscretizationConfig, ElementOrder, FunctionSpace, OperatorBuilder};
use fast_fem::linalg::{SolverConfig, SolverMethod};
use fast_fem::mesh::{BoundaryFaces, Domain, Mesh};
use fast_fem::models::{
    BlackScholes, HestonParams, HestonStochasticRate, LocalVolatility, Market, ShortRateParams,
};
use fast_fem::pricing::{price_boundaries, Payoff, PricingProblem};
use fast_fem::solvers::{
    BoundaryCondition, BoundaryData, BoundaryRule, BoundaryValue, DirichletMethod, StabilityCheck,
    ThetaConfig, ThetaStepper, TimeGrid,
};
use fast_fem::PdeError;
use std::sync::Arc;

fn bs_problem(payoff: Payoff) -> PricingProblem {
    let model = BlackScholes::price(Market::new(0.03, 0.0).unwrap(), 0.2).unwrap();
    let mut problem =
        PricingProblem::new(Arc::new(model), payoff, Domain::interval(0.0, 3.0).unwrap(), 1.0).unwrap();
    problem.boundary = price_boundaries(BoundaryValue::Asymptotic);
    problem
}

#[test]
fn test_put_call_parity_on_the_grid() {
    let call = bs_problem(Payoff::call(1.0).unwrap());
    let put = bs_problem(Payoff::put(1.0).unwrap());
    let call_solution = call.solve(5).unwrap();
    let put_solution = put.solve(5).unwrap();

    let discount = (-0.03f64).exp();
    let space = call_solution.space();
    for (dof, (c, p)) in call_solution
        .final_values()
        .iter()
        .zip(put_solution.final_values().iter())
        .enumerate()
    {
        let s = space.dof_coord(dof)[0];
        let forward = s - discount;
        assert!(
            (c - p - forward).abs() < 1e-6,
            "parity violated at S = {}: C - P = {}, forward = {}",
            s,
            c - p,
            forward
        );
    }
}

#[test]
fn test_bicgstab_agrees_with_lu() {
    let mut lu = bs_problem(Payoff::call(1.0).unwrap());
    lu.discretization.solver = SolverConfig {
        method: SolverMethod::DenseLu,
        ..Default::default()
    };
    let mut iterative = lu.clone();
    iterative.discretization.solver = SolverConfig {
        method: SolverMethod::BiCgStab,
        rtol: 1e-12,
        ..Default::default()
    };
    let a = lu.solve(5).unwrap();
    let b = iterative.solve(5).unwrap();
    for (x, y) in a.final_values().iter().zip(b.final_values().iter()) {
        assert!((x - y).abs() < 1e-7, "LU {} vs BiCGStab {}", x, y);
    }
}

#[test]
fn test_penalty_dirichlet_close_to_elimination() {
    let exact = bs_problem(Payoff::call(1.0).unwrap());
    let mut penalty = exact.clone();
    penalty.theta.dirichlet = DirichletMethod::Penalty { weight: 1e8 };
    let a = exact.price_at(&exact.solve(5).unwrap(), 1.0, &[]).unwrap();
    let b = penalty.price_at(&penalty.solve(5).unwrap(), 1.0, &[]).unwrap();
    assert!((a - b).abs() < 1e-6, "elimination {} vs penalty {}", a, b);
}

#[test]
fn test_explicit_scheme_rejects_large_steps() {
    let mut problem = bs_problem(Payoff::call(1.0).unwrap());
    problem.time_steps = 10;
    problem.theta = ThetaConfig {
        theta: 0.0,
        stability: StabilityCheck::Estimated {
            safety_factor: 0.9,
            iterations: 30,
        },
        ..Default::default()
    };
    match problem.solve(5) {
        Err(PdeError::TimeIntegration { step, .. }) => assert_eq!(step, 1),
        other => panic!("expected a time integration error, got {:?}", other.map(|s| s.len())),
    }
}

#[test]
fn test_invalid_domain_rejected_before_assembly() {
    assert!(matches!(
        Domain::interval(1.0, 1.0),
        Err(PdeError::InvalidDomain { .. })
    ));
    assert!(matches!(
        Domain::new(2, vec![(0.0, 1.0)]),
        Err(PdeError::InvalidDomain { .. })
    ));
    assert!(Domain::new(4, vec![(0.0, 1.0); 4]).is_err());
}

#[test]
fn test_flat_local_volatility_matches_black_scholes_model() {
    let market = Market::new(0.03, 0.0).unwrap();
    let local = LocalVolatility::new(market, Arc::new(|_: f64| 0.2)).unwrap();
    let mut problem = bs_problem(Payoff::call(1.0).unwrap());
    let reference = problem.solve(5).unwrap();
    problem.dynamics = Arc::new(local);
    let solution = problem.solve(5).unwrap();
    for (x, y) in reference.final_values().iter().zip(solution.final_values().iter()) {
        assert!((x - y).abs() < 1e-6);
    }
}

#[test]
fn test_neumann_forward_slope_at_upper_boundary() {
    // Deep in the money a call has ∂C/∂S → e^{-qτ}.
    // The conormal flux there is ½σ²S²·∂C/∂S.
    let mut problem = bs_problem(Payoff::call(1.0).unwrap());
    problem.boundary = BoundaryCondition::Constraints(vec![
        BoundaryRule::dirichlet(BoundaryFaces::X_MIN, BoundaryValue::Constant(0.0)),
        BoundaryRule::neumann(
            BoundaryFaces::X_MAX,
            BoundaryValue::Function(Arc::new(|_: f64, x: &[f64]| 0.5 * 0.04 * x[0] * x[0])),
        ),
    ]);
    let reference = bs_problem(Payoff::call(1.0).unwrap());
    let a = problem.price_at(&problem.solve(6).unwrap(), 1.0, &[]).unwrap();
    let b = reference.price_at(&reference.solve(6).unwrap(), 1.0, &[]).unwrap();
    assert!((a - b).abs() < 1e-3, "Neumann {} vs Dirichlet {}", a, b);
}

#[test]
fn test_three_factor_model_runs() {
    let market = Market::new(0.03, 0.0).unwrap();
    let model = HestonStochasticRate::new(
        market,
        HestonParams {
            kappa: 1.5,
            theta: 0.04,
            xi: 0.3,
            rho: -0.5,
        },
        ShortRateParams {
            kappa: 0.5,
            theta: 0.03,
            sigma: 0.01,
        },
    )
    .unwrap();
    let domain = Domain::new(3, vec![(0.0, 2.0), (0.0, 0.08), (0.0, 0.1)]).unwrap();
    let mut problem =
        PricingProblem::new(Arc::new(model), Payoff::call(1.0).unwrap(), domain.clone(), 0.5).unwrap();
    problem.time_steps = 20;
    problem.boundary = price_boundaries(BoundaryValue::MeanVarianceBlackScholes);

    let mesh = Arc::new(Mesh::structured(&domain, &[4, 2, 2]).unwrap());
    let solution = problem.solve_on(&mesh).unwrap();
    assert_eq!(solution.len(), 21);
    assert!(solution.values().iter().all(|v| v.is_finite()));
    let price = problem.price_at(&solution, 1.0, &[0.04, 0.03]).unwrap();
    assert!(price > 0.0 && price < 0.5, "price {}", price);
}

#[test]
fn test_stepper_shares_operators_across_solves() {
    let domain = Domain::interval(0.0, 3.0).unwrap();
    let space = FunctionSpace::new(Arc::new(Mesh::uniform(&domain, 4).unwrap()), ElementOrder::Linear);
    let model = BlackScholes::price(Market::new(0.03, 0.0).unwrap(), 0.2).unwrap();
    let operators = OperatorBuilder::new(&space, &DiscretizationConfig::default())
        .unwrap()
        .assemble(&model)
        .unwrap();
    let condition = price_boundaries(BoundaryValue::Asymptotic);

    let prices: Vec<f64> = [0.9, 1.0, 1.1]
        .iter()
        .map(|&k| {
            let payoff = Payoff::call(k).unwrap();
            let data = BoundaryData {
                dynamics: &model,
                payoff: &payoff,
            };
            let initial = space.interpolate(|x| payoff.evaluate(x[0]));
            let solution = ThetaStepper::new(
                &space,
                &operators,
                &condition,
                data,
                initial,
                TimeGrid::uniform(0.0, 1.0, 50).unwrap(),
                &ThetaConfig::rannacher(2),
                &SolverConfig::default(),
            )
            .unwrap()
            .run()
            .unwrap();
            solution.final_value_at(&[1.0]).unwrap()
        })
        .collect();
    assert!(prices[0] > prices[1] && prices[1] > prices[2]);
}
