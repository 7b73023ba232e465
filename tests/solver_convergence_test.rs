// tests/solver_convergence_test.rs
use fast_fem::analytics::bs_analytic::{bs_call_price, bs_put_price};
use fast_fem::fem::DiscretizationConfig;
use fast_fem::mesh::{BoundaryFaces, Domain, Mesh};
use fast_fem::models::{BlackScholes, Heston, HestonParams, Market};
use fast_fem::pricing::{price_boundaries, Payoff, PricingProblem};
use fast_fem::solvers::{BoundaryCondition, BoundaryRule, BoundaryValue, ThetaConfig};
use std::sync::Arc;

const RATE: f64 = 0.03;
const SIGMA: f64 = 0.2;
const STRIKE: f64 = 1.0;
const MATURITY: f64 = 1.0;

fn black_scholes_call(lo: f64, hi: f64, log_price: bool) -> PricingProblem {
    let market = Market::new(RATE, 0.0).unwrap();
    let model = if log_price {
        BlackScholes::log_price(market, SIGMA).unwrap()
    } else {
        BlackScholes::price(market, SIGMA).unwrap()
    };
    let mut problem = PricingProblem::new(
        Arc::new(model),
        Payoff::call(STRIKE).unwrap(),
        Domain::interval(lo, hi).unwrap(),
        MATURITY,
    )
    .unwrap();
    problem.boundary = price_boundaries(BoundaryValue::Asymptotic);
    problem
}

#[test]
fn test_black_scholes_convergence_under_refinement() {
    let mut problem = black_scholes_call(0.0, 2.0, false);
    problem.time_steps = 400;
    problem.theta = ThetaConfig::rannacher(4);
    let exact = bs_call_price(1.0, STRIKE, RATE, 0.0, SIGMA, MATURITY);

    let mut errors = Vec::new();
    for level in 3..=6 {
        let solution = problem.solve(level).expect("Solve succeeds");
        let price = problem.price_at(&solution, 1.0, &[]).expect("Spot inside mesh");
        errors.push((price - exact).abs());
    }
    println!("Black-Scholes FEM errors by level: {:?}", errors);

    for i in 0..(errors.len() - 1) {
        assert!(
            errors[i + 1] <= errors[i] + 1e-5,
            "error grew from level {} to {}: {:?}",
            i + 3,
            i + 4,
            errors
        );
    }
    assert!(errors[3] < errors[0], "no overall convergence: {:?}", errors);
    assert!(errors[3] < 5e-3, "final error {} too large", errors[3]);
}

#[test]
fn test_quadratic_elements_converge() {
    let mut problem = black_scholes_call(0.0, 2.0, false);
    problem.time_steps = 200;
    problem.discretization = DiscretizationConfig::quadratic();
    let solution = problem.solve(4).expect("Solve succeeds");
    let price = problem.price_at(&solution, 1.0, &[]).unwrap();
    let exact = bs_call_price(1.0, STRIKE, RATE, 0.0, SIGMA, MATURITY);
    assert!((price - exact).abs() < 2e-3, "P2 price {} vs {}", price, exact);
}

#[test]
fn test_log_price_coordinates() {
    let mut problem = black_scholes_call(-3.0, 3.0, true);
    problem.time_steps = 200;
    let solution = problem.solve(7).expect("Solve succeeds");
    let exact = bs_call_price(1.0, STRIKE, RATE, 0.0, SIGMA, MATURITY);
    let price = problem.price_at(&solution, 1.0, &[]).unwrap();
    assert!((price - exact).abs() < 2e-3, "log-price {} vs {}", price, exact);
}

#[test]
fn test_heston_without_vol_of_vol_matches_black_scholes() {
    let market = Market::new(RATE, 0.0).unwrap();
    let params = HestonParams {
        kappa: 1.0,
        theta: SIGMA * SIGMA,
        xi: 0.0,
        rho: 0.0,
    };
    let domain = Domain::new(2, vec![(0.0, 2.0), (0.0, 0.08)]).unwrap();
    let mut problem = PricingProblem::new(
        Arc::new(Heston::new(market, params).unwrap()),
        Payoff::put(STRIKE).unwrap(),
        domain.clone(),
        MATURITY,
    )
    .unwrap();
    problem.boundary = BoundaryCondition::Constraints(vec![BoundaryRule::dirichlet(
        BoundaryFaces::X_MIN | BoundaryFaces::X_MAX,
        BoundaryValue::MeanVarianceBlackScholes,
    )]);

    let mesh = Arc::new(Mesh::structured(&domain, &[32, 8]).unwrap());
    let solution = problem.solve_on(&mesh).expect("Solve succeeds");
    let price = problem.price_at(&solution, 1.0, &[SIGMA * SIGMA]).unwrap();
    let exact = bs_put_price(1.0, STRIKE, RATE, 0.0, SIGMA, MATURITY);
    assert!((price - exact).abs() < 5e-3, "Heston {} vs Black-Scholes {}", price, exact);
}
