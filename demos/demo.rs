// demos/demo.rs
use fast_fem::analytics::bs_analytic::{bs_call_price, bs_put_price};
use fast_fem::fem::DiscretizationConfig;
use fast_fem::math_utils::Timer;
use fast_fem::mesh::{BoundaryFaces, Domain, Mesh};
use fast_fem::models::{Heston, HestonParams, Market};
use fast_fem::pricing::{Payoff, PricingProblem};
use fast_fem::solvers::{BoundaryCondition, BoundaryRule, BoundaryValue, ThetaConfig};
use std::sync::Arc;

fn main() {
    env_logger::init();
    println!("Running fast-fem Finite Element Demo\n");

    run_black_scholes_levels();
    run_theta_schemes();
    run_heston_surface();
}

fn run_black_scholes_levels() {
    println!("Black-Scholes call, K = 1, r = 3%, σ = 20%, T = 1");
    let problem = PricingProblem::default_call().expect("Valid problem");
    let exact = bs_call_price(1.0, 1.0, 0.03, 0.0, 0.2, 1.0);
    println!("  Analytic price: {:.6}", exact);
    println!("  {:>6} {:>10} {:>12} {:>12} {:>10}", "level", "elements", "P1 price", "abs error", "time ms");

    for level in 4..=9 {
        let mut timer = Timer::new();
        timer.start();
        let solution = problem.solve(level).expect("Solve succeeds");
        let price = problem.price_at(&solution, 1.0, &[]).expect("Spot inside mesh");
        println!(
            "  {:>6} {:>10} {:>12.6} {:>12.2e} {:>10.1}",
            level,
            solution.space().mesh().num_elements(),
            price,
            (price - exact).abs(),
            timer.elapsed_ms()
        );
    }

    let mut quadratic = PricingProblem::default_call().expect("Valid problem");
    quadratic.discretization = DiscretizationConfig::quadratic();
    let solution = quadratic.solve(5).expect("Solve succeeds");
    let price = quadratic.price_at(&solution, 1.0, &[]).expect("Spot inside mesh");
    println!("  P2 on level 5: {:.6} (error {:.2e})\n", price, (price - exact).abs());
}

fn run_theta_schemes() {
    println!("θ-scheme comparison on level 7, 50 steps");
    let exact = bs_call_price(1.0, 1.0, 0.03, 0.0, 0.2, 1.0);
    let schemes = [
        ("Implicit Euler", ThetaConfig { theta: 1.0, ..Default::default() }),
        ("Crank-Nicolson", ThetaConfig::default()),
        ("Rannacher (2)", ThetaConfig::rannacher(2)),
    ];
    for (name, theta) in schemes {
        let mut problem = PricingProblem::default_call().expect("Valid problem");
        problem.time_steps = 50;
        problem.theta = theta;
        match problem.solve(7) {
            Ok(solution) => {
                let price = problem.price_at(&solution, 1.0, &[]).expect("Spot inside mesh");
                println!("  {:<16} {:.6} (error {:.2e})", name, price, (price - exact).abs());
            }
            Err(e) => println!("  {:<16} failed: {}", name, e),
        }
    }
    println!();
}

fn run_heston_surface() {
    println!("Heston put, κ = 2, θ = 0.04, ξ = 0.3, ρ = -0.5");
    let market = Market::new(0.03, 0.0).expect("Valid market");
    let params = HestonParams {
        kappa: 2.0,
        theta: 0.04,
        xi: 0.3,
        rho: -0.5,
    };
    let model = Heston::new(market, params).expect("Valid parameters");
    let domain = Domain::new(2, vec![(0.0, 3.0), (0.0, 0.25)]).expect("Valid domain");
    let mut problem = PricingProblem::new(
        Arc::new(model),
        Payoff::put(1.0).expect("Valid strike"),
        domain.clone(),
        1.0,
    )
    .expect("Valid problem");
    problem.time_steps = 50;
    problem.boundary = BoundaryCondition::Constraints(vec![BoundaryRule::dirichlet(
        BoundaryFaces::X_MIN | BoundaryFaces::X_MAX,
        BoundaryValue::MeanVarianceBlackScholes,
    )]);

    let mesh = Arc::new(Mesh::structured(&domain, &[48, 16]).expect("Valid mesh"));
    let mut timer = Timer::new();
    timer.start();
    let solution = problem.solve_on(&mesh).expect("Solve succeeds");
    println!(
        "  {} elements, {} dofs, solved in {:.1} ms",
        mesh.num_elements(),
        solution.space().num_dofs(),
        timer.elapsed_ms()
    );
    println!("  {:>6} {:>8} {:>12} {:>12}", "spot", "v0", "Heston", "BS(√v0)");
    for &spot in &[0.8, 1.0, 1.2] {
        for &v0 in &[0.02, 0.04, 0.08] {
            let price = problem.price_at(&solution, spot, &[v0]).expect("Point inside mesh");
            let reference = bs_put_price(spot, 1.0, 0.03, 0.0, v0.sqrt(), 1.0);
            println!("  {:>6.2} {:>8.3} {:>12.6} {:>12.6}", spot, v0, price, reference);
        }
    }
}
