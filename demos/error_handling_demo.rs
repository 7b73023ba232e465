// demos/error_handling_demo.rs
use fast_fem::mesh::{Domain, Mesh};
use fast_fem::models::{Heston, HestonParams, Market};
use fast_fem::pricing::{Payoff, PricingProblem};
use fast_fem::solvers::{StabilityCheck, ThetaConfig};
use fast_fem::PdeError;
use std::sync::Arc;

fn main() {
    env_logger::init();
    println!("Error Handling Demo for fast-fem");
    println!("================================\n");

    // Test 1: Degenerate domain
    println!("1. Testing a degenerate domain...");
    match Domain::interval(2.0, 2.0) {
        Ok(_) => println!("   Unexpected: Should have failed!"),
        Err(e) => println!("   ✓ Caught error: {}", e),
    }

    // Test 2: Invalid correlation
    println!("\n2. Testing invalid Heston correlation...");
    let market = Market::new(0.03, 0.0).expect("Valid market");
    let invalid_rho = HestonParams {
        kappa: 2.0,
        theta: 0.04,
        xi: 0.3,
        rho: 1.5,
    };
    match Heston::new(market, invalid_rho) {
        Ok(_) => println!("   Unexpected: Should have failed!"),
        Err(PdeError::InvalidParameters {
            parameter,
            value,
            constraint,
        }) => {
            println!("   ✓ Caught InvalidParameters: {} = {} ({})", parameter, value, constraint);
        }
        Err(other) => println!("   Unexpected error type: {}", other),
    }

    // Test 3: Extreme parameters that should warn but not fail
    println!("\n3. Testing extreme but valid parameters...");
    let extreme = HestonParams {
        kappa: 1.0,
        theta: 0.04,
        xi: 0.8,
        rho: -0.5,
    };
    match Heston::new(market, extreme) {
        Ok(_) => println!("   ✓ Created with warning (Feller condition violated)"),
        Err(e) => println!("   Error: {}", e),
    }

    // Test 4: Model and domain dimension disagree
    println!("\n4. Testing a 1D domain for a 2D model...");
    let heston = Heston::new(
        market,
        HestonParams {
            kappa: 2.0,
            theta: 0.04,
            xi: 0.3,
            rho: -0.5,
        },
    )
    .expect("Valid parameters");
    let domain = Domain::interval(0.0, 3.0).expect("Valid domain");
    match PricingProblem::new(Arc::new(heston), Payoff::put(1.0).expect("Valid strike"), domain, 1.0) {
        Ok(_) => println!("   Unexpected: Should have failed!"),
        Err(e) => println!("   ✓ Caught error: {}", e),
    }

    // Test 5: Explicit Euler with a time step beyond the stability bound
    println!("\n5. Testing an unstable explicit scheme...");
    let mut problem = PricingProblem::default_call().expect("Valid problem");
    problem.time_steps = 10;
    problem.theta = ThetaConfig {
        theta: 0.0,
        stability: StabilityCheck::Estimated {
            safety_factor: 0.9,
            iterations: 30,
        },
        ..Default::default()
    };
    match problem.solve(6) {
        Ok(_) => println!("   Unexpected: Should have failed!"),
        Err(PdeError::TimeIntegration { step, time, reason }) => {
            println!("   ✓ Caught TimeIntegration at step {} (tau = {:.4}): {}", step, time, reason);
        }
        Err(other) => println!("   Unexpected error type: {}", other),
    }

    // Test 6: Adaptive loop that cannot reach its tolerance
    println!("\n6. Testing an adaptive loop with an unreachable tolerance...");
    let mut problem = PricingProblem::default_call().expect("Valid problem");
    problem.discretization.refinement.tolerance = 1e-12;
    problem.discretization.refinement.max_iterations = 3;
    match problem.solve_adaptive(4) {
        Ok(outcome) => match outcome.error {
            Some(e) => println!(
                "   ✓ Soft failure: {} (kept {} elements)",
                e,
                outcome.best.mesh.num_elements()
            ),
            None => println!("   Unexpected: Should not have converged!"),
        },
        Err(e) => println!("   Unexpected error: {}", e),
    }

    // Test 7: Valid configuration should work
    println!("\n7. Testing a valid configuration...");
    let problem = PricingProblem::default_call().expect("Valid problem");
    let result = Mesh::uniform(&problem.domain, 6)
        .map(Arc::new)
        .and_then(|mesh| problem.solve_on(&mesh))
        .and_then(|solution| problem.price_at(&solution, 1.0, &[]));
    match result {
        Ok(price) => println!("   ✓ Success: Price = {:.6}", price),
        Err(e) => println!("   Unexpected error: {}", e),
    }

    println!("\n✓ Error handling demo complete!");
    println!("All error cases were properly caught and handled.");
}
