// demos/adaptive_demo.rs
use fast_fem::adaptive::{AdaptiveRefiner, RefinementCriterion};
use fast_fem::analytics::bs_analytic::bs_call_price;
use fast_fem::mesh::Mesh;
use fast_fem::pricing::PricingProblem;
use std::sync::Arc;

fn main() {
    env_logger::init();
    println!("Adaptive Refinement Demo for fast-fem");
    println!("=====================================\n");

    let exact = bs_call_price(1.0, 1.0, 0.03, 0.0, 0.2, 1.0);

    for criterion in [RefinementCriterion::Residual, RefinementCriterion::Gradient] {
        println!("Indicator: {:?}", criterion);
        let mut problem = PricingProblem::default_call().expect("Valid problem");
        problem.adaptive.criterion = criterion;
        problem.discretization.refinement.max_iterations = 8;
        problem.discretization.refinement.tolerance = 1e-6;
        problem.discretization.refinement.coarsen_fraction = Some(0.01);

        let mesh = Arc::new(Mesh::uniform(&problem.domain, 4).expect("Valid mesh"));
        let refiner = AdaptiveRefiner::new(
            mesh,
            &problem.discretization.refinement,
            &problem.adaptive,
            |mesh: &Arc<Mesh>| problem.solve_on(mesh),
        )
        .expect("Valid limits");

        println!("  {:>4} {:>9} {:>12} {:>12} {:>12}", "iter", "elements", "estimate", "price", "abs error");
        for snapshot in refiner {
            let snapshot = match snapshot {
                Ok(s) => s,
                Err(e) => {
                    println!("  Adaptive loop failed: {}", e);
                    break;
                }
            };
            let price = problem
                .price_at(&snapshot.solution, 1.0, &[])
                .expect("Spot inside mesh");
            println!(
                "  {:>4} {:>9} {:>12.4e} {:>12.6} {:>12.2e}",
                snapshot.iteration,
                snapshot.mesh.num_elements(),
                snapshot.indicator.estimate,
                price,
                (price - exact).abs()
            );
        }

        match problem.solve_adaptive(4) {
            Ok(outcome) => {
                println!(
                    "  Stopped: {:?} after {} iterations, best mesh from iteration {}",
                    outcome.stop_reason, outcome.iterations, outcome.best.iteration
                );
                if let Some(e) = outcome.error {
                    println!("  ⚠ {}", e);
                }
                let smallest = (0..outcome.best.mesh.num_elements())
                    .map(|e| outcome.best.mesh.element_diameter(e))
                    .fold(f64::INFINITY, f64::min);
                println!("  Smallest element: {:.4e}\n", smallest);
            }
            Err(e) => println!("  Adaptive solve failed: {}\n", e),
        }
    }
}
