// tests/adaptive_test.rs
use fast_fem::adaptive::{estimate, mark, AdaptiveConfig, AdaptiveRefiner, RefinementCriterion, StopReason};
use fast_fem::analytics::bs_analytic::bs_call_price;
use fast_fem::fem::{ElementOrder, FunctionSpace, RefinementLimits};
use fast_fem::mesh::{refine, Domain, Mesh};
use fast_fem::pricing::PricingProblem;
use fast_fem::PdeError;
use std::sync::Arc;

fn adaptive_call(max_iterations: usize, tolerance: f64) -> PricingProblem {
    let mut problem = PricingProblem::default_call().expect("Valid problem");
    problem.time_steps = 50;
    problem.discretization.refinement = RefinementLimits {
        max_iterations,
        tolerance,
        ..Default::default()
    };
    problem
}

/// Elements whose centroid satisfies `keep`.
fn count_elements(mesh: &Mesh, keep: impl Fn(f64) -> bool) -> usize {
    (0..mesh.num_elements())
        .filter(|&e| keep(mesh.element_centroid(e)[0]))
        .count()
}

#[test]
fn test_adaptive_call_soft_failure_keeps_usable_solution() {
    let problem = adaptive_call(4, 0.0);
    let outcome = problem.solve_adaptive(5).expect("Adaptive solve succeeds");

    assert!(!outcome.converged);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
    assert!(matches!(
        outcome.error,
        Some(PdeError::RefinementDidNotConverge { iterations: 4, .. })
    ));

    let price = problem
        .price_at(&outcome.best.solution, 1.0, &[])
        .expect("Spot inside mesh");
    let exact = bs_call_price(1.0, 1.0, 0.03, 0.0, 0.2, 1.0);
    assert!((price - exact).abs() < 1e-2, "adaptive {} vs {}", price, exact);
    assert!(outcome.best.mesh.validate().is_ok());
}

#[test]
fn test_adaptive_loop_grows_mesh_and_keeps_lowest_estimate() {
    let problem = adaptive_call(3, 0.0);
    let mesh = Arc::new(Mesh::uniform(&problem.domain, 4).unwrap());
    let snapshots: Vec<_> = AdaptiveRefiner::new(
        mesh,
        &problem.discretization.refinement,
        &AdaptiveConfig::default(),
        |mesh: &Arc<Mesh>| problem.solve_on(mesh),
    )
    .unwrap()
    .collect::<Result<Vec<_>, _>>()
    .expect("Every iteration solves");

    assert_eq!(snapshots.len(), 3);
    let near_strike = |x: f64| (x - 1.0).abs() < 0.5;
    for pair in snapshots.windows(2) {
        assert!(pair[1].mesh.num_elements() > pair[0].mesh.num_elements());
        assert!(
            count_elements(&pair[1].mesh, near_strike) > count_elements(&pair[0].mesh, near_strike),
            "no growth next to the strike at iteration {}",
            pair[1].iteration
        );
        assert_eq!(pair[1].iteration, pair[0].iteration + 1);
    }

    let lowest = snapshots
        .iter()
        .map(|s| s.indicator.estimate)
        .fold(f64::INFINITY, f64::min);
    let outcome = problem.solve_adaptive(4).unwrap();
    assert_eq!(outcome.best.indicator.estimate, lowest);
}

#[test]
fn test_coarsening_respects_element_floor() {
    let mut problem = adaptive_call(4, 0.0);
    problem.discretization.refinement.refine_fraction = 0.6;
    problem.discretization.refinement.coarsen_fraction = Some(0.05);
    problem.discretization.refinement.min_elements = 16;

    let mesh = Arc::new(Mesh::uniform(&problem.domain, 4).unwrap());
    let refiner = AdaptiveRefiner::new(
        mesh,
        &problem.discretization.refinement,
        &AdaptiveConfig::default(),
        |mesh: &Arc<Mesh>| problem.solve_on(mesh),
    )
    .unwrap();
    for snapshot in refiner {
        let snapshot = snapshot.expect("Every iteration solves");
        assert!(snapshot.mesh.num_elements() >= 16);
        assert!(snapshot.mesh.validate().is_ok());
    }
}

#[test]
fn test_coarsening_thins_the_smooth_far_field() {
    let mut problem = adaptive_call(6, 0.0);
    problem.discretization.refinement.refine_fraction = 0.3;
    problem.discretization.refinement.coarsen_fraction = Some(0.05);

    let mesh = Arc::new(Mesh::uniform(&problem.domain, 4).unwrap());
    let snapshots: Vec<_> = AdaptiveRefiner::new(
        mesh,
        &problem.discretization.refinement,
        &AdaptiveConfig::default(),
        |mesh: &Arc<Mesh>| problem.solve_on(mesh),
    )
    .unwrap()
    .collect::<Result<Vec<_>, _>>()
    .expect("Every iteration solves");

    let far = |x: f64| x > 2.5;
    let first = count_elements(&snapshots[0].mesh, far);
    assert_eq!(first, 6);
    let fewest = snapshots
        .iter()
        .map(|s| count_elements(&s.mesh, far))
        .min()
        .unwrap();
    assert!(fewest < first, "far field kept {} elements", fewest);

    let last = snapshots.last().unwrap();
    assert!(last.mesh.num_elements() > snapshots[0].mesh.num_elements());
    assert!(last.mesh.validate().is_ok());
}

#[test]
fn test_residual_marks_refine_kink_then_coarsen_smooth_data() {
    let domain = Domain::interval(0.0, 2.0).unwrap();
    let mesh = Mesh::uniform(&domain, 3).unwrap();
    assert_eq!(mesh.num_elements(), 8);

    // |x - 1| only jumps at the strike node
    let space = FunctionSpace::new(Arc::new(mesh), ElementOrder::Linear);
    let values = space.interpolate(|x| (x[0] - 1.0).abs());
    let indicator = estimate(&space, &values, RefinementCriterion::Residual).unwrap();
    let marking = mark(&indicator, 0.5, None);
    assert_eq!(marking.num_refine(), 2);
    let refined = refine::adapt(space.mesh(), &marking.refine, &marking.coarsen, 4).unwrap().mesh;
    assert_eq!(refined.num_elements(), 10);
    let smallest = (0..refined.num_elements())
        .map(|e| refined.element_diameter(e))
        .fold(f64::INFINITY, f64::min);
    assert!((smallest - 0.125).abs() < 1e-14);
    assert_eq!(count_elements(&refined, |x| (x - 1.0).abs() < 0.25), 4);

    // x² has jumps that scale with the element size, so the refined pair is now
    // far below the coarsening threshold
    let space = FunctionSpace::new(Arc::new(refined), ElementOrder::Linear);
    let values = space.interpolate(|x| x[0] * x[0]);
    let indicator = estimate(&space, &values, RefinementCriterion::Residual).unwrap();
    let marking = mark(&indicator, 0.5, Some(0.3));
    assert_eq!(marking.num_coarsen(), 4);
    let coarse = refine::coarsen(space.mesh(), &marking.coarsen, 4).unwrap().mesh;
    assert_eq!(coarse.num_elements(), 8);
    assert_eq!(coarse.num_nodes(), 9);
    assert_eq!(count_elements(&coarse, |x| (x - 1.0).abs() < 0.25), 2);
    assert!(coarse.validate().is_ok());
}

#[test]
fn test_gradient_recovery_criterion_drives_the_loop() {
    let mut problem = adaptive_call(3, 0.0);
    problem.adaptive.criterion = RefinementCriterion::Gradient;
    let outcome = problem.solve_adaptive(4).unwrap();
    assert_eq!(outcome.iterations, 3);
    assert!(outcome.best.indicator.estimate.is_finite());
    assert_eq!(
        outcome.best.indicator.len(),
        outcome.best.mesh.num_elements()
    );
}

#[test]
fn test_element_limit_stops_refinement() {
    let mut problem = adaptive_call(6, 0.0);
    problem.discretization.refinement.max_elements = 20;
    let outcome = problem.solve_adaptive(4).unwrap();
    assert_eq!(outcome.stop_reason, StopReason::ElementLimit);
    assert!(outcome.best.mesh.num_elements() <= 20);
    assert!(outcome.error.is_some());
}

#[test]
fn test_invalid_limits_rejected() {
    let mut problem = adaptive_call(4, 0.0);
    problem.discretization.refinement.coarsen_fraction = Some(0.9);
    assert!(problem.solve_adaptive(3).is_err());

    let domain = Domain::interval(0.0, 4.0).unwrap();
    let limits = RefinementLimits {
        min_elements: 10,
        max_elements: 5,
        ..Default::default()
    };
    let result = AdaptiveRefiner::new(
        Arc::new(Mesh::uniform(&domain, 2).unwrap()),
        &limits,
        &AdaptiveConfig::default(),
        |mesh: &Arc<Mesh>| problem.solve_on(mesh),
    );
    assert!(result.is_err());
}
