// src/adaptive/refiner.rs
//! Adaptive solve–estimate–mark–refine loop
//!
//! The loop is an explicit [`Iterator`]: every `next()` solves on the
//! current mesh, evaluates the error indicator and prepares the next mesh.
//! It stops when
//! - the global estimate is at or below the tolerance,
//! - `max_iterations` solves have been made,
//! - the next mesh would exceed `max_elements`, or
//! - marking no longer changes the mesh.
//!
//! [`AdaptiveRefiner::run`] drives the iterator and keeps the snapshot
//! with the lowest estimate. Ending without reaching the tolerance is a
//! soft failure: the outcome carries `RefinementDidNotConverge` next to
//! the best mesh and solution.

use super::estimator::{estimate, mark, ErrorIndicator, RefinementCriterion};
use crate::error::{PdeError, PdeResult};
use crate::fem::RefinementLimits;
use crate::math_utils::Timer;
use crate::mesh::{refine, Mesh};
use crate::solvers::SolutionGrid;
use std::sync::Arc;

/// Which time row of the solution the indicator is computed on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SnapshotSelection {
    /// Last time point (the price today)
    #[default]
    Final,
    Index(usize),
}

#[derive(Clone, Debug, Default)]
pub struct AdaptiveConfig {
    pub criterion: RefinementCriterion,
    pub snapshot: SnapshotSelection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Converged,
    MaxIterations,
    ElementLimit,
    NoProgress,
}

/// One solve of the adaptive loop
#[derive(Clone, Debug)]
pub struct AdaptiveSnapshot {
    pub iteration: usize,
    pub mesh: Arc<Mesh>,
    pub solution: SolutionGrid,
    pub indicator: ErrorIndicator,
}

#[derive(Clone, Debug)]
pub struct AdaptiveOutcome {
    /// Snapshot with the lowest estimate
    pub best: AdaptiveSnapshot,
    pub iterations: usize,
    pub converged: bool,
    pub stop_reason: StopReason,
    /// `RefinementDidNotConverge` when the tolerance was not reached
    pub error: Option<PdeError>,
}

pub struct AdaptiveRefiner<F>
where
    F: FnMut(&Arc<Mesh>) -> PdeResult<SolutionGrid>,
{
    solve: F,
    limits: RefinementLimits,
    config: AdaptiveConfig,
    mesh: Arc<Mesh>,
    iteration: usize,
    stop: Option<StopReason>,
    failed: bool,
}

impl<F> AdaptiveRefiner<F>
where
    F: FnMut(&Arc<Mesh>) -> PdeResult<SolutionGrid>,
{
    pub fn new(
        mesh: Arc<Mesh>,
        limits: &RefinementLimits,
        config: &AdaptiveConfig,
        solve: F,
    ) -> PdeResult<Self> {
        limits.validate()?;
        Ok(AdaptiveRefiner {
            solve,
            limits: limits.clone(),
            config: config.clone(),
            mesh,
            iteration: 0,
            stop: None,
            failed: false,
        })
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// Run to termination and return the best snapshot.
    pub fn run(mut self) -> PdeResult<AdaptiveOutcome> {
        let mut best: Option<AdaptiveSnapshot> = None;
        let mut iterations = 0;
        for snapshot in self.by_ref() {
            let snapshot = snapshot?;
            iterations += 1;
            let better = best
                .as_ref()
                .map_or(true, |b| snapshot.indicator.estimate < b.indicator.estimate);
            if better {
                best = Some(snapshot);
            }
        }

        let (best, stop_reason) = match (best, self.stop) {
            (Some(best), Some(reason)) => (best, reason),
            _ => {
                return Err(PdeError::InvalidConfiguration {
                    field: "adaptive".to_string(),
                    reason: "adaptive loop ended without a solution".to_string(),
                })
            }
        };

        let converged = stop_reason == StopReason::Converged;
        let error = if converged {
            None
        } else {
            let reason = match stop_reason {
                StopReason::MaxIterations => "iteration limit reached",
                StopReason::ElementLimit => "element limit blocks further refinement",
                StopReason::NoProgress => "marking no longer changes the mesh",
                StopReason::Converged => "converged",
            };
            let error = PdeError::RefinementDidNotConverge {
                iterations,
                estimate: best.indicator.estimate,
                tolerance: self.limits.tolerance,
                reason: reason.to_string(),
            };
            log::warn!("{}; keeping mesh of iteration {}", error, best.iteration);
            Some(error)
        };

        Ok(AdaptiveOutcome {
            best,
            iterations,
            converged,
            stop_reason,
            error,
        })
    }

    fn solve_and_estimate(&mut self) -> PdeResult<AdaptiveSnapshot> {
        let solution = (self.solve)(&self.mesh)?;
        let row = match self.config.snapshot {
            SnapshotSelection::Final => solution.len().saturating_sub(1),
            SnapshotSelection::Index(i) if i < solution.len() => i,
            SnapshotSelection::Index(i) => {
                return Err(PdeError::InvalidConfiguration {
                    field: "snapshot".to_string(),
                    reason: format!("time index {} outside a grid of {} points", i, solution.len()),
                })
            }
        };
        let coefficients = solution.row(row).to_vec();
        let indicator = estimate(solution.space(), &coefficients, self.config.criterion)?;
        Ok(AdaptiveSnapshot {
            iteration: self.iteration,
            mesh: Arc::clone(&self.mesh),
            solution,
            indicator,
        })
    }

    /// Next mesh, or the reason the loop ends here.
    fn next_mesh(&self, indicator: &ErrorIndicator) -> PdeResult<Result<Mesh, StopReason>> {
        if indicator.estimate <= self.limits.tolerance {
            return Ok(Err(StopReason::Converged));
        }
        if self.iteration + 1 >= self.limits.max_iterations {
            return Ok(Err(StopReason::MaxIterations));
        }
        let marking = mark(
            indicator,
            self.limits.refine_fraction,
            self.limits.coarsen_fraction,
        );
        let remesh = refine::adapt(
            &self.mesh,
            &marking.refine,
            &marking.coarsen,
            self.limits.min_elements,
        )?;
        if remesh.mesh.num_elements() > self.limits.max_elements {
            return Ok(Err(StopReason::ElementLimit));
        }
        let unchanged = remesh.mesh.num_elements() == self.mesh.num_elements()
            && remesh.mesh.num_nodes() == self.mesh.num_nodes();
        if unchanged {
            return Ok(Err(StopReason::NoProgress));
        }
        log::debug!(
            "Marked {} elements for refinement and {} for coarsening",
            marking.num_refine(),
            marking.num_coarsen()
        );
        Ok(Ok(remesh.mesh))
    }
}

impl<F> Iterator for AdaptiveRefiner<F>
where
    F: FnMut(&Arc<Mesh>) -> PdeResult<SolutionGrid>,
{
    type Item = PdeResult<AdaptiveSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() || self.failed {
            return None;
        }
        let timer = Timer::new();
        let step = self
            .solve_and_estimate()
            .and_then(|snapshot| Ok((self.next_mesh(&snapshot.indicator)?, snapshot)));
        let (next, snapshot) = match step {
            Ok(step) => step,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };

        log::info!(
            "Adaptive iteration {}: {} elements, estimate {:.6e} ({:.1} ms)",
            snapshot.iteration,
            snapshot.mesh.num_elements(),
            snapshot.indicator.estimate,
            timer.elapsed_ms()
        );

        match next {
            Ok(mesh) => {
                self.mesh = Arc::new(mesh);
                self.iteration += 1;
            }
            Err(reason) => self.stop = Some(reason),
        }
        Some(Ok(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fem::{ElementOrder, FunctionSpace};
    use crate::mesh::Domain;
    use ndarray::Array2;

    /// Interpolates |x - 1| onto the mesh as a one-row "solution".
    fn kink(mesh: &Arc<Mesh>) -> PdeResult<SolutionGrid> {
        let space = FunctionSpace::new(Arc::clone(mesh), ElementOrder::Linear);
        let values = space.interpolate(|x| (x[0] - 1.0).abs());
        let grid = Array2::from_shape_vec((1, values.len()), values).map_err(|e| PdeError::InvalidConfiguration {
            field: "values".to_string(),
            reason: e.to_string(),
        })?;
        Ok(SolutionGrid::new(space, vec![0.0], grid))
    }

    fn coarse() -> Arc<Mesh> {
        Arc::new(Mesh::uniform(&Domain::interval(0.0, 2.0).unwrap(), 2).unwrap())
    }

    #[test]
    fn test_refines_towards_kink_until_tolerance() {
        let limits = RefinementLimits {
            tolerance: 0.55,
            ..Default::default()
        };
        let outcome = AdaptiveRefiner::new(coarse(), &limits, &AdaptiveConfig::default(), kink)
            .unwrap()
            .run()
            .unwrap();
        assert!(outcome.converged);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.iterations, 4);
        assert_eq!(outcome.best.iteration, 3);
        assert_eq!(outcome.best.mesh.num_elements(), 10);
        assert!(outcome.best.indicator.estimate <= 0.55);
    }

    #[test]
    fn test_estimates_decrease_along_iterator() {
        let limits = RefinementLimits {
            tolerance: 0.0,
            max_iterations: 4,
            ..Default::default()
        };
        let estimates: Vec<f64> = AdaptiveRefiner::new(coarse(), &limits, &AdaptiveConfig::default(), kink)
            .unwrap()
            .map(|s| s.unwrap().indicator.estimate)
            .collect();
        assert_eq!(estimates.len(), 4);
        assert!(estimates.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_soft_failure_keeps_best_snapshot() {
        let limits = RefinementLimits {
            tolerance: 1e-6,
            max_iterations: 2,
            ..Default::default()
        };
        let outcome = AdaptiveRefiner::new(coarse(), &limits, &AdaptiveConfig::default(), kink)
            .unwrap()
            .run()
            .unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
        assert_eq!(outcome.best.iteration, 1);
        assert!(matches!(
            outcome.error,
            Some(PdeError::RefinementDidNotConverge { iterations: 2, .. })
        ));
    }

    #[test]
    fn test_element_limit_blocks_refinement() {
        let limits = RefinementLimits {
            tolerance: 1e-6,
            max_elements: 5,
            ..Default::default()
        };
        let outcome = AdaptiveRefiner::new(coarse(), &limits, &AdaptiveConfig::default(), kink)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::ElementLimit);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.best.mesh.num_elements(), 4);
    }

    #[test]
    fn test_solver_error_ends_iteration() {
        let limits = RefinementLimits::default();
        let mut refiner = AdaptiveRefiner::new(coarse(), &limits, &AdaptiveConfig::default(), |_| {
            Err(PdeError::InvalidConfiguration {
                field: "solve".to_string(),
                reason: "always fails".to_string(),
            })
        })
        .unwrap();
        assert!(matches!(refiner.next(), Some(Err(_))));
        assert!(refiner.next().is_none());

        let bad = AdaptiveConfig {
            snapshot: SnapshotSelection::Index(3),
            ..Default::default()
        };
        let result = AdaptiveRefiner::new(coarse(), &limits, &bad, kink).unwrap().run();
        assert!(result.is_err());
    }
}
