// src/solvers/time_grid.rs
use crate::error::{validation::*, PdeError, PdeResult};

/// Strictly increasing time-to-maturity points τ₀ < τ₁ < … < τ_N
#[derive(Clone, Debug, PartialEq)]
pub struct TimeGrid {
    points: Vec<f64>,
}

impl TimeGrid {
    pub fn new(points: Vec<f64>) -> PdeResult<Self> {
        if points.len() < 2 {
            return Err(PdeError::InvalidConfiguration {
                field: "time_grid".to_string(),
                reason: format!("need at least two time points, got {}", points.len()),
            });
        }
        for (i, &t) in points.iter().enumerate() {
            validate_finite(&format!("time[{}]", i), t)?;
        }
        if let Some(i) = points.windows(2).position(|w| w[1] <= w[0]) {
            return Err(PdeError::InvalidConfiguration {
                field: "time_grid".to_string(),
                reason: format!(
                    "time points must be strictly increasing: τ[{}] = {} ≥ τ[{}] = {}",
                    i,
                    points[i],
                    i + 1,
                    points[i + 1]
                ),
            });
        }
        Ok(TimeGrid { points })
    }

    /// `steps` equal steps from `start` to `end`.
    pub fn uniform(start: f64, end: f64, steps: usize) -> PdeResult<Self> {
        validate_count("steps", steps)?;
        let h = (end - start) / steps as f64;
        let mut points: Vec<f64> = (0..steps).map(|n| start + h * n as f64).collect();
        points.push(end);
        Self::new(points)
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn start(&self) -> f64 {
        self.points[0]
    }

    pub fn end(&self) -> f64 {
        self.points[self.points.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn num_steps(&self) -> usize {
        self.points.len() - 1
    }

    /// Length of step `n`, from τ_n to τ_{n+1}.
    pub fn step_size(&self, n: usize) -> f64 {
        self.points[n + 1] - self.points[n]
    }
}
