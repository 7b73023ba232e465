// src/models/heston.rs
//! Heston Stochastic Volatility Model as a two-dimensional pricing PDE
//!
//! # Mathematical Framework
//!
//! ```text
//! dS_t = (r - q) S_t dt + √V_t S_t dW_t^(1)
//! dV_t = κ(θ - V_t) dt + ξ√V_t dW_t^(2),   d⟨W^(1), W^(2)⟩ = ρ dt
//! ```
//!
//! Spatial coordinates are `x = (s, v)`. The generator coefficients are
//! ```text
//! A(s, v) = | s²v     ρξsv |      ∇·A = | 2sv + ρξs |      b = | (r - q)s |
//!           | ρξsv    ξ²v  |            | ρξv + ξ²  |          | κ(θ - v) |
//! ```
//!
//! # Feller Condition
//!
//! `2κθ > ξ²` keeps the variance away from zero. Violations are legal for
//! the PDE (the `v = 0` face becomes an outflow boundary) but are logged.

use super::model::{cir_mean_variance, Market, PricingDynamics};
use crate::error::{validation::*, PdeError, PdeResult};
use nalgebra::{DMatrix, DVector};

#[derive(Clone, Copy, Debug)]
pub struct HestonParams {
    pub kappa: f64, // Mean reversion speed
    pub theta: f64, // Long-term variance
    pub xi: f64,    // Volatility of variance (vol-of-vol)
    pub rho: f64,   // Correlation between stock and variance
}

#[derive(Clone, Debug)]
pub struct Heston {
    pub market: Market,
    pub params: HestonParams,
}

impl Heston {
    pub fn new(market: Market, params: HestonParams) -> PdeResult<Self> {
        Self::validate_params(&params)?;

        if !params.feller_satisfied() {
            log::warn!(
                "Feller condition violated (2κθ = {:.4} ≤ ξ² = {:.4}); variance may reach zero",
                2.0 * params.kappa * params.theta,
                params.xi * params.xi
            );
        }

        Ok(Heston { market, params })
    }

    /// Validate Heston parameters
    pub(crate) fn validate_params(params: &HestonParams) -> PdeResult<()> {
        validate_positive("kappa", params.kappa)?;
        validate_positive("theta", params.theta)?;
        validate_non_negative("xi", params.xi)?;
        validate_correlation("rho", params.rho)?;

        if params.kappa > 100.0 {
            return Err(PdeError::InvalidParameters {
                parameter: "kappa".to_string(),
                value: params.kappa,
                constraint: "extremely high mean reversion speed (>100) makes the operator stiff"
                    .to_string(),
            });
        }

        if params.xi > 5.0 {
            return Err(PdeError::InvalidParameters {
                parameter: "xi".to_string(),
                value: params.xi,
                constraint: "extremely high vol-of-vol (>5) may cause numerical issues".to_string(),
            });
        }

        Ok(())
    }
}

impl HestonParams {
    pub fn feller_satisfied(&self) -> bool {
        2.0 * self.kappa * self.theta > self.xi * self.xi
    }
}

/// Upper-left 2×2 Heston block of the diffusion matrix, written into `a`.
pub(crate) fn heston_diffusion_block(params: &HestonParams, s: f64, v: f64, a: &mut DMatrix<f64>) {
    let v = v.max(0.0);
    let cross = params.rho * params.xi * s * v;
    a[(0, 0)] = s * s * v;
    a[(0, 1)] = cross;
    a[(1, 0)] = cross;
    a[(1, 1)] = params.xi * params.xi * v;
}

pub(crate) fn heston_divergence_block(params: &HestonParams, s: f64, v: f64, d: &mut DVector<f64>) {
    let rx = params.rho * params.xi;
    if v > 0.0 {
        d[0] = 2.0 * s * v + rx * s;
        d[1] = rx * v + params.xi * params.xi;
    } else {
        // A vanishes identically for v < 0, and so does its divergence
        d[0] = 0.0;
        d[1] = 0.0;
    }
}

impl PricingDynamics for Heston {
    fn dimension(&self) -> usize {
        2
    }

    fn market(&self) -> &Market {
        &self.market
    }

    fn diffusion(&self, x: &[f64]) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(2, 2);
        heston_diffusion_block(&self.params, x[0], x[1], &mut a);
        a
    }

    fn diffusion_divergence(&self, x: &[f64]) -> DVector<f64> {
        let mut d = DVector::zeros(2);
        heston_divergence_block(&self.params, x[0], x[1], &mut d);
        d
    }

    fn drift(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_vec(vec![
            (self.market.rate - self.market.dividend_yield) * x[0],
            self.params.kappa * (self.params.theta - x[1]),
        ])
    }

    fn mean_variance(&self, tau: f64, x: &[f64]) -> f64 {
        cir_mean_variance(self.params.kappa, self.params.theta, tau, x[1].max(0.0))
    }

    fn name(&self) -> &'static str {
        "Heston"
    }
}
