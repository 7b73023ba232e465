// src/models/heston_rates.rs
//! Heston dynamics with a mean-reverting (Vasicek) short rate
//!
//! ```text
//! dS_t = (r_t - q) S_t dt + √V_t S_t dW_t^(1)
//! dV_t = κ(θ - V_t) dt + ξ√V_t dW_t^(2)
//! dr_t = κ_r(θ_r - r_t) dt + σ_r dW_t^(3)
//! ```
//!
//! The rate factor is independent of the other two. Coordinates are
//! `x = (s, v, r)`, and the discount term of the PDE is the local rate
//! `r = x[2]` instead of the flat market rate. `Market::rate` is kept as
//! the reference rate for asymptotic boundary data.

use super::heston::{heston_diffusion_block, heston_divergence_block, Heston, HestonParams};
use super::model::{cir_mean_variance, Market, PricingDynamics};
use crate::error::{validation::*, PdeResult};
use nalgebra::{DMatrix, DVector};

#[derive(Clone, Copy, Debug)]
pub struct ShortRateParams {
    pub kappa: f64, // Rate mean reversion speed
    pub theta: f64, // Long-term rate level
    pub sigma: f64, // Rate volatility
}

#[derive(Clone, Debug)]
pub struct HestonStochasticRate {
    pub market: Market,
    pub params: HestonParams,
    pub rate: ShortRateParams,
}

impl HestonStochasticRate {
    pub fn new(market: Market, params: HestonParams, rate: ShortRateParams) -> PdeResult<Self> {
        Heston::validate_params(&params)?;
        validate_positive("rate_kappa", rate.kappa)?;
        validate_finite("rate_theta", rate.theta)?;
        validate_non_negative("rate_sigma", rate.sigma)?;

        if !params.feller_satisfied() {
            log::warn!("Feller condition violated for the variance factor");
        }

        Ok(HestonStochasticRate {
            market,
            params,
            rate,
        })
    }
}

impl PricingDynamics for HestonStochasticRate {
    fn dimension(&self) -> usize {
        3
    }

    fn market(&self) -> &Market {
        &self.market
    }

    fn diffusion(&self, x: &[f64]) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(3, 3);
        heston_diffusion_block(&self.params, x[0], x[1], &mut a);
        a[(2, 2)] = self.rate.sigma * self.rate.sigma;
        a
    }

    fn diffusion_divergence(&self, x: &[f64]) -> DVector<f64> {
        let mut d = DVector::zeros(3);
        heston_divergence_block(&self.params, x[0], x[1], &mut d);
        d
    }

    fn drift(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_vec(vec![
            (x[2] - self.market.dividend_yield) * x[0],
            self.params.kappa * (self.params.theta - x[1]),
            self.rate.kappa * (self.rate.theta - x[2]),
        ])
    }

    fn discount_rate(&self, x: &[f64]) -> f64 {
        x[2]
    }

    fn mean_variance(&self, tau: f64, x: &[f64]) -> f64 {
        cir_mean_variance(self.params.kappa, self.params.theta, tau, x[1].max(0.0))
    }

    fn name(&self) -> &'static str {
        "Heston with stochastic rate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> HestonStochasticRate {
        HestonStochasticRate::new(
            Market::new(0.03, 0.01).unwrap(),
            HestonParams {
                kappa: 1.5,
                theta: 0.04,
                xi: 0.3,
                rho: -0.5,
            },
            ShortRateParams {
                kappa: 0.5,
                theta: 0.04,
                sigma: 0.01,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_rate_factor_coefficients() {
        let m = model();
        let x = [1.0, 0.04, 0.02];
        let a = m.diffusion(&x);
        assert_relative_eq!(a[(2, 2)], 1e-4, epsilon = 1e-18);
        assert_eq!(a[(0, 2)], 0.0);
        assert_eq!(a[(1, 2)], 0.0);
        let b = m.drift(&x);
        assert_relative_eq!(b[0], 0.02 - 0.01, epsilon = 1e-15);
        assert_relative_eq!(b[2], 0.5 * 0.02, epsilon = 1e-15);
        assert_eq!(m.discount_rate(&x), 0.02);
        assert_eq!(m.diffusion_divergence(&x)[2], 0.0);
    }

    #[test]
    fn test_rejects_negative_rate_volatility() {
        let m = model();
        let bad = ShortRateParams {
            sigma: -0.01,
            ..m.rate
        };
        assert!(HestonStochasticRate::new(m.market, m.params, bad).is_err());
    }
}
