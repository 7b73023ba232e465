// src/models/local_vol.rs
use super::model::{Market, PricingDynamics};
use crate::error::PdeResult;
use nalgebra::{DMatrix, DVector};
use std::fmt;
use std::sync::Arc;

pub type VolatilitySurface = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Local volatility dynamics `dS = (r - q) S dt + σ(S) S dW` in price coordinates
///
/// The divergence of `A(s) = σ(s)²s²` is taken by a central difference, so
/// σ only needs to be continuous. Non-finite volatilities surface later as
/// assembly errors on the offending element.
#[derive(Clone)]
pub struct LocalVolatility {
    pub market: Market,
    volatility: VolatilitySurface,
}

impl LocalVolatility {
    pub fn new(market: Market, volatility: VolatilitySurface) -> PdeResult<Self> {
        Ok(LocalVolatility { market, volatility })
    }

    pub fn volatility(&self, s: f64) -> f64 {
        (self.volatility)(s)
    }

    fn coefficient(&self, s: f64) -> f64 {
        let sigma = self.volatility(s);
        sigma * sigma * s * s
    }
}

impl fmt::Debug for LocalVolatility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalVolatility")
            .field("market", &self.market)
            .finish_non_exhaustive()
    }
}

impl PricingDynamics for LocalVolatility {
    fn dimension(&self) -> usize {
        1
    }

    fn market(&self) -> &Market {
        &self.market
    }

    fn diffusion(&self, x: &[f64]) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, self.coefficient(x[0]))
    }

    fn diffusion_divergence(&self, x: &[f64]) -> DVector<f64> {
        let s = x[0];
        let h = 1e-6 * s.abs().max(1.0);
        let da = (self.coefficient(s + h) - self.coefficient(s - h)) / (2.0 * h);
        DVector::from_element(1, da)
    }

    fn drift(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_element(1, (self.market.rate - self.market.dividend_yield) * x[0])
    }

    fn mean_variance(&self, _tau: f64, x: &[f64]) -> f64 {
        let sigma = self.volatility(x[0]);
        sigma * sigma
    }

    fn name(&self) -> &'static str {
        "Local volatility"
    }
}
