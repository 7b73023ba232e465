// src/models/black_scholes.rs
use super::model::{Market, PriceCoordinate, PricingDynamics};
use crate::error::{validation::*, PdeResult};
use nalgebra::{DMatrix, DVector};

/// One-factor Black-Scholes dynamics `dS = (r - q) S dt + σ S dW`
///
/// In price coordinates the generator has `A = σ²s²` and `b = (r - q)s`;
/// in log-price coordinates the coefficients are constant, `A = σ²` and
/// `b = r - q - σ²/2`.
#[derive(Clone, Debug)]
pub struct BlackScholes {
    pub market: Market,
    pub sigma: f64,
    pub coordinate: PriceCoordinate,
}

impl BlackScholes {
    pub fn new(market: Market, sigma: f64, coordinate: PriceCoordinate) -> PdeResult<Self> {
        validate_non_negative("sigma", sigma)?;
        if sigma > 5.0 {
            log::warn!("Black-Scholes volatility {} is unusually large", sigma);
        }
        Ok(BlackScholes {
            market,
            sigma,
            coordinate,
        })
    }

    pub fn price(market: Market, sigma: f64) -> PdeResult<Self> {
        Self::new(market, sigma, PriceCoordinate::Price)
    }

    pub fn log_price(market: Market, sigma: f64) -> PdeResult<Self> {
        Self::new(market, sigma, PriceCoordinate::LogPrice)
    }

    fn variance(&self) -> f64 {
        self.sigma * self.sigma
    }
}

impl PricingDynamics for BlackScholes {
    fn dimension(&self) -> usize {
        1
    }

    fn market(&self) -> &Market {
        &self.market
    }

    fn diffusion(&self, x: &[f64]) -> DMatrix<f64> {
        let a = match self.coordinate {
            PriceCoordinate::Price => self.variance() * x[0] * x[0],
            PriceCoordinate::LogPrice => self.variance(),
        };
        DMatrix::from_element(1, 1, a)
    }

    fn diffusion_divergence(&self, x: &[f64]) -> DVector<f64> {
        let da = match self.coordinate {
            PriceCoordinate::Price => 2.0 * self.variance() * x[0],
            PriceCoordinate::LogPrice => 0.0,
        };
        DVector::from_element(1, da)
    }

    fn drift(&self, x: &[f64]) -> DVector<f64> {
        let carry = self.market.rate - self.market.dividend_yield;
        let b = match self.coordinate {
            PriceCoordinate::Price => carry * x[0],
            PriceCoordinate::LogPrice => carry - 0.5 * self.variance(),
        };
        DVector::from_element(1, b)
    }

    fn price_coordinate(&self) -> PriceCoordinate {
        self.coordinate
    }

    fn mean_variance(&self, _tau: f64, _x: &[f64]) -> f64 {
        self.variance()
    }

    fn name(&self) -> &'static str {
        match self.coordinate {
            PriceCoordinate::Price => "Black-Scholes",
            PriceCoordinate::LogPrice => "Black-Scholes (log-price)",
        }
    }
}
