// src/models/model.rs
use crate::error::{validation::*, PdeResult};
use nalgebra::{DMatrix, DVector};

/// Flat market: continuously compounded rate and dividend (carry) yield.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Market {
    pub rate: f64,
    pub dividend_yield: f64,
}

impl Market {
    pub fn new(rate: f64, dividend_yield: f64) -> PdeResult<Self> {
        validate_finite("rate", rate)?;
        validate_finite("dividend_yield", dividend_yield)?;
        Ok(Market {
            rate,
            dividend_yield,
        })
    }

    /// Discount factor `exp(-r τ)`
    pub fn discount_factor(&self, tau: f64) -> f64 {
        (-self.rate * tau).exp()
    }

    /// Dividend discount factor `exp(-q τ)`
    pub fn dividend_discount(&self, tau: f64) -> f64 {
        (-self.dividend_yield * tau).exp()
    }

    /// Forward price of the underlying for spot `s`
    pub fn forward(&self, s: f64, tau: f64) -> f64 {
        s * self.dividend_discount(tau) / self.discount_factor(tau)
    }
}

/// Coordinate used for the underlying price axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriceCoordinate {
    /// x = S
    Price,
    /// x = ln S
    LogPrice,
}

impl PriceCoordinate {
    pub fn to_spot(&self, x: f64) -> f64 {
        match self {
            PriceCoordinate::Price => x,
            PriceCoordinate::LogPrice => x.exp(),
        }
    }

    pub fn from_spot(&self, s: f64) -> f64 {
        match self {
            PriceCoordinate::Price => s,
            PriceCoordinate::LogPrice => s.ln(),
        }
    }
}

/// Coefficients of the forward pricing PDE in Feynman–Kac form
///
/// ```text
/// ∂u/∂τ = ½ A : ∇²u + b·∇u - r u
///       = ½ ∇·(A∇u) + (b - ½ ∇·A)·∇u - r u
/// ```
///
/// The first coordinate is always the underlying (in the model's
/// [`PriceCoordinate`]); further coordinates are state variables such as
/// the instantaneous variance or the short rate.
pub trait PricingDynamics: Send + Sync {
    /// Number of spatial dimensions the model lives in.
    fn dimension(&self) -> usize;

    fn market(&self) -> &Market;

    /// Symmetric diffusion (covariance) matrix A(x).
    fn diffusion(&self, x: &[f64]) -> DMatrix<f64>;

    /// Row-wise divergence of A, `(∇·A)_i = Σ_j ∂A_ij/∂x_j`.
    fn diffusion_divergence(&self, x: &[f64]) -> DVector<f64>;

    /// Drift vector b(x).
    fn drift(&self, x: &[f64]) -> DVector<f64>;

    /// Discount (reaction) rate; constant unless the model carries a rate factor.
    fn discount_rate(&self, _x: &[f64]) -> f64 {
        self.market().rate
    }

    fn price_coordinate(&self) -> PriceCoordinate {
        PriceCoordinate::Price
    }

    /// Underlying spot at a spatial coordinate.
    fn spot(&self, x: &[f64]) -> f64 {
        self.price_coordinate().to_spot(x[0])
    }

    /// Average expected variance over `[0, τ]` seen from state `x`.
    fn mean_variance(&self, tau: f64, x: &[f64]) -> f64;

    fn name(&self) -> &'static str;
}

/// Mean over `[0, τ]` of a mean-reverting variance `E[v_t] = θ + (v - θ)e^{-κt}`.
pub(crate) fn cir_mean_variance(kappa: f64, theta: f64, tau: f64, v: f64) -> f64 {
    let x = kappa * tau;
    if x < 1e-10 {
        return v;
    }
    -(-x).exp_m1() / x * (v - theta) + theta
}
