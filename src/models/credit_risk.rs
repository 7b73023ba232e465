// src/models/credit_risk.rs
use super::model::{Market, PricingDynamics};
use crate::error::{validation::*, PdeResult};
use nalgebra::{DMatrix, DVector};

/// Defaultable claim under a constant default intensity λ
///
/// The state decays deterministically, `b = -λs`, with no diffusion, so the
/// generator reduces to transport plus discounting.
#[derive(Clone, Debug)]
pub struct CreditRisk {
    pub market: Market,
    pub intensity: f64,
}

impl CreditRisk {
    pub fn new(market: Market, intensity: f64) -> PdeResult<Self> {
        validate_non_negative("intensity", intensity)?;
        Ok(CreditRisk { market, intensity })
    }

    /// Survival probability `exp(-λ τ)`
    pub fn survival_probability(&self, tau: f64) -> f64 {
        (-self.intensity * tau).exp()
    }
}

impl PricingDynamics for CreditRisk {
    fn dimension(&self) -> usize {
        1
    }

    fn market(&self) -> &Market {
        &self.market
    }

    fn diffusion(&self, _x: &[f64]) -> DMatrix<f64> {
        DMatrix::zeros(1, 1)
    }

    fn diffusion_divergence(&self, _x: &[f64]) -> DVector<f64> {
        DVector::zeros(1)
    }

    fn drift(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_element(1, -self.intensity * x[0])
    }

    fn mean_variance(&self, _tau: f64, _x: &[f64]) -> f64 {
        0.0
    }

    fn name(&self) -> &'static str {
        "Credit risk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_intensity_coefficients() {
        let model = CreditRisk::new(Market::new(0.03, 0.0).unwrap(), 0.02).unwrap();
        let x = [0.5];
        assert_eq!(model.diffusion(&x)[(0, 0)], 0.0);
        assert_eq!(model.diffusion_divergence(&x)[0], 0.0);
        assert_relative_eq!(model.drift(&x)[0], -0.01, epsilon = 1e-15);
        assert_eq!(model.mean_variance(1.0, &x), 0.0);
        assert_eq!(model.discount_rate(&x), 0.03);
        assert_relative_eq!(model.survival_probability(1.0), (-0.02f64).exp(), epsilon = 1e-15);
    }

    #[test]
    fn test_invalid_intensity() {
        let market = Market::new(0.03, 0.0).unwrap();
        assert!(CreditRisk::new(market, -0.01).is_err());
        assert!(CreditRisk::new(market, f64::NAN).is_err());
        assert!(CreditRisk::new(market, 0.0).is_ok());
    }
}
