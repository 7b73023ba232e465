// src/analytics/bs_analytic.rs
//! Analytical Black-Scholes formulas for European options
//!
//! # Mathematical Foundation
//!
//! Under the Black-Scholes model with continuous dividend yield q, the
//! underlying asset follows:
//! ```text
//! dS_t = (r - q) S_t dt + σ S_t dW_t
//! ```
//!
//! The risk-neutral pricing formula gives:
//! ```text
//! V(S,τ) = e^(-rτ) * E^Q[payoff(S_T) | S_t = S],   τ = T - t
//! ```
//!
//! These closed forms are the reference solutions the finite-element
//! solvers are validated against, and the source of boundary data for
//! the mean-variance Dirichlet condition.

use crate::math_utils::norm_cdf;

/// Black-Scholes European price written in terms of the variance rate
///
/// # Formula
/// ```text
/// F   = S e^((r-q)τ)
/// d₁  = [ln(F/K) + vτ/2] / √(vτ)
/// d₂  = d₁ - √(vτ)
/// C   = e^(-rτ) [F Φ(d₁) - K Φ(d₂)]
/// P   = e^(-rτ) [K Φ(-d₂) - F Φ(-d₁)]
/// ```
///
/// When the total variance `vτ` vanishes (expiry, or a zero-volatility
/// state) the price degenerates to the discounted forward intrinsic value.
pub fn bs_price_with_variance(
    is_call: bool,
    s: f64,
    k: f64,
    r: f64,
    q: f64,
    variance: f64,
    tau: f64,
) -> f64 {
    let discount = (-r * tau).exp();
    let forward = s * ((r - q) * tau).exp();
    let total_variance = variance.max(0.0) * tau.max(0.0);

    if total_variance <= 1e-14 || s <= 0.0 {
        let intrinsic = if is_call {
            (forward - k).max(0.0)
        } else {
            (k - forward).max(0.0)
        };
        return discount * intrinsic;
    }

    let std_dev = total_variance.sqrt();
    let d1 = ((forward / k).ln() + 0.5 * total_variance) / std_dev;
    let d2 = d1 - std_dev;

    if is_call {
        discount * (forward * norm_cdf(d1) - k * norm_cdf(d2))
    } else {
        discount * (k * norm_cdf(-d2) - forward * norm_cdf(-d1))
    }
}

/// Black-Scholes European call option price
///
/// # Formula
/// ```text
/// C(S,K,r,σ,T) = S*e^(-qT)*Φ(d₁) - K*e^(-rT)*Φ(d₂)
/// ```
///
/// # Parameters
/// - `s`: Current stock price
/// - `k`: Strike price
/// - `r`: Risk-free rate
/// - `q`: Dividend yield
/// - `sigma`: Volatility
/// - `t`: Time to expiration
pub fn bs_call_price(s: f64, k: f64, r: f64, q: f64, sigma: f64, t: f64) -> f64 {
    bs_price_with_variance(true, s, k, r, q, sigma * sigma, t)
}

/// Black-Scholes European put option price
///
/// # Formula
/// ```text
/// P(S,K,r,σ,T) = K*e^(-rT)*Φ(-d₂) - S*e^(-qT)*Φ(-d₁)
/// ```
pub fn bs_put_price(s: f64, k: f64, r: f64, q: f64, sigma: f64, t: f64) -> f64 {
    bs_price_with_variance(false, s, k, r, q, sigma * sigma, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_prices() {
        // r = 5%, σ = 20%, S = K = 100, T = 1
        assert_relative_eq!(bs_call_price(100.0, 100.0, 0.05, 0.0, 0.2, 1.0), 10.4506, epsilon = 1e-4);
        assert_relative_eq!(bs_put_price(100.0, 100.0, 0.05, 0.0, 0.2, 1.0), 5.5735, epsilon = 1e-4);
    }

    #[test]
    fn test_put_call_parity_with_dividends() {
        let (s, k, r, q, sigma, t) = (1.1, 1.0, 0.03, 0.02, 0.25, 0.75);
        let call = bs_call_price(s, k, r, q, sigma, t);
        let put = bs_put_price(s, k, r, q, sigma, t);
        let parity = s * (-q * t).exp() - k * (-r * t).exp();
        assert_relative_eq!(call - put, parity, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_variance_limit() {
        let price = bs_price_with_variance(true, 1.2, 1.0, 0.03, 0.0, 0.0, 1.0);
        let expected = (1.2 - (-0.03f64).exp()).max(0.0);
        assert_relative_eq!(price, expected, epsilon = 1e-12);
        assert_eq!(bs_price_with_variance(false, 1.2, 1.0, 0.03, 0.0, 0.04, 0.0), 0.0);
    }
}
