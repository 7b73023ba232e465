// src/pricing/payoffs.rs
//! Option Payoff Functions
//!
//! # Mathematical Definitions
//!
//! European payoffs depend on the terminal spot only:
//! - **Call**: max(S_T - K, 0)
//! - **Put**: max(K - S_T, 0)
//! - **Custom**: any g(S_T), e.g. a forward `S_T - K` or a smoothed digital
//! - **Loss given default**: the constant `1 - R` for recovery rate R
//!
//! The payoff is the initial condition of the forward PDE in τ = T - t.

use crate::error::{validation::*, PdeResult};
use std::fmt;
use std::sync::Arc;

pub type TerminalFunction = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Enumeration of supported payoff types
#[derive(Clone)]
pub enum Payoff {
    /// European call option: max(S_T - K, 0)
    Call { strike: f64 },

    /// European put option: max(K - S_T, 0)
    Put { strike: f64 },

    /// Arbitrary terminal payoff g(S_T)
    Custom {
        terminal: TerminalFunction,
        label: String,
    },
}

impl Payoff {
    pub fn call(strike: f64) -> PdeResult<Self> {
        validate_positive("strike", strike)?;
        Ok(Payoff::Call { strike })
    }

    pub fn put(strike: f64) -> PdeResult<Self> {
        validate_positive("strike", strike)?;
        Ok(Payoff::Put { strike })
    }

    pub fn custom<F>(label: &str, terminal: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Payoff::Custom {
            terminal: Arc::new(terminal),
            label: label.to_string(),
        }
    }

    /// Constant loss `1 - recovery` of a defaultable zero-coupon bond.
    pub fn loss_given_default(recovery: f64) -> PdeResult<Self> {
        validate_range("recovery", recovery, 0.0, 1.0)?;
        Ok(Self::custom("loss given default", move |_| 1.0 - recovery))
    }

    /// Payoff at terminal spot `s`.
    pub fn evaluate(&self, s: f64) -> f64 {
        match self {
            Payoff::Call { strike } => (s - strike).max(0.0),
            Payoff::Put { strike } => (strike - s).max(0.0),
            Payoff::Custom { terminal, .. } => terminal(s),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Payoff::Call { .. })
    }

    pub fn strike(&self) -> Option<f64> {
        match self {
            Payoff::Call { strike } | Payoff::Put { strike } => Some(*strike),
            Payoff::Custom { .. } => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Payoff::Call { .. } => "call",
            Payoff::Put { .. } => "put",
            Payoff::Custom { label, .. } => label,
        }
    }
}

impl fmt::Debug for Payoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payoff::Call { strike } => write!(f, "Call {{ strike: {} }}", strike),
            Payoff::Put { strike } => write!(f, "Put {{ strike: {} }}", strike),
            Payoff::Custom { label, .. } => write!(f, "Custom {{ label: {:?} }}", label),
        }
    }
}
