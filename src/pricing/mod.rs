pub mod engine;
pub mod payoffs;

pub use engine::{price_boundaries, PricingProblem};
pub use payoffs::Payoff;
