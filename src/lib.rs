//! # fast-fem: Finite Elements for Option Pricing PDEs
//!
//! A Rust library that prices European-style contracts by solving the
//! forward pricing PDE in time-to-maturity τ = T - t with Lagrange finite
//! elements in space and a θ-scheme in time, on meshes that adapt to the
//! solution.
//!
//! ## Key Features
//!
//! - **Simplicial Meshes**: 1D/2D/3D Kuhn-split grids, conforming bisection and coarsening
//! - **Weak-Form Assembly**: P1/P2 elements, parallel element loops with Rayon
//! - **Time Integration**: explicit, Crank-Nicolson and implicit θ-schemes with Rannacher startup
//! - **Boundary Conditions**: Dirichlet (elimination or penalty) and Neumann data
//! - **Adaptivity**: residual and gradient-recovery indicators driving an explicit refinement loop
//! - **Models**: Black-Scholes, local volatility, Heston, Heston with stochastic rates, constant-intensity credit risk
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fast_fem::pricing::PricingProblem;
//!
//! // Black-Scholes call, r = 3%, σ = 20%, K = 1, T = 1 on S ∈ [0, 4]
//! let problem = PricingProblem::default_call().expect("Valid problem");
//!
//! // 2^7 elements, 100 Crank-Nicolson steps
//! let solution = problem.solve(7).expect("Solve succeeds");
//! let price = problem.price_at(&solution, 1.0, &[]).expect("Spot inside mesh");
//! println!("Option price: {:.6}", price);
//! ```
//!
//! ## Mathematical Foundation
//!
//! With generator `L u = ½ ∇·(A∇u) + (b - ½∇·A)·∇u - r u` the Galerkin
//! method gives the semi-discrete system `M u' + K u = f`, which the
//! θ-scheme marches from the payoff at τ = 0 to the price at τ = T.

// Module declarations
pub mod error;
pub mod rng;
pub mod math_utils;
pub mod mesh;
pub mod fem;
pub mod linalg;
pub mod models;
pub mod solvers;
pub mod adaptive;
pub mod pricing;
pub mod analytics;

// Re-export commonly used types for convenience
pub use error::{PdeError, PdeResult};
