pub mod csr;
pub mod solver;

pub use csr::{CsrMatrix, CsrPattern};
pub use solver::{LinearSolver, SolverConfig, SolverMethod};
