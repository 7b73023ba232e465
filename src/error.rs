// src/error.rs
use thiserror::Error;

/// Error types for the fast-fem library
#[derive(Error, Debug, Clone)]
pub enum PdeError {
    /// Domain dimension or extents violate their invariants
    #[error("Invalid domain: {reason}")]
    InvalidDomain { reason: String },

    /// Invalid parameter values
    #[error("Invalid parameter '{parameter}' = {value}: {constraint}")]
    InvalidParameters {
        parameter: String,
        value: f64,
        constraint: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Inconsistent mesh connectivity or geometry
    #[error("Mesh construction failed{}: {reason}", fmt_element(.element))]
    MeshConstruction {
        element: Option<usize>,
        reason: String,
    },

    /// Element-level assembly failure
    #[error("Assembly failed on element {element}: {reason}")]
    Assembly { element: usize, reason: String },

    /// Write to a sparse matrix entry that its pattern does not store
    #[error("Entry ({row}, {col}) is outside the sparsity pattern")]
    SparsityPattern { row: usize, col: usize },

    /// Linear solve outside of time stepping (projections, estimates)
    #[error("Linear solve failed ({method}): {reason}")]
    LinearSolve { method: String, reason: String },

    /// Time integration halted at a specific step
    #[error("Time integration failed at step {step} (tau = {time:.6}): {reason}")]
    TimeIntegration {
        step: usize,
        time: f64,
        reason: String,
    },

    /// Adaptive refinement exhausted its budget before reaching the tolerance
    #[error(
        "Adaptive refinement did not converge after {iterations} iterations: \
         estimate {estimate:.6e} > tolerance {tolerance:.6e} ({reason})"
    )]
    RefinementDidNotConverge {
        iterations: usize,
        estimate: f64,
        tolerance: f64,
        reason: String,
    },
}

fn fmt_element(element: &Option<usize>) -> String {
    match element {
        Some(e) => format!(" at element {}", e),
        None => String::new(),
    }
}

/// Result type alias for fast-fem operations
pub type PdeResult<T> = Result<T, PdeError>;

/// Validation utilities
pub mod validation {
    use super::{PdeError, PdeResult};

    /// Validate that a parameter is positive
    pub fn validate_positive(name: &str, value: f64) -> PdeResult<()> {
        if value > 0.0 && value.is_finite() {
            Ok(())
        } else {
            Err(PdeError::InvalidParameters {
                parameter: name.to_string(),
                value,
                constraint: "must be positive (> 0) and finite".to_string(),
            })
        }
    }

    /// Validate that a parameter is non-negative
    pub fn validate_non_negative(name: &str, value: f64) -> PdeResult<()> {
        if value >= 0.0 && value.is_finite() {
            Ok(())
        } else {
            Err(PdeError::InvalidParameters {
                parameter: name.to_string(),
                value,
                constraint: "must be non-negative (≥ 0) and finite".to_string(),
            })
        }
    }

    /// Validate that a parameter is within a closed range
    pub fn validate_range(name: &str, value: f64, min: f64, max: f64) -> PdeResult<()> {
        if value < min || value > max || value.is_nan() {
            Err(PdeError::InvalidParameters {
                parameter: name.to_string(),
                value,
                constraint: format!("must be in range [{}, {}]", min, max),
            })
        } else {
            Ok(())
        }
    }

    /// Validate correlation parameter
    pub fn validate_correlation(name: &str, rho: f64) -> PdeResult<()> {
        validate_range(name, rho, -1.0, 1.0)
    }

    /// Validate the implicitness parameter of a theta scheme
    pub fn validate_theta(theta: f64) -> PdeResult<()> {
        validate_range("theta", theta, 0.0, 1.0)
    }

    /// Validate that a value is finite and not NaN
    pub fn validate_finite(name: &str, value: f64) -> PdeResult<()> {
        if !value.is_finite() {
            Err(PdeError::InvalidParameters {
                parameter: name.to_string(),
                value,
                constraint: "must be finite (not NaN or infinite)".to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Validate a strictly positive count
    pub fn validate_count(field: &str, count: usize) -> PdeResult<()> {
        if count == 0 {
            Err(PdeError::InvalidConfiguration {
                field: field.to_string(),
                reason: "must be greater than 0".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::validation::*;
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive("sigma", 0.2).is_ok());
        assert!(validate_positive("sigma", 0.0).is_err());
        assert!(validate_positive("sigma", -0.1).is_err());
        assert!(validate_positive("sigma", f64::INFINITY).is_err());
    }

    #[test]
    fn test_validate_theta() {
        assert!(validate_theta(0.0).is_ok());
        assert!(validate_theta(0.5).is_ok());
        assert!(validate_theta(1.0).is_ok());
        assert!(validate_theta(1.01).is_err());
        assert!(validate_theta(-0.01).is_err());
        assert!(validate_theta(f64::NAN).is_err());
    }

    #[test]
    fn test_validate_finite() {
        assert!(validate_finite("value", 1.0).is_ok());
        assert!(validate_finite("value", f64::NAN).is_err());
        assert!(validate_finite("value", f64::INFINITY).is_err());
        assert!(validate_finite("value", f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn test_error_display_carries_context() {
        let error = PdeError::TimeIntegration {
            step: 17,
            time: 0.25,
            reason: "non-finite solution".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("step 17"));
        assert!(display.contains("non-finite"));

        let error = PdeError::MeshConstruction {
            element: Some(3),
            reason: "duplicate element".to_string(),
        };
        assert!(format!("{}", error).contains("element 3"));

        let error = PdeError::MeshConstruction {
            element: None,
            reason: "hanging node".to_string(),
        };
        assert_eq!(format!("{}", error), "Mesh construction failed: hanging node");
    }
}
