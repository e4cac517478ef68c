//! Error taxonomy shared by all solver engines.
//!
//! Every precondition violation is detected synchronously and reported
//! through one of these variants without mutating engine state. Device
//! failures abort the in-flight operation; the owning engine must be
//! reset via `deallocate` + `initialize` before further use.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    /// Invalid problem or engine configuration (dimension limits,
    /// device reassignment, rule selection without a problem).
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation invoked out of the required lifecycle order.
    #[error("sequencing error: {0}")]
    Sequencing(String),

    /// Malformed exhaustive-search range (begin past end).
    #[error("range error: {0}")]
    Range(String),

    /// Failure in the underlying execution device (allocation,
    /// stream teardown, kernel panic).
    #[error("device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, SolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SolverError::Config("N0 must be 63 or smaller, N0=70".to_string());
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("N0=70"));
    }
}
