//! # kinfit-core
//!
//! This is an internal crate used by `kinfit`. It holds the dense linear algebra and
//! four-momentum types the refitter is built on.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// Dense linear algebra: matrix access traits and the pivoted QR solver.
pub mod linalg;
/// Utility enums and four-vectors.
pub mod utils;

pub use crate::linalg::{
    qr::QRDecomposition, DenseMatrix, MatrixLike, MatrixLikeMut, VectorLike,
};
pub use crate::utils::enums::{Daughter, Slot};
pub use crate::utils::vectors::Vec4;

pub type KinfitResult<T> = Result<T, KinfitError>;

/// The error type used by all `kinfit` internal methods
#[derive(Error, Debug)]
pub enum KinfitError {
    /// A matrix or vector did not have the dimension a decomposition was built for.
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// The dimension the operation requires
        expected: String,
        /// The dimension which was supplied
        found: String,
    },
    /// A matrix handed to a decomposition had a NaN or infinite entry.
    #[error("Non-finite matrix entry at ({row}, {col})")]
    NonFiniteEntry {
        /// Row of the first offending entry
        row: usize,
        /// Column of the first offending entry
        col: usize,
    },
    /// An attempt to decompose a zero-sized system.
    #[error("Cannot decompose an empty (0x0) system!")]
    EmptySystem,
    /// A mass constraint was configured with an inconsistent mass/uncertainty pair.
    #[error("Invalid constraint on {particle}: {reason}")]
    InvalidConstraint {
        /// Name of the particle slot the constraint belongs to
        particle: String,
        /// What is wrong with it
        reason: String,
    },
    /// A four-momentum handed to the fitter had a NaN or infinite component.
    #[error("Non-finite four-momentum component for {particle}")]
    NonFiniteInput {
        /// Name of the particle slot with the bad input
        particle: String,
    },
    /// The linearised fit system had numerically singular directions.
    #[error("Singular fit system at iteration {iteration} ({n_sing} singular directions)")]
    SingularSystem {
        /// Iteration (starting at 1) at which the decomposition failed
        iteration: usize,
        /// Number of singular directions reported by the decomposition
        n_sing: usize,
    },
    /// The fit did not converge within the iteration limit.
    #[error("Fit did not converge within {iterations} iterations")]
    NotConverged {
        /// The iteration limit which was exhausted
        iterations: usize,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

impl Clone for KinfitError {
    // Error types are rarely cloneable, but batch fits hand one result per candidate back to the
    // caller, so we fall back to the display string.
    fn clone(&self) -> Self {
        match self {
            Self::DimensionMismatch { expected, found } => Self::DimensionMismatch {
                expected: expected.clone(),
                found: found.clone(),
            },
            Self::NonFiniteEntry { row, col } => Self::NonFiniteEntry {
                row: *row,
                col: *col,
            },
            Self::EmptySystem => Self::EmptySystem,
            Self::InvalidConstraint { particle, reason } => Self::InvalidConstraint {
                particle: particle.clone(),
                reason: reason.clone(),
            },
            Self::NonFiniteInput { particle } => Self::NonFiniteInput {
                particle: particle.clone(),
            },
            Self::SingularSystem { iteration, n_sing } => Self::SingularSystem {
                iteration: *iteration,
                n_sing: *n_sing,
            },
            Self::NotConverged { iterations } => Self::NotConverged {
                iterations: *iterations,
            },
            _ => Self::Custom(self.to_string()),
        }
    }
}

impl KinfitError {
    /// Returns `true` for failures which depend on the data being fit (singular systems and
    /// non-convergence) as opposed to misuse of the API.
    pub fn is_data_dependent(&self) -> bool {
        matches!(
            self,
            Self::SingularSystem { .. } | Self::NotConverged { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KinfitError::DimensionMismatch {
            expected: "12x12".to_string(),
            found: "12x11".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: expected 12x12, found 12x11"
        );
        let err = KinfitError::NotConverged { iterations: 1024 };
        assert_eq!(
            err.to_string(),
            "Fit did not converge within 1024 iterations"
        );
    }

    #[test]
    fn test_error_clone_keeps_variant() {
        let err = KinfitError::SingularSystem {
            iteration: 3,
            n_sing: 2,
        };
        assert!(matches!(
            err.clone(),
            KinfitError::SingularSystem {
                iteration: 3,
                n_sing: 2
            }
        ));
        let err = KinfitError::ParseError {
            name: "three".to_string(),
            object: "Daughter".to_string(),
        };
        assert!(matches!(err.clone(), KinfitError::Custom(_)));
        assert_eq!(err.clone().to_string(), err.to_string());
    }

    #[test]
    fn test_data_dependent_errors() {
        assert!(KinfitError::NotConverged { iterations: 1 }.is_data_dependent());
        assert!(!KinfitError::EmptySystem.is_data_dependent());
    }
}
