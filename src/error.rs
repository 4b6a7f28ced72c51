//! Error types for the sparse matrix core

use thiserror::Error;

/// Main error type for matrix operations
#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Zero pivot at diagonal {index} - matrix is not SPD or was not constraint-reduced")]
    Singular { index: usize },

    #[error("Convergence failed after {iterations} iterations (relative residual {residual:.3e})")]
    ConvergenceFailed { iterations: usize, residual: f64 },

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Matrix not factorized - run ldlt() first")]
    NotFactorized,

    #[error("Matrix already factorized")]
    AlreadyFactorized,

    #[error("Row links missing - run diag_up() after factorization")]
    RowLinksMissing,

    #[error("Row links already built - diag_up() may only run once")]
    RowLinksPresent,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for matrix operations
pub type MatrixResult<T> = Result<T, MatrixError>;

/// Check that a vector argument matches the matrix dimension
#[inline]
pub(crate) fn ensure_len(expected: usize, found: usize) -> MatrixResult<()> {
    if expected != found {
        return Err(MatrixError::DimensionMismatch { expected, found });
    }
    Ok(())
}
