use thiserror::Error;

/// Custom error types for the sparsebayes library.
#[derive(Error, Debug)]
pub enum RvmError {
    /// Error thrown when an unknown training algorithm name is requested.
    /// Valid names: "Figueiredo", "Sequential", "SequentialInMemory".
    #[error("Invalid algorithm: {0}")]
    InvalidAlgorithm(String),

    /// Error thrown at training time when the targets are not a binary
    /// -1/+1 labeling. Raised before any computation is performed.
    #[error("Non-binary input: targets must be labeled -1/+1")]
    NonBinaryInput,

    /// Error thrown when input dimensions (shapes) do not match expectation.
    #[error("Dimension mismatch: {0}")]
    ShapeMismatch(String),

    /// Error thrown when a Cholesky factorization keeps failing after the
    /// diagonal jitter ceiling is reached. Fatal: the posterior cannot be
    /// represented.
    #[error("Numerical breakdown: {0}")]
    NumericalBreakdown(String),

    /// Wrapper for errors coming from the ndarray-linalg backend.
    #[error("Linear Algebra backend error: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),
}
