//! Error types for linear-system operations.

use crate::layout::LayoutKind;
use thiserror::Error;

/// Result type alias using the crate Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing, constraining or solving the global system.
#[derive(Error, Debug)]
pub enum Error {
    /// Factorization reported a nonzero status (1-based index of the failing pivot).
    #[error("singular operator: {layout} factorization failed with status {status}")]
    SingularOperator { layout: LayoutKind, status: usize },

    /// Two stores with different layouts, shapes or bandwidths were combined.
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),

    /// Access outside the matrix shape or the declared band envelope.
    #[error("index ({row}, {col}) is outside the {layout} storage envelope")]
    IndexOutOfBand {
        layout: LayoutKind,
        row: usize,
        col: usize,
    },

    /// Vector or matrix lengths that do not match the operator.
    #[error("dimension mismatch: {0}")]
    Dimension(String),

    /// Operation not provided by the selected layout.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Unknown node or malformed DOF numbering.
    #[error("dof table error: {0}")]
    DofTable(String),

    /// Invalid adjacency graph or permutation.
    #[error("reorder error: {0}")]
    Reorder(String),
}
