//! Error types for index-level invariants.

/// Violations of the invariants held by the in-memory indexes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    /// A vector's length differs from the index dimension.
    #[error("dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A vector was produced by a different provider than the index's.
    #[error("provider mismatch: index built with '{expected}', got '{actual}'")]
    ProviderMismatch { expected: String, actual: String },

    /// Fusion weights are negative or do not sum to 1.0.
    #[error("invalid weights: vector={vector}, keyword={keyword} (must be >= 0 and sum to 1.0)")]
    InvalidWeights { vector: f64, keyword: f64 },
}
