//! Error types for quantization.

/// Errors raised while computing borders, quantizing columns, or assembling
/// the quantized dataset.
///
/// Data-validation errors carry the offending flat feature index. Internal
/// errors indicate a broken contract between pipeline stages and are never
/// worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum QuantizationError {
    /// NaNs present while borders are computed with `NanMode::Forbidden`.
    #[error(
        "Feature #{feature}: there are nan factors and nan values for float features \
         are not allowed. Set nan_mode != Forbidden."
    )]
    NanForbidden { feature: usize },

    /// NaN met at quantization time for a feature without learn-time NaNs.
    #[error(
        "There are NaNs in test dataset (feature number {feature}) but there were no NaNs \
         in learn dataset"
    )]
    NanInTestOnly { feature: usize },

    /// Malformed per-feature binarization override.
    #[error("Feature #{feature}: invalid binarization settings: {reason}")]
    InvalidBinarization { feature: usize, reason: String },

    /// Rejected option combination.
    #[error("invalid quantization options: {0}")]
    InvalidOptions(String),

    #[error("All features are either constant or ignored.")]
    AllFeaturesIgnored,

    #[error("Pool is empty")]
    EmptyDataset,

    /// A task needs more of a resource than the whole quota (strict mode only).
    #[error(
        "Resource {resource}: task cannot be executed because it requires more resources \
         ({required}) than available ({available})"
    )]
    Scheduler {
        resource: String,
        required: u64,
        available: u64,
    },

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Contract violation between pipeline stages.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuantizationError {
    /// Whether this error reports a broken internal invariant rather than
    /// bad input data or options.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QuantizationError>;
