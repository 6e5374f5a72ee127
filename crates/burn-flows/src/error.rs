//! Error type for flow construction, evaluation and persistence

use burn::record::RecorderError;

/// Errors raised by flow construction and evaluation
///
/// Configuration and shape errors are raised before any computation runs.
/// Numerical problems (NaN/Inf) are never turned into errors; they propagate
/// into the returned tensors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// No recipe with this name exists
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The configuration cannot produce a valid flow
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A tensor does not have the shape a layer expects
    #[error("Shape mismatch in {layer}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        layer: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Error from the Burn recorder
    #[error("Record error: {0}")]
    Record(#[from] RecorderError),
}

impl FlowError {
    pub(crate) fn shape(layer: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        FlowError::ShapeMismatch {
            layer: layer.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

/// Result alias for flow operations
pub type FlowResult<T> = Result<T, FlowError>;
