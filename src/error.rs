use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransformerError>;

/// Failures reported by the checked layer API. The raw kernels never return these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformerError {
    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch { what: &'static str, expected: usize, actual: usize },

    #[error("feature index {index} at example {example} slot {slot} is outside 0..{num_inputs}")]
    IndexOutOfRange { example: usize, slot: usize, index: i32, num_inputs: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
