// Sparse feature transformer: per-example forward/backward kernels plus the batch layer around them
pub mod config;
pub mod error;
pub mod ffi;
pub mod transformer;

// Re-exports kept minimal: the two kernels and the types a trainer touches
pub use config::TransformerConfig;
pub use error::{Result, TransformerError};
pub use transformer::{backward, forward, SliceShape, SENTINEL};
