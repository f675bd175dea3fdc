pub mod forward;
pub mod backward;
pub mod batch;
pub mod layer;

pub use backward::{backward, backward_slice};
pub use forward::{forward, forward_slice};

/// Marks the end of an example's active feature list. Slots after it are never read.
pub const SENTINEL: i32 = -1;

/// Output width of the shipped configuration.
pub const OUTPUT_SIZE: usize = 520;
/// Feature slots per example in the shipped configuration.
pub const MAX_ACTIVE_FEATURES: usize = 64;

/// Shape parameters the caller agrees on with the weight layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceShape {
    pub output_size: usize,
    pub max_active_features: usize,
}

impl Default for SliceShape {
    fn default() -> Self {
        Self { output_size: OUTPUT_SIZE, max_active_features: MAX_ACTIVE_FEATURES }
    }
}

impl SliceShape {
    pub fn new(output_size: usize, max_active_features: usize) -> Self {
        Self { output_size, max_active_features }
    }

    /// Length of a weight (or weight gradient) buffer with `num_inputs` rows.
    #[inline]
    pub fn weight_len(&self, num_inputs: usize) -> usize { num_inputs * self.output_size }
}

/// Iterates the `(row, arity)` pairs of one example, stopping at the first sentinel.
///
/// The arity at the sentinel slot and anything after it is never touched, so callers
/// may leave unused slots uninitialized garbage.
#[inline]
pub fn active_features<'a>(indices: &'a [i32], values: &'a [f32]) -> impl Iterator<Item = (usize, f32)> + 'a {
    indices
        .iter()
        .take_while(|&&idx| idx != SENTINEL)
        .enumerate()
        .map(move |(k, &idx)| (idx as usize, values[k]))
}

/// Number of active slots before the sentinel (or the full length when there is none).
#[inline]
pub fn active_count(indices: &[i32]) -> usize {
    indices.iter().position(|&idx| idx == SENTINEL).unwrap_or(indices.len())
}
