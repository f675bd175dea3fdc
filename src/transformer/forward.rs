use super::active_features;

/// Computes one example's output row: `bias + Σ arity * weight[row]`.
///
/// `output_size` is `bias.len()`; `output` must have the same length and is fully
/// overwritten. `weight` is row-major with `output_size` columns. Feature rows outside
/// the weight buffer panic on the slice index; no other validation happens here.
#[inline]
pub fn forward(
    feature_indices: &[i32],
    feature_values: &[f32],
    weight: &[f32],
    bias: &[f32],
    output: &mut [f32],
) {
    forward_slice(feature_indices, feature_values, weight, bias, 0, output);
}

/// Column-range form of [`forward`]: writes columns `offset..offset + output.len()`.
///
/// Each slice of one row is independent of the others, so a caller may hand
/// disjoint slices of the same row to different workers.
pub fn forward_slice(
    feature_indices: &[i32],
    feature_values: &[f32],
    weight: &[f32],
    bias: &[f32],
    offset: usize,
    output: &mut [f32],
) {
    let output_size = bias.len();
    let end = offset + output.len();
    debug_assert!(end <= output_size, "slice {}..{} exceeds output size {}", offset, end, output_size);

    output.copy_from_slice(&bias[offset..end]);
    for (row, arity) in active_features(feature_indices, feature_values) {
        let base = row * output_size;
        let w = &weight[base + offset..base + end];
        for (o, &wv) in output.iter_mut().zip(w) {
            *o += wv * arity;
        }
    }
}
