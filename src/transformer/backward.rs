use super::active_features;

/// Accumulates one example's gradients into `weight_grad` and `bias_grad`.
///
/// Both buffers are accumulators: they must be zeroed by the caller before the first
/// call of a training step and are only ever added to here. Columns whose output
/// gradient is exactly zero are skipped.
#[inline]
pub fn backward(
    feature_indices: &[i32],
    feature_values: &[f32],
    weight_grad: &mut [f32],
    bias_grad: &mut [f32],
    output_grad: &[f32],
) {
    let output_size = bias_grad.len();
    backward_slice(feature_indices, feature_values, weight_grad, bias_grad, output_grad, 0, output_size);
}

/// Column-range form of [`backward`]: touches only columns `offset..offset + len`.
///
/// `output_grad` is the full row; the output size is `bias_grad.len()`.
pub fn backward_slice(
    feature_indices: &[i32],
    feature_values: &[f32],
    weight_grad: &mut [f32],
    bias_grad: &mut [f32],
    output_grad: &[f32],
    offset: usize,
    len: usize,
) {
    let output_size = bias_grad.len();
    let end = offset + len;
    debug_assert!(end <= output_size, "slice {}..{} exceeds output size {}", offset, end, output_size);

    let grad = &output_grad[offset..end];
    for (b, &g) in bias_grad[offset..end].iter_mut().zip(grad) {
        if g != 0.0 {
            *b += g;
        }
    }

    for (row, arity) in active_features(feature_indices, feature_values) {
        let base = row * output_size;
        let wg = &mut weight_grad[base + offset..base + end];
        for (w, &g) in wg.iter_mut().zip(grad) {
            if g != 0.0 {
                *w += g * arity;
            }
        }
    }
}
