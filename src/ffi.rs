//! C ABI for trainers that call the kernels through a foreign-function boundary.
//!
//! Shapes are fixed to [`OUTPUT_SIZE`] columns and [`MAX_ACTIVE_FEATURES`] slots per
//! example, and must match how the caller allocated its weight and gradient buffers.

use crate::transformer::{active_features, backward, forward, MAX_ACTIVE_FEATURES, OUTPUT_SIZE};
use std::slice;

/// Rows of the weight matrix reachable from one example's active features.
fn reachable_rows(indices: &[i32], values: &[f32]) -> usize {
    active_features(indices, values).map(|(row, _)| row + 1).max().unwrap_or(0)
}

/// # Safety
/// `feature_indices` and `feature_values` must point to `MAX_ACTIVE_FEATURES` elements,
/// `bias` and `output` to `OUTPUT_SIZE`, and `weight` must hold every row named before
/// the first `-1`.
#[no_mangle]
pub unsafe extern "C" fn feature_transformer_slice_forward(
    feature_indices: *const i32,
    feature_values: *const f32,
    weight: *const f32,
    bias: *const f32,
    output: *mut f32,
) {
    let indices = slice::from_raw_parts(feature_indices, MAX_ACTIVE_FEATURES);
    let values = slice::from_raw_parts(feature_values, MAX_ACTIVE_FEATURES);
    let rows = reachable_rows(indices, values);
    let weight = slice::from_raw_parts(weight, rows * OUTPUT_SIZE);
    let bias = slice::from_raw_parts(bias, OUTPUT_SIZE);
    let output = slice::from_raw_parts_mut(output, OUTPUT_SIZE);
    forward(indices, values, weight, bias, output);
}

/// # Safety
/// Same layout contract as [`feature_transformer_slice_forward`]; `weight_grad` and
/// `bias_grad` are accumulated into and must not be aliased by another thread.
#[no_mangle]
pub unsafe extern "C" fn feature_transformer_slice_backward(
    feature_indices: *const i32,
    feature_values: *const f32,
    weight_grad: *mut f32,
    bias_grad: *mut f32,
    output_grad: *const f32,
) {
    let indices = slice::from_raw_parts(feature_indices, MAX_ACTIVE_FEATURES);
    let values = slice::from_raw_parts(feature_values, MAX_ACTIVE_FEATURES);
    let rows = reachable_rows(indices, values);
    let weight_grad = slice::from_raw_parts_mut(weight_grad, rows * OUTPUT_SIZE);
    let bias_grad = slice::from_raw_parts_mut(bias_grad, OUTPUT_SIZE);
    let output_grad = slice::from_raw_parts(output_grad, OUTPUT_SIZE);
    backward(indices, values, weight_grad, bias_grad, output_grad);
}
