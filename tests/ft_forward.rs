use ftslice::transformer::{forward, forward_slice, SENTINEL};
use pretty_assertions::assert_eq;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn random_matrix(rng: &mut SmallRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn dense_reference(indices: &[i32], values: &[f32], weight: &[f32], bias: &[f32], num_inputs: usize) -> Vec<f32> {
    // Materialize the dense input row, then multiply
    let n = bias.len();
    let mut x = vec![0f32; num_inputs];
    for k in 0..indices.len() {
        if indices[k] == SENTINEL { break; }
        x[indices[k] as usize] += values[k];
    }
    let mut out = bias.to_vec();
    for i in 0..num_inputs {
        for j in 0..n { out[j] += x[i] * weight[i * n + j]; }
    }
    out
}

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len());
    for (j, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= tol, "column {}: {} vs {}", j, x, y);
    }
}

#[test]
fn concrete_four_column_example() {
    let mut weight = vec![0f32; 8 * 4];
    weight[7 * 4..8 * 4].copy_from_slice(&[2.0, 0.0, 1.0, 3.0]);
    let bias = [1.0f32; 4];
    let mut out = [0f32; 4];
    forward(&[7, SENTINEL], &[0.5, 0.0], &weight, &bias, &mut out);
    assert_eq!(out, [2.0, 1.0, 1.5, 2.5]);
}

#[test]
fn sentinel_first_yields_bias() {
    let mut rng = SmallRng::seed_from_u64(1);
    let weight = random_matrix(&mut rng, 16 * 6);
    let bias = random_matrix(&mut rng, 6);
    let mut out = [f32::NAN; 6];
    forward(&[SENTINEL, 3, 4, 5], &[1.0, 1.0, 1.0, 1.0], &weight, &bias, &mut out);
    assert_eq!(out.to_vec(), bias);
}

#[test]
fn single_feature_is_linear() {
    let mut rng = SmallRng::seed_from_u64(2);
    let n = 10;
    let weight = random_matrix(&mut rng, 32 * n);
    let bias = random_matrix(&mut rng, n);
    let mut out = vec![0f32; n];
    forward(&[13, SENTINEL, SENTINEL], &[0.75, 0.0, 0.0], &weight, &bias, &mut out);
    let expected: Vec<f32> = (0..n).map(|j| bias[j] + 0.75 * weight[13 * n + j]).collect();
    assert_close(&out, &expected, 1e-6);
}

#[test]
fn disjoint_features_superpose() {
    let mut rng = SmallRng::seed_from_u64(3);
    let n = 12;
    let weight = random_matrix(&mut rng, 20 * n);
    let bias = random_matrix(&mut rng, n);
    let (mut a, mut b, mut ab) = (vec![0f32; n], vec![0f32; n], vec![0f32; n]);
    forward(&[4, SENTINEL], &[1.5, 0.0], &weight, &bias, &mut a);
    forward(&[11, SENTINEL], &[-0.5, 0.0], &weight, &bias, &mut b);
    forward(&[4, 11, SENTINEL], &[1.5, -0.5, 0.0], &weight, &bias, &mut ab);
    let combined: Vec<f32> = (0..n).map(|j| a[j] + b[j] - bias[j]).collect();
    assert_close(&ab, &combined, 1e-5);
}

#[test]
fn garbage_after_sentinel_is_ignored() {
    let mut rng = SmallRng::seed_from_u64(4);
    let n = 8;
    let weight = random_matrix(&mut rng, 10 * n);
    let bias = random_matrix(&mut rng, n);
    let mut clean = vec![0f32; n];
    let mut dirty = vec![0f32; n];
    forward(&[2, 5, SENTINEL, SENTINEL], &[1.0, 2.0, 0.0, 0.0], &weight, &bias, &mut clean);
    // index far outside the weight and NaN arities after the sentinel
    forward(&[2, 5, SENTINEL, 1_000_000], &[1.0, 2.0, f32::NAN, f32::NAN], &weight, &bias, &mut dirty);
    assert_eq!(clean, dirty);
}

#[test]
fn duplicate_indices_accumulate_twice() {
    let n = 3;
    let weight = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let bias = [0.0f32; 3];
    let mut out = [0f32; 3];
    forward(&[1, 1, SENTINEL], &[1.0, 1.0, 0.0], &weight, &bias, &mut out);
    assert_eq!(out, [8.0, 10.0, 12.0]);
    assert_eq!(out.len(), n);
}

#[test]
fn output_is_overwritten_not_accumulated() {
    let weight = vec![1.0f32; 4 * 2];
    let bias = [0.5f32, -0.5];
    let mut out = [100.0f32, 100.0];
    forward(&[0, SENTINEL], &[1.0, 0.0], &weight, &bias, &mut out);
    assert_eq!(out, [1.5, 0.5]);
}

#[test]
fn column_slices_compose_full_row() {
    let mut rng = SmallRng::seed_from_u64(5);
    let n = 24;
    let weight = random_matrix(&mut rng, 50 * n);
    let bias = random_matrix(&mut rng, n);
    let idx = [3, 17, 42, 8, SENTINEL, 0];
    let val = [0.3, 1.0, 2.5, -1.0, 0.0, 0.0];
    let mut full = vec![0f32; n];
    forward(&idx, &val, &weight, &bias, &mut full);
    let mut pieced = vec![f32::NAN; n];
    for (s, chunk) in pieced.chunks_mut(8).enumerate() {
        forward_slice(&idx, &val, &weight, &bias, s * 8, chunk);
    }
    assert_eq!(full, pieced);
}

#[test]
fn slice_touches_only_its_columns() {
    let weight = vec![1.0f32; 2 * 6];
    let bias = [0.0f32; 6];
    let mut row = [-7.0f32; 6];
    forward_slice(&[1, SENTINEL], &[2.0, 0.0], &weight, &bias, 2, &mut row[2..4]);
    assert_eq!(row, [-7.0, -7.0, 2.0, 2.0, -7.0, -7.0]);
}

#[test]
fn matches_dense_reference_at_shipped_shape() {
    use ftslice::transformer::{MAX_ACTIVE_FEATURES, OUTPUT_SIZE};
    let mut rng = SmallRng::seed_from_u64(6);
    let num_inputs = 96;
    let weight = random_matrix(&mut rng, num_inputs * OUTPUT_SIZE);
    let bias = random_matrix(&mut rng, OUTPUT_SIZE);
    let mut idx = [SENTINEL; MAX_ACTIVE_FEATURES];
    let mut val = [0f32; MAX_ACTIVE_FEATURES];
    for k in 0..48 {
        idx[k] = rng.gen_range(0..num_inputs) as i32;
        val[k] = rng.gen::<f32>();
    }
    let mut out = vec![0f32; OUTPUT_SIZE];
    forward(&idx, &val, &weight, &bias, &mut out);
    let expected = dense_reference(&idx, &val, &weight, &bias, num_inputs);
    assert_close(&out, &expected, 1e-4);
}
