use super::{active_features, backward, forward_slice, SliceShape, SENTINEL};
use crate::config::TransformerConfig;
use crate::error::{Result, TransformerError};
use log::debug;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Sentinel-terminated feature lists for a whole batch, `batch_size x max_active_features`.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseBatch {
    pub batch_size: usize,
    pub max_active_features: usize,
    pub indices: Vec<i32>,
    pub values: Vec<f32>,
}

impl SparseBatch {
    pub fn new(max_active_features: usize, indices: Vec<i32>, values: Vec<f32>) -> Result<Self> {
        if max_active_features == 0 {
            return Err(TransformerError::InvalidConfig("max_active_features must be > 0".into()));
        }
        if indices.len() != values.len() {
            return Err(TransformerError::ShapeMismatch { what: "feature values", expected: indices.len(), actual: values.len() });
        }
        if indices.len() % max_active_features != 0 {
            let rounded = indices.len().div_ceil(max_active_features) * max_active_features;
            return Err(TransformerError::ShapeMismatch { what: "feature indices", expected: rounded, actual: indices.len() });
        }
        let batch_size = indices.len() / max_active_features;
        Ok(Self { batch_size, max_active_features, indices, values })
    }

    /// Packs per-example `(row, arity)` lists, padding each with a sentinel tail.
    pub fn from_examples(max_active_features: usize, examples: &[Vec<(i32, f32)>]) -> Result<Self> {
        let mut indices = Vec::with_capacity(examples.len() * max_active_features);
        let mut values = Vec::with_capacity(examples.len() * max_active_features);
        for ex in examples {
            if ex.len() > max_active_features {
                return Err(TransformerError::ShapeMismatch { what: "active features per example", expected: max_active_features, actual: ex.len() });
            }
            for &(i, v) in ex {
                indices.push(i);
                values.push(v);
            }
            for _ in ex.len()..max_active_features {
                indices.push(SENTINEL);
                values.push(0.0);
            }
        }
        Self::new(max_active_features, indices, values)
    }

    /// Random batch in the layout the trainer produces: `active` sorted rows, then a sentinel tail.
    pub fn random<R: Rng>(rng: &mut R, batch_size: usize, max_active_features: usize, num_inputs: usize, active: usize) -> Self {
        let active = active.min(max_active_features);
        let mut indices = Vec::with_capacity(batch_size * max_active_features);
        let mut values = Vec::with_capacity(batch_size * max_active_features);
        let mut row = Vec::with_capacity(active);
        for _ in 0..batch_size {
            row.clear();
            row.extend((0..active).map(|_| rng.gen_range(0..num_inputs) as i32));
            row.sort_unstable();
            indices.extend_from_slice(&row);
            indices.extend(std::iter::repeat(SENTINEL).take(max_active_features - active));
            values.extend((0..max_active_features).map(|_| rng.gen::<f32>()));
        }
        Self { batch_size, max_active_features, indices, values }
    }

    #[inline]
    pub fn example(&self, b: usize) -> (&[i32], &[f32]) {
        let s = b * self.max_active_features;
        let e = s + self.max_active_features;
        (&self.indices[s..e], &self.values[s..e])
    }

    /// Checks every active index of every example against `0..num_inputs`.
    pub fn validate_indices(&self, num_inputs: usize) -> Result<()> {
        for b in 0..self.batch_size {
            let (idx, _) = self.example(b);
            for (slot, &index) in idx.iter().take_while(|&&i| i != SENTINEL).enumerate() {
                if index < 0 || index as usize >= num_inputs {
                    return Err(TransformerError::IndexOutOfRange { example: b, slot, index, num_inputs });
                }
            }
        }
        Ok(())
    }
}

/// How concurrent backward calls combine their contributions into shared gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceStrategy {
    /// One thread walks the batch in order. Bit-reproducible.
    Sequential,
    /// Examples run in parallel; every touched element is updated with a CAS add.
    Atomic,
    /// Each partition accumulates into private buffers, which are summed afterward.
    PartitionReduce { partitions: usize },
}

impl Default for ReduceStrategy {
    fn default() -> Self { ReduceStrategy::Atomic }
}

/// Divisor of `value` closest to `target`; ties go to the smaller divisor.
pub fn nearest_divisor(value: usize, target: usize) -> usize {
    (1..=value)
        .filter(|d| value % d == 0)
        .min_by_key(|d| d.abs_diff(target))
        .unwrap_or(1)
}

/// Runs the per-example kernels across a batch.
pub struct BatchDriver {
    shape: SliceShape,
    strategy: ReduceStrategy,
    slice_width: usize,
    pool: Option<rayon::ThreadPool>,
}

impl BatchDriver {
    pub fn new(config: &TransformerConfig) -> Result<Self> {
        config.validate()?;
        let pool = if config.threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.threads)
                .build()
                .map_err(|e| TransformerError::InvalidConfig(format!("thread pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };
        let slice_width = nearest_divisor(config.output_size, config.target_slice_width);
        debug!(
            "batch driver: output_size={} max_active={} slice_width={} reduce={:?} threads={}",
            config.output_size, config.max_active_features, slice_width, config.reduce, config.threads
        );
        Ok(Self { shape: config.shape(), strategy: config.reduce, slice_width, pool })
    }

    pub fn shape(&self) -> SliceShape { self.shape }
    pub fn slice_width(&self) -> usize { self.slice_width }
    pub fn strategy(&self) -> ReduceStrategy { self.strategy }

    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Fills `output` (`batch_size x output_size`). Every (example, column slice) pair
    /// is an independent work unit.
    pub fn forward(&self, batch: &SparseBatch, weight: &[f32], bias: &[f32], output: &mut [f32]) {
        let n = self.shape.output_size;
        let width = self.slice_width;
        debug!("forward batch_size={} output_size={}", batch.batch_size, n);
        self.install(|| {
            output.par_chunks_mut(n).enumerate().for_each(|(b, row)| {
                let (idx, val) = batch.example(b);
                row.par_chunks_mut(width)
                    .enumerate()
                    .for_each(|(s, out)| forward_slice(idx, val, weight, bias, s * width, out));
            });
        });
    }

    /// Adds the gradients of the whole batch into `weight_grad` and `bias_grad`.
    ///
    /// The buffers keep whatever they held before; zero them at the start of a step.
    /// Results of the parallel strategies match `Sequential` up to float rounding order.
    pub fn backward(&self, batch: &SparseBatch, weight_grad: &mut [f32], bias_grad: &mut [f32], output_grad: &[f32]) {
        let n = self.shape.output_size;
        debug!("backward batch_size={} reduce={:?}", batch.batch_size, self.strategy);
        match self.strategy {
            ReduceStrategy::Sequential => {
                for (b, og) in output_grad.chunks(n).enumerate().take(batch.batch_size) {
                    let (idx, val) = batch.example(b);
                    backward(idx, val, weight_grad, bias_grad, og);
                }
            }
            ReduceStrategy::Atomic => {
                let wg = as_atomic(weight_grad);
                let bg = as_atomic(bias_grad);
                self.install(|| {
                    output_grad.par_chunks(n).enumerate().take(batch.batch_size).for_each(|(b, og)| {
                        let (idx, val) = batch.example(b);
                        backward_atomic(idx, val, wg, bg, og);
                    });
                });
            }
            ReduceStrategy::PartitionReduce { partitions } => {
                self.backward_partitioned(batch, weight_grad, bias_grad, output_grad, partitions);
            }
        }
    }

    fn backward_partitioned(
        &self,
        batch: &SparseBatch,
        weight_grad: &mut [f32],
        bias_grad: &mut [f32],
        output_grad: &[f32],
        partitions: usize,
    ) {
        let n = self.shape.output_size;
        let per_part = batch.batch_size.div_ceil(partitions.max(1)).max(1);
        let parts = batch.batch_size.div_ceil(per_part);
        let wlen = weight_grad.len();
        let partial = self.install(|| {
            (0..parts)
                .into_par_iter()
                .map(|p| {
                    let start = p * per_part;
                    let end = (start + per_part).min(batch.batch_size);
                    let mut wg = vec![0f32; wlen];
                    let mut bg = vec![0f32; n];
                    for b in start..end {
                        let (idx, val) = batch.example(b);
                        backward(idx, val, &mut wg, &mut bg, &output_grad[b * n..(b + 1) * n]);
                    }
                    (wg, bg)
                })
                .reduce_with(|(mut wa, mut ba), (wb, bb)| {
                    add_into(&mut wa, &wb);
                    add_into(&mut ba, &bb);
                    (wa, ba)
                })
        });
        if let Some((wg, bg)) = partial {
            self.install(|| {
                weight_grad.par_iter_mut().zip(wg.par_iter()).for_each(|(a, &b)| *a += b);
            });
            add_into(bias_grad, &bg);
        }
    }
}

fn add_into(acc: &mut [f32], other: &[f32]) {
    for (a, &b) in acc.iter_mut().zip(other) {
        *a += b;
    }
}

fn as_atomic(buf: &mut [f32]) -> &[AtomicU32] {
    // SAFETY: AtomicU32 has the size and alignment of f32, and the exclusive borrow keeps
    // every other access out for the lifetime of the returned slice.
    unsafe { std::slice::from_raw_parts(buf.as_mut_ptr() as *const AtomicU32, buf.len()) }
}

#[inline]
fn atomic_add(cell: &AtomicU32, v: f32) {
    let mut cur = cell.load(Ordering::Relaxed);
    loop {
        let next = (f32::from_bits(cur) + v).to_bits();
        match cell.compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => cur = actual,
        }
    }
}

/// Same accumulation as [`backward`], through shared atomic cells.
fn backward_atomic(idx: &[i32], val: &[f32], weight_grad: &[AtomicU32], bias_grad: &[AtomicU32], output_grad: &[f32]) {
    let n = bias_grad.len();
    for (b, &g) in bias_grad.iter().zip(output_grad) {
        if g != 0.0 {
            atomic_add(b, g);
        }
    }
    for (row, arity) in active_features(idx, val) {
        let wg = &weight_grad[row * n..(row + 1) * n];
        for (w, &g) in wg.iter().zip(output_grad) {
            if g != 0.0 {
                atomic_add(w, g * arity);
            }
        }
    }
}
