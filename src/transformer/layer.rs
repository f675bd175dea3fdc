use super::batch::{BatchDriver, SparseBatch};
use crate::config::TransformerConfig;
use crate::error::{Result, TransformerError};
use log::debug;
use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// Gradients of one backward pass, zero-initialized before accumulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

impl Gradients {
    pub fn zeros(num_inputs: usize, num_outputs: usize) -> Self {
        Self { weight: vec![0.0; num_inputs * num_outputs], bias: vec![0.0; num_outputs] }
    }
}

/// Sparse input layer owning its weight (`num_inputs x num_outputs`, row-major) and bias.
pub struct FeatureTransformerSlice {
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
    driver: BatchDriver,
}

impl FeatureTransformerSlice {
    /// Weight and bias drawn uniformly from `[-s, s)` with `s = sqrt(1 / num_inputs)`.
    pub fn new<R: Rng>(config: &TransformerConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let sigma = (1.0 / config.num_inputs as f32).sqrt();
        let dist = Uniform::new(-sigma, sigma);
        let weight = (0..config.num_inputs * config.output_size).map(|_| dist.sample(rng)).collect();
        let bias = (0..config.output_size).map(|_| dist.sample(rng)).collect();
        Self::from_parts(config, weight, bias)
    }

    pub fn from_parts(config: &TransformerConfig, weight: Vec<f32>, bias: Vec<f32>) -> Result<Self> {
        let driver = BatchDriver::new(config)?;
        let expected = config.num_inputs * config.output_size;
        if weight.len() != expected {
            return Err(TransformerError::ShapeMismatch { what: "weight", expected, actual: weight.len() });
        }
        if bias.len() != config.output_size {
            return Err(TransformerError::ShapeMismatch { what: "bias", expected: config.output_size, actual: bias.len() });
        }
        Ok(Self { num_inputs: config.num_inputs, num_outputs: config.output_size, weight, bias, driver })
    }

    fn check_batch(&self, batch: &SparseBatch) -> Result<()> {
        let max_active = self.driver.shape().max_active_features;
        if batch.max_active_features != max_active {
            return Err(TransformerError::ShapeMismatch { what: "max_active_features", expected: max_active, actual: batch.max_active_features });
        }
        batch.validate_indices(self.num_inputs)
    }

    /// Output of shape `batch_size x num_outputs`.
    pub fn forward(&self, batch: &SparseBatch) -> Result<Vec<f32>> {
        self.check_batch(batch)?;
        let mut output = vec![0f32; batch.batch_size * self.num_outputs];
        self.driver.forward(batch, &self.weight, &self.bias, &mut output);
        Ok(output)
    }

    /// Accumulates `grad_output` into `grads` without clearing it first.
    pub fn backward_into(&self, batch: &SparseBatch, grad_output: &[f32], grads: &mut Gradients) -> Result<()> {
        self.check_batch(batch)?;
        let expected = batch.batch_size * self.num_outputs;
        if grad_output.len() != expected {
            return Err(TransformerError::ShapeMismatch { what: "grad_output", expected, actual: grad_output.len() });
        }
        if grads.weight.len() != self.weight.len() || grads.bias.len() != self.num_outputs {
            return Err(TransformerError::ShapeMismatch { what: "gradient buffers", expected: self.weight.len(), actual: grads.weight.len() });
        }
        self.driver.backward(batch, &mut grads.weight, &mut grads.bias, grad_output);
        Ok(())
    }

    pub fn backward(&self, batch: &SparseBatch, grad_output: &[f32]) -> Result<Gradients> {
        let mut grads = Gradients::zeros(self.num_inputs, self.num_outputs);
        self.backward_into(batch, grad_output, &mut grads)?;
        debug!("backward: batch_size={} grads ready", batch.batch_size);
        Ok(grads)
    }
}

/// Two perspectives of the same position fed through one shared transformer.
pub struct DoubleFeatureTransformerSlice {
    pub inner: FeatureTransformerSlice,
}

impl DoubleFeatureTransformerSlice {
    pub fn new<R: Rng>(config: &TransformerConfig, rng: &mut R) -> Result<Self> {
        Ok(Self { inner: FeatureTransformerSlice::new(config, rng)? })
    }

    pub fn forward(&self, batch0: &SparseBatch, batch1: &SparseBatch) -> Result<(Vec<f32>, Vec<f32>)> {
        if batch0.batch_size != batch1.batch_size {
            return Err(TransformerError::ShapeMismatch { what: "second perspective batch", expected: batch0.batch_size, actual: batch1.batch_size });
        }
        Ok((self.inner.forward(batch0)?, self.inner.forward(batch1)?))
    }

    /// Both perspectives accumulate into one set of gradients.
    pub fn backward(&self, batch0: &SparseBatch, batch1: &SparseBatch, grad_output0: &[f32], grad_output1: &[f32]) -> Result<Gradients> {
        let mut grads = Gradients::zeros(self.inner.num_inputs, self.inner.num_outputs);
        self.inner.backward_into(batch0, grad_output0, &mut grads)?;
        self.inner.backward_into(batch1, grad_output1, &mut grads)?;
        Ok(grads)
    }
}
