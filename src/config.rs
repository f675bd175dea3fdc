use crate::error::{Result, TransformerError};
use crate::transformer::batch::ReduceStrategy;
use crate::transformer::{SliceShape, MAX_ACTIVE_FEATURES, OUTPUT_SIZE};
use anyhow::Context;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Preferred number of columns handled by one forward work unit.
pub const DEFAULT_TARGET_SLICE_WIDTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// Rows of the weight matrix (size of the sparse input space).
    pub num_inputs: usize,
    pub output_size: usize,
    pub max_active_features: usize,
    /// Worker threads for the batch driver; 0 uses the global rayon pool.
    pub threads: usize,
    pub reduce: ReduceStrategy,
    pub target_slice_width: usize,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            num_inputs: 40960,
            output_size: OUTPUT_SIZE,
            max_active_features: MAX_ACTIVE_FEATURES,
            threads: 0,
            reduce: ReduceStrategy::default(),
            target_slice_width: DEFAULT_TARGET_SLICE_WIDTH,
        }
    }
}

impl TransformerConfig {
    /// Reads a JSON config; missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("open transformer config: {}", path.as_ref().display()))?;
        let cfg: Self = serde_json::from_str(&text).context("parse transformer config")?;
        cfg.validate()?;
        info!("loaded transformer config from {}: {:?}", path.as_ref().display(), cfg);
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_inputs == 0 {
            return Err(TransformerError::InvalidConfig("num_inputs must be > 0".into()));
        }
        if self.output_size == 0 {
            return Err(TransformerError::InvalidConfig("output_size must be > 0".into()));
        }
        if self.max_active_features == 0 {
            return Err(TransformerError::InvalidConfig("max_active_features must be > 0".into()));
        }
        if self.target_slice_width == 0 {
            return Err(TransformerError::InvalidConfig("target_slice_width must be > 0".into()));
        }
        if let ReduceStrategy::PartitionReduce { partitions: 0 } = self.reduce {
            return Err(TransformerError::InvalidConfig("partition count must be > 0".into()));
        }
        Ok(())
    }

    pub fn shape(&self) -> SliceShape { SliceShape::new(self.output_size, self.max_active_features) }
}
