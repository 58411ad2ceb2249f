//! Configuration for a batch generation run

use crate::device::DeviceSelection;
use crate::error::BatchResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// How the next token is chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodingMode {
    /// Follow the checkpoint's `generation_config.json` (greedy when absent)
    #[default]
    ModelDefaults,
    /// Always take the most likely token
    Greedy,
}

/// Main configuration for the batch generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BatchConfig {
    /// Hugging Face model id or a local checkpoint directory
    #[validate(length(min = 1, message = "Model id cannot be empty"))]
    pub model_id: String,

    /// Hub revision (branch, tag or commit)
    #[validate(length(min = 1, message = "Revision cannot be empty"))]
    pub revision: String,

    /// Maximum total sequence length, prompt included
    #[validate(range(
        min = 1,
        max = 131072,
        message = "Max length must be between 1 and 131072"
    ))]
    pub max_length: usize,

    /// Compute device
    pub device: DeviceSelection,

    /// Token selection strategy
    pub decoding: DecodingMode,

    /// Seed for sampled decoding
    pub seed: u64,

    /// Hub cache directory; the standard Hugging Face cache when unset
    pub cache_dir: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            model_id: crate::DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
            max_length: crate::DEFAULT_MAX_LENGTH,
            device: DeviceSelection::Auto,
            decoding: DecodingMode::ModelDefaults,
            seed: 42,
            cache_dir: None,
        }
    }
}

/// Configuration builder for fluent configuration construction
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    /// Create a new configuration builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model id
    #[must_use]
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.config.model_id = model_id.into();
        self
    }

    /// Set the hub revision
    #[must_use]
    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.config.revision = revision.into();
        self
    }

    /// Set the maximum total sequence length
    #[must_use]
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.config.max_length = max_length;
        self
    }

    /// Set the compute device
    #[must_use]
    pub fn device(mut self, device: DeviceSelection) -> Self {
        self.config.device = device;
        self
    }

    /// Set the decoding mode
    #[must_use]
    pub fn decoding(mut self, decoding: DecodingMode) -> Self {
        self.config.decoding = decoding;
        self
    }

    /// Set the sampling seed
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set the hub cache directory
    #[must_use]
    pub fn cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(cache_dir.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> BatchResult<BatchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
