//! # Model Loader
//!
//! Loads a Llama checkpoint stored as (optionally sharded) SafeTensors:
//!
//! 1. Parse `config.json` into a [`LlamaConfig`]
//! 2. Resolve shard files from `model.safetensors.index.json`, or fall back
//!    to a single `model.safetensors`
//! 3. Memory-map every shard and build [`LlamaModel`] on the target device
//!
//! Weights are converted to the requested dtype as they are copied to the
//! device, so a BF16 checkpoint can be loaded as F32 for CPU inference.

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::LlamaConfig;
use crate::error::{LlamaError, Result};
use crate::model::LlamaModel;

/// File names used by Hugging Face Llama checkpoints
pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHT_INDEX_FILE: &str = "model.safetensors.index.json";
pub const SINGLE_WEIGHT_FILE: &str = "model.safetensors";

/// Model loader for SafeTensors checkpoints with sharding support.
#[derive(Debug, Clone)]
pub struct ModelLoader {
    config: LlamaConfig,
    weight_files: Vec<PathBuf>,
    device: Device,
    dtype: DType,
}

impl ModelLoader {
    /// Creates a loader for an already-parsed configuration and weight files.
    pub fn new(
        config: LlamaConfig,
        weight_files: Vec<PathBuf>,
        device: Device,
        dtype: DType,
    ) -> Result<Self> {
        if weight_files.is_empty() {
            return Err(LlamaError::io_error(
                "No weight files provided",
                "model_loader_init",
            ));
        }
        if let Some(missing) = weight_files.iter().find(|path| !path.is_file()) {
            return Err(LlamaError::io_error(
                format!("Weight file does not exist: {:?}", missing),
                "model_loader_init",
            ));
        }

        Ok(Self {
            config,
            weight_files,
            device,
            dtype,
        })
    }

    /// Creates a loader for a local checkpoint directory.
    ///
    /// ```rust,no_run
    /// use llama_batch_model::ModelLoader;
    /// use candle_core::{Device, DType};
    ///
    /// let loader = ModelLoader::from_directory(
    ///     "/models/Meta-Llama-3.1-70B",
    ///     Device::Cpu,
    ///     DType::F32,
    /// )?;
    /// let model = loader.load_model()?;
    /// # Ok::<(), llama_batch_model::LlamaError>(())
    /// ```
    pub fn from_directory<P: AsRef<Path>>(model_path: P, device: Device, dtype: DType) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.is_dir() {
            return Err(LlamaError::io_error(
                format!("Model directory does not exist: {:?}", model_path),
                "model_loader_init",
            ));
        }

        let config = Self::load_config(&model_path.join(CONFIG_FILE))?;

        let index_path = model_path.join(WEIGHT_INDEX_FILE);
        let weight_files = if index_path.is_file() {
            Self::read_shard_index(&index_path)?
                .into_iter()
                .map(|shard| model_path.join(shard))
                .collect()
        } else {
            vec![model_path.join(SINGLE_WEIGHT_FILE)]
        };

        Self::new(config, weight_files, device, dtype)
    }

    /// Loads model configuration from a `config.json` file.
    pub fn load_config(config_path: &Path) -> Result<LlamaConfig> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            LlamaError::io_error(
                format!("Failed to read {:?}: {}", config_path, e),
                "load_config",
            )
        })?;

        let config_value: Value = serde_json::from_str(&config_content).map_err(|e| {
            LlamaError::config_error("config.json", format!("Failed to parse config.json: {}", e))
        })?;

        LlamaConfig::from_json_value(config_value)
    }

    /// Reads the distinct shard file names from a SafeTensors index file.
    pub fn read_shard_index(index_path: &Path) -> Result<Vec<String>> {
        let content = fs::read_to_string(index_path).map_err(|e| {
            LlamaError::io_error(
                format!("Failed to read {:?}: {}", index_path, e),
                "read_shard_index",
            )
        })?;
        let index: Value = serde_json::from_str(&content).map_err(|e| {
            LlamaError::config_error(
                WEIGHT_INDEX_FILE,
                format!("Failed to parse weight index: {}", e),
            )
        })?;

        Self::shard_names(&index)
    }

    /// Distinct shard names referenced by an index's `weight_map`, sorted.
    pub fn shard_names(index: &Value) -> Result<Vec<String>> {
        let weight_map = index
            .get("weight_map")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                LlamaError::config_error(WEIGHT_INDEX_FILE, "Missing weight_map object")
            })?;

        let shards: BTreeSet<String> = weight_map
            .values()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();

        if shards.is_empty() {
            return Err(LlamaError::config_error(
                WEIGHT_INDEX_FILE,
                "weight_map references no files",
            ));
        }

        Ok(shards.into_iter().collect())
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    pub fn weight_files(&self) -> &[PathBuf] {
        &self.weight_files
    }

    /// Memory-maps the shards and builds the model on the target device.
    pub fn load_model(self) -> Result<LlamaModel> {
        info!(
            shards = self.weight_files.len(),
            dtype = ?self.dtype,
            device = ?self.device,
            estimated_gb = self.config.estimated_weight_bytes(self.dtype) as f64 / 1e9,
            "Loading model weights"
        );
        for file in &self.weight_files {
            debug!(file = %file.display(), "Mapping weight shard");
        }

        // SAFETY: the shards are opened read-only and must not be modified
        // while the model holds the mapping.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&self.weight_files, self.dtype, &self.device)
        }
        .map_err(|e| LlamaError::from_candle(e, "map weight files"))?;

        let model = LlamaModel::new(&self.config, vb)?;
        info!(
            layers = self.config.n_layers,
            parameters = model.parameter_count(),
            "Model weights loaded"
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shard_names_are_deduplicated_and_sorted() {
        let index = json!({
            "metadata": { "total_size": 1234 },
            "weight_map": {
                "lm_head.weight": "model-00030-of-00030.safetensors",
                "model.embed_tokens.weight": "model-00001-of-00030.safetensors",
                "model.layers.0.mlp.up_proj.weight": "model-00001-of-00030.safetensors",
                "model.norm.weight": "model-00030-of-00030.safetensors"
            }
        });

        let shards = ModelLoader::shard_names(&index).unwrap();
        assert_eq!(
            shards,
            vec![
                "model-00001-of-00030.safetensors".to_string(),
                "model-00030-of-00030.safetensors".to_string(),
            ]
        );
    }

    #[test]
    fn test_shard_index_requires_weight_map() {
        assert!(ModelLoader::shard_names(&json!({ "metadata": {} })).is_err());
        assert!(ModelLoader::shard_names(&json!({ "weight_map": {} })).is_err());
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let result = ModelLoader::from_directory("/nonexistent/llama", Device::Cpu, DType::F32);
        assert!(matches!(result, Err(LlamaError::IoError { .. })));
    }

    #[test]
    fn test_missing_weight_file_rejected() {
        let config = LlamaConfig::new(16, 1, 2, 32).unwrap();
        let result = ModelLoader::new(
            config,
            vec![PathBuf::from("/nonexistent/model.safetensors")],
            Device::Cpu,
            DType::F32,
        );
        assert!(matches!(result, Err(LlamaError::IoError { .. })));
    }
}
