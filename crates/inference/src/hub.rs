//! Checkpoint resolution from a local directory or the Hugging Face Hub

use std::fmt;
use std::path::{Path, PathBuf};

use candle_core::Device;
use hf_hub::api::sync::{ApiBuilder, ApiError, ApiRepo};
use hf_hub::{Repo, RepoType};
use llama_batch_model::loader::{CONFIG_FILE, SINGLE_WEIGHT_FILE, WEIGHT_INDEX_FILE};
use llama_batch_model::{LlamaError, LlamaModel, ModelLoader};
use tracing::{debug, info};

use crate::config::BatchConfig;
use crate::device::compute_dtype;
use crate::error::{BatchError, BatchResult};
use crate::sampling::{GenerationDefaults, GENERATION_CONFIG_FILE};
use crate::tokenizer::{PromptTokenizer, TOKENIZER_CONFIG_FILE, TOKENIZER_FILE};
use crate::traits::ModelProvider;

/// Where checkpoint files come from
pub enum ModelRepository {
    /// A checkpoint directory on disk
    Local(PathBuf),
    /// A model repository on the Hugging Face Hub
    Hub {
        /// Hub repository handle
        repo: ApiRepo,
        /// Repository id, e.g. `meta-llama/Meta-Llama-3.1-70B`
        model_id: String,
    },
}

impl fmt::Debug for ModelRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => f.debug_tuple("Local").field(path).finish(),
            Self::Hub { model_id, .. } => f.debug_struct("Hub").field("model_id", model_id).finish(),
        }
    }
}

impl ModelRepository {
    /// Resolve `model_id`: an existing directory is used as is, anything else
    /// is treated as a hub repository id at `revision`.
    pub fn open(model_id: &str, revision: &str, cache_dir: Option<&Path>) -> BatchResult<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            debug!(path = %local.display(), "Using local checkpoint directory");
            return Ok(Self::Local(local.to_path_buf()));
        }

        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(dir.to_path_buf());
        }
        let api = builder
            .build()
            .map_err(|e| BatchError::Hub(format!("Failed to create hub client: {}", e)))?;

        info!(model_id, revision, "Resolving model on the Hugging Face Hub");
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));

        Ok(Self::Hub {
            repo,
            model_id: model_id.to_string(),
        })
    }

    /// Model id or directory this repository was opened from
    pub fn model_id(&self) -> String {
        match self {
            Self::Local(path) => path.display().to_string(),
            Self::Hub { model_id, .. } => model_id.clone(),
        }
    }

    /// Path of a required file, downloading it if needed
    pub fn fetch(&self, file: &str) -> BatchResult<PathBuf> {
        match self {
            Self::Local(dir) => {
                let path = dir.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(BatchError::ModelNotFound(format!(
                        "{} is missing from {}",
                        file,
                        dir.display()
                    )))
                }
            }
            Self::Hub { repo, model_id } => repo
                .get(file)
                .map_err(|e| classify_hub_error(model_id, file, &e)),
        }
    }

    /// Path of an optional file; `None` when the repository does not have it
    pub fn fetch_optional(&self, file: &str) -> BatchResult<Option<PathBuf>> {
        match self.fetch(file) {
            Ok(path) => Ok(Some(path)),
            Err(BatchError::ModelNotFound(reason)) => {
                debug!(file, %reason, "Optional checkpoint file not available");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Every safetensors shard of the checkpoint
    pub fn weight_files(&self) -> BatchResult<Vec<PathBuf>> {
        match self.fetch_optional(WEIGHT_INDEX_FILE)? {
            Some(index) => {
                let shards = ModelLoader::read_shard_index(&index)
                    .map_err(|e| BatchError::ModelLoadFailed(e.to_string()))?;
                info!(model_id = %self.model_id(), shards = shards.len(), "Fetching sharded weights");
                shards.iter().map(|shard| self.fetch(shard)).collect()
            }
            None => Ok(vec![self.fetch(SINGLE_WEIGHT_FILE)?]),
        }
    }
}

/// HTTP status of a failed hub request, if the server answered at all
fn response_status(err: &ApiError) -> Option<u16> {
    match err {
        ApiError::RequestError(inner) => match inner.as_ref() {
            ureq::Error::Status(code, _) => Some(*code),
            ureq::Error::Transport(_) => None,
        },
        ApiError::TooManyRetries(inner) => response_status(inner),
        _ => None,
    }
}

/// Missing repositories and files come back as HTTP 404; gated ones as 401/403.
fn classify_hub_error(model_id: &str, file: &str, err: &ApiError) -> BatchError {
    match response_status(err) {
        Some(404 | 401 | 403) => {
            BatchError::ModelNotFound(format!("{}/{}: {}", model_id, file, err))
        }
        _ => BatchError::Hub(format!("Failed to fetch {}/{}: {}", model_id, file, err)),
    }
}

fn load_error(err: LlamaError) -> BatchError {
    if err.is_out_of_memory() {
        err.into()
    } else {
        BatchError::ModelLoadFailed(err.to_string())
    }
}

/// Loads tokenizers and weights through [`ModelRepository`]
#[derive(Debug, Clone)]
pub struct HubModelProvider {
    revision: String,
    cache_dir: Option<PathBuf>,
}

impl HubModelProvider {
    /// Provider for `revision`, caching downloads in `cache_dir`
    pub fn new(revision: impl Into<String>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            revision: revision.into(),
            cache_dir,
        }
    }

    /// Provider matching a run configuration
    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.revision.clone(), config.cache_dir.clone())
    }

    fn open(&self, model_id: &str) -> BatchResult<ModelRepository> {
        ModelRepository::open(model_id, &self.revision, self.cache_dir.as_deref())
    }
}

impl ModelProvider for HubModelProvider {
    type Model = LlamaModel;

    fn load_tokenizer(&self, model_id: &str) -> BatchResult<PromptTokenizer> {
        let repo = self.open(model_id)?;
        let tokenizer_path = repo.fetch(TOKENIZER_FILE)?;
        let config_path = repo.fetch_optional(TOKENIZER_CONFIG_FILE)?;
        PromptTokenizer::from_files(&tokenizer_path, config_path.as_deref())
    }

    fn load_model(&self, model_id: &str, device: &Device) -> BatchResult<LlamaModel> {
        let repo = self.open(model_id)?;
        let config_path = repo.fetch(CONFIG_FILE)?;
        let config = ModelLoader::load_config(&config_path).map_err(load_error)?;

        let dtype = compute_dtype(device);
        info!(
            model_id,
            parameters = config.estimated_param_count(),
            weight_bytes = config.estimated_weight_bytes(dtype),
            kv_cache_bytes_per_token = config.estimated_kv_cache_bytes(1, 1, dtype),
            ?dtype,
            "Loading model"
        );

        let weight_files = repo.weight_files()?;
        ModelLoader::new(config, weight_files, device.clone(), dtype)
            .and_then(ModelLoader::load_model)
            .map_err(load_error)
    }

    fn generation_defaults(&self, model_id: &str) -> BatchResult<GenerationDefaults> {
        let repo = self.open(model_id)?;
        match repo.fetch_optional(GENERATION_CONFIG_FILE)? {
            Some(path) => GenerationDefaults::from_file(&path),
            None => {
                debug!(model_id, "No generation_config.json, decoding greedily");
                Ok(GenerationDefaults::greedy())
            }
        }
    }
}
