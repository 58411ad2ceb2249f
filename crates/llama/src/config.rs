//! Configuration system for Llama models.
//!
//! [`LlamaConfig`] mirrors the fields of a Hugging Face `config.json` for the
//! Llama 3.x family, including the `llama3` RoPE frequency scaling that the
//! 3.1 checkpoints rely on for their 128k context window.

use candle_core::DType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{LlamaError, Result};

/// Llama 3 RoPE frequency scaling parameters (`rope_scaling` with
/// `rope_type: "llama3"`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RopeScaling {
    /// Divisor applied to low-frequency components
    pub factor: f32,
    /// Wavelength ratio below which frequencies are fully scaled
    pub low_freq_factor: f32,
    /// Wavelength ratio above which frequencies are left untouched
    pub high_freq_factor: f32,
    /// Context length the model was pre-trained with
    pub original_max_position_embeddings: usize,
}

impl RopeScaling {
    /// Scaling shipped with every Llama 3.1 checkpoint.
    pub const fn llama_3_1() -> Self {
        Self {
            factor: 8.0,
            low_freq_factor: 1.0,
            high_freq_factor: 4.0,
            original_max_position_embeddings: 8192,
        }
    }
}

/// Llama model configuration.
///
/// # Memory Calculations
///
/// Weight memory is `estimated_param_count() * dtype size`. For Llama 3.1 70B
/// in BF16 that is roughly 141 GB; the KV cache adds
/// `2 * n_layers * batch * seq * n_kv_heads * head_dim * dtype size`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlamaConfig {
    /// Model dimension (hidden size)
    pub dim: usize,

    /// Number of transformer layers
    pub n_layers: usize,

    /// Number of attention heads
    pub n_heads: usize,

    /// Number of key-value heads (for grouped-query attention)
    /// If None, defaults to n_heads (multi-head attention)
    pub n_kv_heads: Option<usize>,

    /// Vocabulary size
    pub vocab_size: usize,

    /// Feed-forward network hidden dimension
    pub intermediate_size: usize,

    /// Normalization epsilon for RMSNorm
    pub norm_eps: f64,

    /// Maximum sequence length (context window)
    pub max_seq_len: usize,

    /// RoPE theta parameter (base frequency)
    pub rope_theta: f32,

    /// Llama 3 frequency scaling, when the checkpoint uses it
    pub rope_scaling: Option<RopeScaling>,

    /// Reuse the token embedding matrix as the output projection
    pub tie_word_embeddings: bool,

    /// Beginning-of-sequence token id
    pub bos_token_id: Option<u32>,

    /// Token ids that end generation
    pub eos_token_ids: Vec<u32>,
}

impl LlamaConfig {
    /// Create a new LlamaConfig with validation
    ///
    /// Remaining fields take Llama 2 style defaults: multi-head attention, an
    /// FFN width of `8/3 * dim` rounded up to 256, no RoPE scaling.
    pub fn new(dim: usize, n_layers: usize, n_heads: usize, vocab_size: usize) -> Result<Self> {
        let config = Self {
            dim,
            n_layers,
            n_heads,
            n_kv_heads: None,
            vocab_size,
            intermediate_size: default_intermediate_size(dim),
            norm_eps: 1e-6,
            max_seq_len: 2048,
            rope_theta: 10_000.0,
            rope_scaling: None,
            tie_word_embeddings: false,
            bos_token_id: None,
            eos_token_ids: Vec::new(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration for the Llama 3.1 70B model
    ///
    /// # Memory Usage
    ///
    /// - Parameters: ~70.6B parameters * 2 bytes (BF16) = ~141GB
    pub fn llama_3_1_70b() -> Result<Self> {
        let config = Self {
            dim: 8192,
            n_layers: 80,
            n_heads: 64,
            n_kv_heads: Some(8),
            vocab_size: 128256,
            intermediate_size: 28672,
            norm_eps: 1e-5,
            max_seq_len: 131072,
            rope_theta: 500_000.0,
            rope_scaling: Some(RopeScaling::llama_3_1()),
            tie_word_embeddings: false,
            bos_token_id: Some(128000),
            eos_token_ids: vec![128001],
        };

        config.validate()?;
        Ok(config)
    }

    /// Get the number of key-value heads
    ///
    /// Returns n_kv_heads if set, otherwise defaults to n_heads
    pub fn n_kv_heads(&self) -> usize {
        self.n_kv_heads.unwrap_or(self.n_heads)
    }

    /// Calculate head dimension
    pub fn head_dim(&self) -> usize {
        self.dim / self.n_heads
    }

    /// Estimate parameter count in the model
    pub fn estimated_param_count(&self) -> usize {
        let embedding_params = self.vocab_size * self.dim;
        let kv_dim = self.n_kv_heads() * self.head_dim();

        let attention_params = self.n_layers
            * (self.dim * self.dim // q_proj
                + 2 * self.dim * kv_dim // k_proj, v_proj
                + self.dim * self.dim // o_proj
                + self.dim); // input_layernorm

        let ffn_params = self.n_layers
            * (3 * self.dim * self.intermediate_size // gate, up, down
                + self.dim); // post_attention_layernorm

        let lm_head = if self.tie_word_embeddings {
            0
        } else {
            self.vocab_size * self.dim
        };

        embedding_params + attention_params + ffn_params + self.dim + lm_head
    }

    /// Bytes needed to hold the weights in `dtype`
    pub fn estimated_weight_bytes(&self, dtype: DType) -> usize {
        self.estimated_param_count() * dtype.size_in_bytes()
    }

    /// Bytes needed for the key/value cache of a full batch
    pub fn estimated_kv_cache_bytes(&self, batch_size: usize, seq_len: usize, dtype: DType) -> usize {
        2 * self.n_layers
            * batch_size
            * seq_len
            * self.n_kv_heads()
            * self.head_dim()
            * dtype.size_in_bytes()
    }

    /// Validate the configuration for structural correctness
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(LlamaError::config_error("dim", "must be greater than 0"));
        }

        if self.n_layers == 0 {
            return Err(LlamaError::config_error(
                "n_layers",
                "must be greater than 0",
            ));
        }

        if self.n_heads == 0 {
            return Err(LlamaError::config_error(
                "n_heads",
                "must be greater than 0",
            ));
        }

        if self.vocab_size == 0 {
            return Err(LlamaError::config_error(
                "vocab_size",
                "must be greater than 0",
            ));
        }

        if self.intermediate_size == 0 {
            return Err(LlamaError::config_error(
                "intermediate_size",
                "must be greater than 0",
            ));
        }

        if self.dim % self.n_heads != 0 {
            return Err(LlamaError::config_error(
                "dim",
                format!("must be divisible by n_heads ({})", self.n_heads),
            ));
        }

        if self.head_dim() % 2 != 0 {
            return Err(LlamaError::config_error(
                "dim",
                format!("head dimension must be even for RoPE, got {}", self.head_dim()),
            ));
        }

        if let Some(n_kv_heads) = self.n_kv_heads {
            if n_kv_heads == 0 {
                return Err(LlamaError::config_error(
                    "n_kv_heads",
                    "must be greater than 0",
                ));
            }

            if self.n_heads % n_kv_heads != 0 {
                return Err(LlamaError::config_error(
                    "n_kv_heads",
                    format!(
                        "n_heads ({}) must be divisible by n_kv_heads ({})",
                        self.n_heads, n_kv_heads
                    ),
                ));
            }
        }

        if self.max_seq_len == 0 {
            return Err(LlamaError::config_error(
                "max_seq_len",
                "must be greater than 0",
            ));
        }

        if self.norm_eps <= 0.0 {
            return Err(LlamaError::config_error("norm_eps", "must be positive"));
        }

        if self.rope_theta <= 0.0 {
            return Err(LlamaError::config_error("rope_theta", "must be positive"));
        }

        if let Some(scaling) = &self.rope_scaling {
            if scaling.factor <= 0.0 || scaling.original_max_position_embeddings == 0 {
                return Err(LlamaError::config_error(
                    "rope_scaling",
                    "factor and original_max_position_embeddings must be positive",
                ));
            }
            if scaling.high_freq_factor <= scaling.low_freq_factor {
                return Err(LlamaError::config_error(
                    "rope_scaling",
                    format!(
                        "high_freq_factor ({}) must exceed low_freq_factor ({})",
                        scaling.high_freq_factor, scaling.low_freq_factor
                    ),
                ));
            }
        }

        Ok(())
    }
}

fn default_intermediate_size(dim: usize) -> usize {
    let base = (8 * dim) / 3;
    base.div_ceil(256) * 256
}

impl LlamaConfig {
    /// Create LlamaConfig from a JSON value
    ///
    /// Accepts the Hugging Face `config.json` layout and the field names used
    /// by Meta's `params.json`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use llama_batch_model::LlamaConfig;
    /// use serde_json::json;
    ///
    /// let config_json = json!({
    ///     "hidden_size": 4096,
    ///     "num_hidden_layers": 32,
    ///     "num_attention_heads": 32,
    ///     "vocab_size": 128256
    /// });
    ///
    /// let config = LlamaConfig::from_json_value(config_json)?;
    /// # Ok::<(), llama_batch_model::LlamaError>(())
    /// ```
    pub fn from_json_value(json: Value) -> Result<Self> {
        let obj = json.as_object().ok_or_else(|| {
            LlamaError::config_error("config_format", "Configuration must be a JSON object")
        })?;

        let dim = Self::extract_usize(obj, &["hidden_size", "dim", "d_model"])
            .ok_or_else(|| missing("hidden_size"))?;
        let n_layers = Self::extract_usize(obj, &["num_hidden_layers", "n_layers", "num_layers"])
            .ok_or_else(|| missing("num_hidden_layers"))?;
        let n_heads = Self::extract_usize(obj, &["num_attention_heads", "n_heads", "num_heads"])
            .ok_or_else(|| missing("num_attention_heads"))?;
        let vocab_size = Self::extract_usize(obj, &["vocab_size", "vocabulary_size"])
            .ok_or_else(|| missing("vocab_size"))?;

        let n_kv_heads = Self::extract_usize(obj, &["num_key_value_heads", "n_kv_heads"]);
        let intermediate_size = Self::extract_usize(obj, &["intermediate_size", "ffn_dim"])
            .unwrap_or_else(|| default_intermediate_size(dim));
        let norm_eps = Self::extract_f64(obj, &["rms_norm_eps", "norm_eps"]).unwrap_or(1e-6);
        let max_seq_len =
            Self::extract_usize(obj, &["max_position_embeddings", "max_seq_len"]).unwrap_or(4096);
        let rope_theta =
            Self::extract_f64(obj, &["rope_theta", "rotary_emb_base"]).unwrap_or(10_000.0) as f32;
        let rope_scaling = Self::extract_rope_scaling(obj)?;
        let tie_word_embeddings = obj
            .get("tie_word_embeddings")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let bos_token_id = Self::extract_usize(obj, &["bos_token_id"]).map(|id| id as u32);
        let eos_token_ids = obj.get("eos_token_id").map(token_id_list).unwrap_or_default();

        let config = Self {
            dim,
            n_layers,
            n_heads,
            n_kv_heads,
            vocab_size,
            intermediate_size,
            norm_eps,
            max_seq_len,
            rope_theta,
            rope_scaling,
            tie_word_embeddings,
            bos_token_id,
            eos_token_ids,
        };

        config.validate()?;
        Ok(config)
    }

    fn extract_usize(obj: &Map<String, Value>, fields: &[&str]) -> Option<usize> {
        fields
            .iter()
            .find_map(|field| obj.get(*field).and_then(Value::as_u64))
            .map(|value| value as usize)
    }

    fn extract_f64(obj: &Map<String, Value>, fields: &[&str]) -> Option<f64> {
        fields
            .iter()
            .find_map(|field| obj.get(*field).and_then(Value::as_f64))
    }

    /// `rope_scaling` is null for Llama 2/3.0 and a `llama3` object for 3.1+.
    fn extract_rope_scaling(obj: &Map<String, Value>) -> Result<Option<RopeScaling>> {
        let scaling = match obj.get("rope_scaling") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Object(scaling)) => scaling,
            Some(other) => {
                return Err(LlamaError::config_error(
                    "rope_scaling",
                    format!("expected an object, got {}", other),
                ))
            }
        };

        let rope_type = scaling
            .get("rope_type")
            .or_else(|| scaling.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("llama3");
        if rope_type != "llama3" {
            return Err(LlamaError::config_error(
                "rope_scaling",
                format!("unsupported rope_type '{}'", rope_type),
            ));
        }

        let defaults = RopeScaling::llama_3_1();
        Ok(Some(RopeScaling {
            factor: Self::extract_f64(scaling, &["factor"])
                .map_or(defaults.factor, |v| v as f32),
            low_freq_factor: Self::extract_f64(scaling, &["low_freq_factor"])
                .map_or(defaults.low_freq_factor, |v| v as f32),
            high_freq_factor: Self::extract_f64(scaling, &["high_freq_factor"])
                .map_or(defaults.high_freq_factor, |v| v as f32),
            original_max_position_embeddings: Self::extract_usize(
                scaling,
                &["original_max_position_embeddings"],
            )
            .unwrap_or(defaults.original_max_position_embeddings),
        }))
    }
}

fn missing(field: &str) -> LlamaError {
    LlamaError::config_error(field, format!("Missing required field: {}", field))
}

/// Token id fields may hold a single integer or a list of integers.
pub fn token_id_list(value: &Value) -> Vec<u32> {
    match value {
        Value::Number(n) => n.as_u64().map(|id| vec![id as u32]).unwrap_or_default(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_u64)
            .map(|id| id as u32)
            .collect(),
        _ => Vec::new(),
    }
}
