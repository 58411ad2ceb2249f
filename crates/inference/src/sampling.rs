//! Decoding defaults shipped with a checkpoint in `generation_config.json`

use std::fs;
use std::path::Path;

use candle_transformers::generation::Sampling;
use serde::{Deserialize, Serialize};

use crate::error::BatchResult;

/// File name of the generation defaults inside a checkpoint
pub const GENERATION_CONFIG_FILE: &str = "generation_config.json";

/// Top-k applied when sampling is enabled and the checkpoint does not set one
pub const DEFAULT_TOP_K: usize = 50;

/// `eos_token_id` is either a single id or a list of ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenIds {
    /// One stop token
    Single(u32),
    /// Several stop tokens
    Multiple(Vec<u32>),
}

impl TokenIds {
    /// Flatten into a list
    pub fn to_vec(&self) -> Vec<u32> {
        match self {
            Self::Single(id) => vec![*id],
            Self::Multiple(ids) => ids.clone(),
        }
    }
}

/// Subset of `generation_config.json` that affects decoding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    /// Sample instead of taking the most likely token
    #[serde(default)]
    pub do_sample: bool,
    /// Softmax temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Keep only the `top_k` most likely tokens (0 disables)
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Nucleus sampling mass
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Stop tokens
    #[serde(default)]
    pub eos_token_id: Option<TokenIds>,
    /// Token appended to finished rows, when the checkpoint declares one
    #[serde(default)]
    pub pad_token_id: Option<u32>,
}

impl GenerationDefaults {
    /// Greedy decoding with no checkpoint-provided stop tokens
    pub fn greedy() -> Self {
        Self::default()
    }

    /// Read a `generation_config.json` file
    pub fn from_file(path: &Path) -> BatchResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Stop tokens declared by the checkpoint, empty when absent
    pub fn eos_token_ids(&self) -> Vec<u32> {
        self.eos_token_id.as_ref().map(TokenIds::to_vec).unwrap_or_default()
    }

    /// Token for finished rows: the checkpoint's pad token, else `fallback`
    pub fn pad_token_id_or(&self, fallback: u32) -> u32 {
        self.pad_token_id.unwrap_or(fallback)
    }

    /// Token selection strategy for these defaults
    pub fn sampling(&self) -> Sampling {
        let temperature = self.temperature.unwrap_or(1.0);
        if !self.do_sample || temperature <= 0.0 {
            return Sampling::ArgMax;
        }

        let k = self.top_k.unwrap_or(DEFAULT_TOP_K);
        let p = self.top_p.unwrap_or(1.0);
        match (k > 0, p < 1.0) {
            (true, true) => Sampling::TopKThenTopP { k, p, temperature },
            (true, false) => Sampling::TopK { k, temperature },
            (false, true) => Sampling::TopP { p, temperature },
            (false, false) => Sampling::All { temperature },
        }
    }
}
