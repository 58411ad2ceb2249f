//! Batch prompt encoding and decoding on top of `tokenizers`
//!
//! Decoder-only models continue from the last position of every row, so the
//! batch is padded on the left. The pad token is the end-of-sequence token.

use std::fs;
use std::path::Path;

use candle_core::{Device, Tensor};
use serde_json::Value;
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams,
};
use tracing::debug;

use crate::error::{BatchError, BatchResult};

/// Tokenizer definition inside a checkpoint
pub const TOKENIZER_FILE: &str = "tokenizer.json";
/// Optional special-token metadata inside a checkpoint
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// End-of-sequence tokens tried when `tokenizer_config.json` names none
const EOS_FALLBACKS: [&str; 3] = ["<|end_of_text|>", "<|eot_id|>", "</s>"];

/// A padded batch of prompts on the compute device
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    /// Token ids, `[batch, seq_len]` u32
    pub input_ids: Tensor,
    /// 1 for real tokens and 0 for padding, `[batch, seq_len]` u32
    pub attention_mask: Tensor,
}

impl EncodedBatch {
    /// Number of rows
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }

    /// Padded row length
    pub fn seq_len(&self) -> usize {
        self.input_ids.dims().get(1).copied().unwrap_or(0)
    }
}

/// Tokenizer for batched question prompts
pub struct PromptTokenizer {
    tokenizer: Tokenizer,
    eos_token: String,
    eos_token_id: u32,
    model_max_length: Option<usize>,
}

impl std::fmt::Debug for PromptTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptTokenizer")
            .field("eos_token", &self.eos_token)
            .field("eos_token_id", &self.eos_token_id)
            .field("model_max_length", &self.model_max_length)
            .field("padding", &self.tokenizer.get_padding().is_some())
            .finish()
    }
}

impl PromptTokenizer {
    /// Wrap a tokenizer, resolving its end-of-sequence token.
    ///
    /// `tokenizer_config` is the parsed `tokenizer_config.json`; its
    /// `eos_token` wins over the built-in fallbacks.
    pub fn new(tokenizer: Tokenizer, tokenizer_config: Option<&Value>) -> BatchResult<Self> {
        let configured = tokenizer_config
            .and_then(|config| config.get("eos_token"))
            .and_then(special_token_content);

        let (eos_token, eos_token_id) = configured
            .into_iter()
            .chain(EOS_FALLBACKS.iter().map(|token| (*token).to_string()))
            .find_map(|token| tokenizer.token_to_id(&token).map(|id| (token, id)))
            .ok_or_else(|| {
                BatchError::Tokenizer("Tokenizer has no end-of-sequence token".to_string())
            })?;

        let model_max_length = tokenizer_config
            .and_then(|config| config.get("model_max_length"))
            .and_then(Value::as_u64)
            .and_then(|len| usize::try_from(len).ok());

        debug!(%eos_token, eos_token_id, ?model_max_length, "Resolved tokenizer special tokens");

        Ok(Self {
            tokenizer,
            eos_token,
            eos_token_id,
            model_max_length,
        })
    }

    /// Load `tokenizer.json` and, when present, `tokenizer_config.json`
    pub fn from_files(tokenizer_path: &Path, config_path: Option<&Path>) -> BatchResult<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            BatchError::Tokenizer(format!(
                "Failed to load {}: {}",
                tokenizer_path.display(),
                e
            ))
        })?;

        let config = match config_path {
            Some(path) => Some(serde_json::from_str::<Value>(&fs::read_to_string(path)?)?),
            None => None,
        };

        Self::new(tokenizer, config.as_ref())
    }

    /// Use the end-of-sequence token for padding, on the left
    pub fn set_pad_token_to_eos(&mut self) {
        self.tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            direction: PaddingDirection::Left,
            pad_to_multiple_of: None,
            pad_id: self.eos_token_id,
            pad_type_id: 0,
            pad_token: self.eos_token.clone(),
        }));
    }

    /// Padding token id, `None` until padding is configured
    pub fn pad_token_id(&self) -> Option<u32> {
        self.tokenizer.get_padding().map(|padding| padding.pad_id)
    }

    /// End-of-sequence token id
    pub fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    /// End-of-sequence token text
    pub fn eos_token(&self) -> &str {
        &self.eos_token
    }

    /// Encode every prompt into one padded batch on `device`.
    ///
    /// Rows longer than `max_context` (or the tokenizer's own limit, if
    /// smaller) are truncated on the right.
    pub fn encode_batch<S: AsRef<str>>(
        &mut self,
        prompts: &[S],
        max_context: usize,
        device: &Device,
    ) -> BatchResult<EncodedBatch> {
        if self.tokenizer.get_padding().is_none() {
            return Err(BatchError::Tokenizer(
                "Padding is not configured; set a pad token before batch encoding".to_string(),
            ));
        }

        let max_length = self
            .model_max_length
            .map_or(max_context, |limit| limit.min(max_context));
        self.tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| BatchError::Tokenizer(format!("Invalid truncation: {}", e)))?;

        let inputs: Vec<&str> = prompts.iter().map(AsRef::as_ref).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| BatchError::Tokenizer(format!("Encoding failed: {}", e)))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map_or(0, |encoding| encoding.get_ids().len());
        let mut ids = Vec::with_capacity(batch_size * seq_len);
        let mut mask = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            ids.extend_from_slice(encoding.get_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        debug!(batch_size, seq_len, "Encoded prompt batch");

        Ok(EncodedBatch {
            input_ids: Tensor::from_vec(ids, (batch_size, seq_len), device)?,
            attention_mask: Tensor::from_vec(mask, (batch_size, seq_len), device)?,
        })
    }

    /// Decode one row of token ids
    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> BatchResult<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| BatchError::Tokenizer(format!("Decoding failed: {}", e)))
    }
}

/// Special tokens are stored either as plain strings or as `{"content": ...}`
fn special_token_content(value: &Value) -> Option<String> {
    match value {
        Value::String(token) => Some(token.clone()),
        Value::Object(map) => map.get("content").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
