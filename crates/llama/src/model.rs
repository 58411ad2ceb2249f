//! # Llama Model
//!
//! ```text
//! tokens → embed_tokens → layers[0..n_layers] → norm → lm_head → logits
//! ```
//!
//! Tensor names follow the Hugging Face checkpoint layout
//! (`model.embed_tokens.weight`, `model.layers.N.self_attn.q_proj.weight`,
//! `lm_head.weight`, ...). When `tie_word_embeddings` is set the output
//! projection reuses the embedding matrix.
//!
//! [`LlamaModel::forward`] is built for batched incremental decoding: the
//! first call processes the padded prompts, later calls feed one token per
//! row, and only the logits of the final position are projected.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, Linear, VarBuilder};

use crate::attention::attention_bias;
use crate::config::LlamaConfig;
use crate::error::{LlamaError, Result};
use crate::normalization::RMSNorm;
use crate::rope::RotaryEmbedding;
use crate::transformer_block::TransformerBlock;

/// Llama causal language model.
///
/// ## Usage
///
/// ```rust
/// use llama_batch_model::{LlamaConfig, LlamaModel};
/// use candle_core::{DType, Device, Tensor};
/// use candle_nn::{VarBuilder, VarMap};
///
/// let config = LlamaConfig::new(64, 2, 4, 128)?;
/// let device = Device::Cpu;
/// let varmap = VarMap::new();
/// let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
/// let mut model = LlamaModel::new(&config, vb)?;
///
/// let input_ids = Tensor::new(&[[1u32, 2, 3]], &device)?;
/// let positions = Tensor::new(&[[0u32, 1, 2]], &device)?;
/// let mask = Tensor::ones((1, 3), DType::U32, &device)?;
/// let logits = model.forward(&input_ids, &positions, &mask)?;
/// assert_eq!(logits.dims(), &[1, 128]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct LlamaModel {
    embed_tokens: Embedding,
    layers: Vec<TransformerBlock>,
    norm: RMSNorm,
    lm_head: Linear,
    rotary: RotaryEmbedding,
    config: LlamaConfig,
    device: Device,
    dtype: DType,
}

impl LlamaModel {
    /// Builds the model from a root variable builder.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an invalid configuration, `OutOfMemory` when
    /// the device cannot hold the weights, and `TensorError` for missing or
    /// misshapen tensors.
    pub fn new(config: &LlamaConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let device = vb.device().clone();
        let dtype = vb.dtype();
        let model_vb = vb.pp("model");

        let embed_tokens =
            candle_nn::embedding(config.vocab_size, config.dim, model_vb.pp("embed_tokens"))
                .map_err(|e| LlamaError::from_candle(e, "token embeddings"))?;

        let mut layers = Vec::with_capacity(config.n_layers);
        for layer_idx in 0..config.n_layers {
            let layer = TransformerBlock::new(
                layer_idx,
                config,
                model_vb.pp(format!("layers.{}", layer_idx)),
            )?;
            layers.push(layer);
        }

        let norm = RMSNorm::from_config(config, model_vb.pp("norm"))
            .map_err(|e| LlamaError::from_candle(e, "final norm"))?;

        let lm_head = if config.tie_word_embeddings {
            Linear::new(embed_tokens.embeddings().clone(), None)
        } else {
            candle_nn::linear_no_bias(config.dim, config.vocab_size, vb.pp("lm_head"))
                .map_err(|e| LlamaError::from_candle(e, "output projection"))?
        };

        let rotary = RotaryEmbedding::new(config, &device)?;

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            rotary,
            config: config.clone(),
            device,
            dtype,
        })
    }

    /// Runs `input_ids` through the model and returns next-token logits.
    ///
    /// # Arguments
    ///
    /// * `input_ids` - `[batch, seq_len]` u32 tokens not yet seen by the cache
    /// * `positions` - `[batch, seq_len]` u32 rotary positions of those tokens
    /// * `attention_mask` - `[batch, cached_len + seq_len]`, 1 for real tokens
    ///
    /// # Returns
    ///
    /// `[batch, vocab_size]` F32 logits for the last column of `input_ids`.
    pub fn forward(
        &mut self,
        input_ids: &Tensor,
        positions: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Tensor> {
        let (batch_size, seq_len) = input_ids.dims2()?;
        if seq_len == 0 {
            return Err(LlamaError::dimension_error(
                "model_forward",
                vec![batch_size, 1],
                vec![batch_size, 0],
            ));
        }
        if positions.dims() != input_ids.dims() {
            return Err(LlamaError::dimension_error(
                "model_forward positions",
                input_ids.dims().to_vec(),
                positions.dims().to_vec(),
            ));
        }

        let expected_mask = vec![batch_size, self.cached_len() + seq_len];
        if attention_mask.dims() != expected_mask.as_slice() {
            return Err(LlamaError::dimension_error(
                "model_forward attention_mask",
                expected_mask,
                attention_mask.dims().to_vec(),
            ));
        }

        let (cos, sin) = self.rotary.cos_sin(positions, self.dtype)?;
        let bias = attention_bias(attention_mask, seq_len, &self.device)?;

        let mut hidden_states = self
            .embed_tokens
            .forward(input_ids)
            .map_err(|e| LlamaError::from_candle(e, "token embedding"))?;

        for layer in &mut self.layers {
            hidden_states = layer.forward(&hidden_states, &cos, &sin, &bias)?;
        }

        hidden_states
            .narrow(1, seq_len - 1, 1)
            .and_then(|last| self.norm.forward(&last))
            .and_then(|last| self.lm_head.forward(&last))
            .and_then(|logits| logits.squeeze(1))
            .and_then(|logits| logits.to_dtype(DType::F32))
            .map_err(|e| LlamaError::from_candle(e, "output projection"))
    }

    /// Positions currently held in the KV cache
    pub fn cached_len(&self) -> usize {
        self.layers
            .first()
            .map_or(0, |layer| layer.self_attn.cached_len())
    }

    /// Reset every layer's KV cache
    pub fn clear_kv_cache(&mut self) {
        for layer in &mut self.layers {
            layer.clear_kv_cache();
        }
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Parameter count implied by the configuration
    pub fn parameter_count(&self) -> usize {
        self.config.estimated_param_count()
    }
}
