//! # Transformer Block
//!
//! Pre-normalization decoder layer with residual connections:
//!
//! ```text
//! input
//!   ↓
//! input_layernorm → self_attn → + input
//!   ↓
//! post_attention_layernorm → mlp → + residual
//!   ↓
//! output
//! ```

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use crate::attention::MultiHeadAttention;
use crate::config::LlamaConfig;
use crate::error::{LlamaError, Result};
use crate::feed_forward::FeedForward;
use crate::normalization::RMSNorm;

/// A single decoder layer (`model.layers.N`).
#[derive(Debug)]
pub struct TransformerBlock {
    /// Grouped-query self attention
    pub self_attn: MultiHeadAttention,
    /// SwiGLU feed-forward network
    pub mlp: FeedForward,
    /// Normalization applied before attention
    pub input_layernorm: RMSNorm,
    /// Normalization applied before the feed-forward network
    pub post_attention_layernorm: RMSNorm,
    /// Layer index within the transformer stack
    pub layer_idx: usize,
}

impl TransformerBlock {
    /// Creates the layer from weights under `vb` (already prefixed with
    /// `model.layers.{layer_idx}`).
    pub fn new(layer_idx: usize, config: &LlamaConfig, vb: VarBuilder) -> Result<Self> {
        if layer_idx >= config.n_layers {
            return Err(LlamaError::config_error(
                "layer_idx",
                format!(
                    "Layer index {} exceeds number of layers {}",
                    layer_idx, config.n_layers
                ),
            ));
        }

        let context = format!("layer {} init", layer_idx);
        let self_attn = MultiHeadAttention::new(config, vb.pp("self_attn"))
            .map_err(|e| LlamaError::from_candle(e, context.clone()))?;
        let mlp = FeedForward::new(config, vb.pp("mlp"))
            .map_err(|e| LlamaError::from_candle(e, context.clone()))?;
        let input_layernorm = RMSNorm::from_config(config, vb.pp("input_layernorm"))
            .map_err(|e| LlamaError::from_candle(e, context.clone()))?;
        let post_attention_layernorm =
            RMSNorm::from_config(config, vb.pp("post_attention_layernorm"))
                .map_err(|e| LlamaError::from_candle(e, context))?;

        Ok(Self {
            self_attn,
            mlp,
            input_layernorm,
            post_attention_layernorm,
            layer_idx,
        })
    }

    /// Forward pass through the layer.
    ///
    /// `cos`/`sin` are the rotary tables for the new positions and `bias` the
    /// additive attention mask; see [`crate::attention::attention_bias`].
    pub fn forward(
        &mut self,
        x: &Tensor,
        cos: &Tensor,
        sin: &Tensor,
        bias: &Tensor,
    ) -> Result<Tensor> {
        let layer_idx = self.layer_idx;
        let context = || format!("layer {} forward", layer_idx);

        let residual = x;
        let hidden = self
            .input_layernorm
            .forward(x)
            .and_then(|h| self.self_attn.forward(&h, cos, sin, bias))
            .and_then(|h| h + residual)
            .map_err(|e| LlamaError::from_candle(e, context()))?;

        let residual = &hidden;
        self.post_attention_layernorm
            .forward(&hidden)
            .and_then(|h| self.mlp.forward(&h))
            .and_then(|h| h + residual)
            .map_err(|e| LlamaError::from_candle(e, context()))
    }

    /// Drop this layer's cached keys and values
    pub fn clear_kv_cache(&mut self) {
        self.self_attn.clear_kv_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::attention_bias;
    use crate::rope::RotaryEmbedding;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_layer_index_validated() {
        let device = Device::Cpu;
        let config = LlamaConfig::new(16, 2, 2, 32).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        assert!(TransformerBlock::new(2, &config, vb.clone()).is_err());
        assert!(TransformerBlock::new(1, &config, vb).is_ok());
    }

    #[test]
    fn test_block_preserves_shape() {
        let device = Device::Cpu;
        let config = LlamaConfig::new(16, 1, 2, 32).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut block = TransformerBlock::new(0, &config, vb).unwrap();
        let rope = RotaryEmbedding::new(&config, &device).unwrap();

        let x = Tensor::randn(0f32, 1.0, (1, 4, 16), &device).unwrap();
        let positions = Tensor::new(&[[0u32, 1, 2, 3]], &device).unwrap();
        let (cos, sin) = rope.cos_sin(&positions, DType::F32).unwrap();
        let mask = Tensor::ones((1, 4), DType::U32, &device).unwrap();
        let bias = attention_bias(&mask, 4, &device).unwrap();

        let y = block.forward(&x, &cos, &sin, &bias).unwrap();
        assert_eq!(y.dims(), &[1, 4, 16]);
        assert_eq!(block.self_attn.cached_len(), 4);

        block.clear_kv_cache();
        assert_eq!(block.self_attn.cached_len(), 0);
    }
}
