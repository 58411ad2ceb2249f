//! SwiGLU Feed-Forward Network
//!
//! ```text
//! FFN(x) = down_proj(SiLU(gate_proj(x)) ⊗ up_proj(x))
//! ```
//!
//! - Input: `[batch, seq_len, dim]`
//! - Gate/Up projections: `[batch, seq_len, intermediate_size]`
//! - Output: `[batch, seq_len, dim]`

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

use crate::{config::LlamaConfig, error::LlamaError};

/// SwiGLU feed-forward block (`mlp.{gate,up,down}_proj`).
#[derive(Debug)]
pub struct FeedForward {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
    /// Hidden width of the gated projection
    ffn_dim: usize,
}

impl FeedForward {
    pub fn new(config: &LlamaConfig, vb: VarBuilder) -> Result<Self> {
        let ffn_dim = config.intermediate_size;
        if ffn_dim == 0 {
            return Err(LlamaError::config_error("intermediate_size", "must be greater than 0").into());
        }

        let gate_proj = linear_no_bias(config.dim, ffn_dim, vb.pp("gate_proj"))?;
        let up_proj = linear_no_bias(config.dim, ffn_dim, vb.pp("up_proj"))?;
        let down_proj = linear_no_bias(ffn_dim, config.dim, vb.pp("down_proj"))?;

        Ok(Self {
            gate_proj,
            up_proj,
            down_proj,
            ffn_dim,
        })
    }

    pub fn ffn_dim(&self) -> usize {
        self.ffn_dim
    }
}

impl Module for FeedForward {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        self.down_proj.forward(&(gate * up)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::collections::HashMap;

    #[test]
    fn test_feed_forward_shapes() {
        let device = Device::Cpu;
        let config = LlamaConfig::new(16, 1, 2, 32).unwrap();
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let ffn = FeedForward::new(&config, vb).unwrap();
        assert_eq!(ffn.ffn_dim(), config.intermediate_size);

        let x = Tensor::randn(0f32, 1.0, (2, 5, 16), &device).unwrap();
        let y = ffn.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 5, 16]);
    }

    #[test]
    fn test_swiglu_matches_scalar_formula() {
        let device = Device::Cpu;
        let mut config = LlamaConfig::new(2, 1, 1, 4).unwrap();
        config.intermediate_size = 1;

        let mut tensors = HashMap::new();
        tensors.insert(
            "gate_proj.weight".to_string(),
            Tensor::new(&[[1.0f32, 0.0]], &device).unwrap(),
        );
        tensors.insert(
            "up_proj.weight".to_string(),
            Tensor::new(&[[0.0f32, 1.0]], &device).unwrap(),
        );
        tensors.insert(
            "down_proj.weight".to_string(),
            Tensor::new(&[[1.0f32], [2.0]], &device).unwrap(),
        );
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let ffn = FeedForward::new(&config, vb).unwrap();

        let x = Tensor::new(&[[[1.5f32, 3.0]]], &device).unwrap();
        let y = ffn.forward(&x).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();

        let silu = 1.5 / (1.0 + (-1.5f32).exp());
        let hidden = silu * 3.0;
        assert!((y[0] - hidden).abs() < 1e-5);
        assert!((y[1] - 2.0 * hidden).abs() < 1e-5);
    }
}
