//! RMSNorm Layer Normalization
//!
//! ```text
//! RMSNorm(x) = γ * (x / sqrt(mean(x²) + ε))
//! ```
//!
//! The mean of squares is accumulated in F32 regardless of the activation
//! dtype; BF16 sums over 8192 channels lose too much precision otherwise.
//! The normalized activations are cast back before the scale is applied.

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::VarBuilder;

use crate::{config::LlamaConfig, error::LlamaError};

/// RMSNorm (Root Mean Square Layer Normalization) for Llama models.
///
/// - Input: `[..., dim]`
/// - Weight: `[dim]`
/// - Output: same shape and dtype as the input
#[derive(Debug, Clone)]
pub struct RMSNorm {
    /// Learnable scale parameters
    weight: Tensor,
    /// Normalization epsilon for numerical stability
    eps: f64,
    /// Model dimension
    dim: usize,
}

impl RMSNorm {
    /// Creates a new RMSNorm layer reading `weight` from `vb`.
    ///
    /// # Errors
    ///
    /// Fails when `dim` is zero, `eps` is not positive, or the weight is
    /// missing from the checkpoint.
    pub fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        if dim == 0 {
            return Err(LlamaError::config_error("dim", "must be greater than 0").into());
        }
        if eps <= 0.0 {
            return Err(LlamaError::config_error("eps", "must be positive").into());
        }

        let weight = vb.get(dim, "weight")?;

        Ok(Self { weight, eps, dim })
    }

    /// Creates a new RMSNorm layer sized from a configuration.
    pub fn from_config(config: &LlamaConfig, vb: VarBuilder) -> Result<Self> {
        Self::new(config.dim, config.norm_eps, vb)
    }

    /// Returns the normalization dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Returns the epsilon value used for numerical stability.
    pub fn eps(&self) -> f64 {
        self.eps
    }
}

impl Module for RMSNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let last_dim = x.dim(D::Minus1)?;
        if last_dim != self.dim {
            return Err(LlamaError::dimension_error(
                "RMSNorm input",
                vec![self.dim],
                vec![last_dim],
            )
            .into());
        }

        let input_dtype = x.dtype();
        let x = x.to_dtype(DType::F32)?;
        let mean_squared = x.sqr()?.mean_keepdim(D::Minus1)?;
        let normalized = x.broadcast_div(&(mean_squared + self.eps)?.sqrt()?)?;

        normalized
            .to_dtype(input_dtype)?
            .broadcast_mul(&self.weight.to_dtype(input_dtype)?)
    }
}
