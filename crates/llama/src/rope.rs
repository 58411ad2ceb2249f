//! Rotary Position Embedding (RoPE) with Llama 3 frequency scaling.
//!
//! Positions are supplied per row rather than as a shared offset, so a
//! left-padded batch can rotate every sequence from its own first real token.
//! Angles are computed in F32 and cast to the activation dtype afterwards.
//!
//! # Algorithm
//!
//! 1. `inverse_frequencies`: `theta^(-2i/d)` for each rotated pair, rescaled
//!    per the `llama3` rule when the checkpoint carries `rope_scaling`
//! 2. `RotaryEmbedding::cos_sin`: gather `cos(p * f)` / `sin(p * f)` for the
//!    position ids of the current step
//! 3. `apply_rotary_emb`: rotate the two halves of each head vector

use std::f32::consts::PI;

use candle_core::{DType, Device, Tensor, D};

use crate::config::{LlamaConfig, RopeScaling};
use crate::{LlamaError, Result};

/// Compute the RoPE inverse frequencies for one head.
///
/// With `llama3` scaling, each frequency is classified by its wavelength
/// against the original pre-training context: short wavelengths are kept,
/// long ones are divided by `factor`, and the band in between is linearly
/// interpolated.
pub fn inverse_frequencies(head_dim: usize, theta: f32, scaling: Option<&RopeScaling>) -> Vec<f32> {
    let base = (0..head_dim)
        .step_by(2)
        .map(|i| 1.0 / theta.powf(i as f32 / head_dim as f32));

    let Some(scaling) = scaling else {
        return base.collect();
    };

    let original = scaling.original_max_position_embeddings as f32;
    let low_freq_wavelen = original / scaling.low_freq_factor;
    let high_freq_wavelen = original / scaling.high_freq_factor;

    base.map(|freq| {
        let wavelen = 2.0 * PI / freq;
        if wavelen < high_freq_wavelen {
            freq
        } else if wavelen > low_freq_wavelen {
            freq / scaling.factor
        } else {
            let smooth = (original / wavelen - scaling.low_freq_factor)
                / (scaling.high_freq_factor - scaling.low_freq_factor);
            (1.0 - smooth) * freq / scaling.factor + smooth * freq
        }
    })
    .collect()
}

/// Rotary embedding state shared by every attention layer.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    /// `[head_dim / 2]` inverse frequencies in F32
    inv_freq: Tensor,
    max_seq_len: usize,
}

impl RotaryEmbedding {
    pub fn new(config: &LlamaConfig, device: &Device) -> Result<Self> {
        let head_dim = config.head_dim();
        if head_dim % 2 != 0 {
            return Err(LlamaError::config_error(
                "head_dim",
                format!("head dimension must be even for RoPE, got {}", head_dim),
            ));
        }

        let inv_freq = inverse_frequencies(head_dim, config.rope_theta, config.rope_scaling.as_ref());
        let inv_freq = Tensor::from_vec(inv_freq, head_dim / 2, device)?;

        Ok(Self {
            inv_freq,
            max_seq_len: config.max_seq_len,
        })
    }

    /// Cosine and sine tables for `positions` (`[batch, seq]`, u32).
    ///
    /// Both outputs have shape `[batch, 1, seq, head_dim / 2]` so they
    /// broadcast across heads.
    pub fn cos_sin(&self, positions: &Tensor, dtype: DType) -> Result<(Tensor, Tensor)> {
        let (batch_size, seq_len) = positions.dims2()?;
        let half = self.inv_freq.dim(0)?;

        let max_position = positions.flatten_all()?.max(0)?.to_scalar::<u32>()? as usize;
        if max_position >= self.max_seq_len {
            return Err(LlamaError::config_error(
                "position",
                format!(
                    "position {} exceeds context window {}",
                    max_position, self.max_seq_len
                ),
            ));
        }

        let angles = positions
            .to_dtype(DType::F32)?
            .reshape((batch_size, seq_len, 1))?
            .broadcast_mul(&self.inv_freq.reshape((1, 1, half))?)?;

        let cos = angles.cos()?.to_dtype(dtype)?.unsqueeze(1)?;
        let sin = angles.sin()?.to_dtype(dtype)?.unsqueeze(1)?;
        Ok((cos, sin))
    }
}

/// Apply rotary position embedding to a `[batch, heads, seq, head_dim]`
/// tensor using tables from [`RotaryEmbedding::cos_sin`].
///
/// ```text
/// x1' = x1 * cos(θ) - x2 * sin(θ)
/// x2' = x2 * cos(θ) + x1 * sin(θ)
/// ```
/// where `x1`/`x2` are the first and second halves of the head vector.
pub fn apply_rotary_emb(x: &Tensor, cos: &Tensor, sin: &Tensor) -> candle_core::Result<Tensor> {
    let head_dim = x.dim(D::Minus1)?;
    let half = head_dim / 2;

    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, half)?;

    let rotated_1 = (x1.broadcast_mul(cos)? - x2.broadcast_mul(sin)?)?;
    let rotated_2 = (x2.broadcast_mul(cos)? + x1.broadcast_mul(sin)?)?;

    Tensor::cat(&[rotated_1, rotated_2], D::Minus1)
}
