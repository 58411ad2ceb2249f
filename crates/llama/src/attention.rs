//! Multi-Head Attention Implementation
//!
//! Grouped-query attention for Llama with a per-layer KV cache. Each forward
//! call appends the new keys and values to the cache, so the prompt is
//! processed once (prefill) and every later step only feeds the newest token.
//!
//! ## Masking
//!
//! Batches are left-padded. [`attention_bias`] turns the running attention
//! mask (`[batch, kv_len]`, 1 for real tokens) into an additive bias of shape
//! `[batch, 1, seq_len, kv_len]` that hides both future positions and padding.
//! Masked slots hold `f32::MIN` rather than `-inf` so a query whose every key
//! is padding still yields a finite softmax.
//!
//! Scores and softmax run in F32; the weights are cast back to the value
//! dtype before the final matmul.

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

use crate::{config::LlamaConfig, error::LlamaError, rope::apply_rotary_emb};

/// Multi-Head Attention with grouped key/value heads.
///
/// ## Memory Layout
///
/// - Query: `[batch, n_heads, seq_len, head_dim]`
/// - Key/Value (cached): `[batch, n_kv_heads, kv_len, head_dim]`
/// - Output: `[batch, seq_len, dim]`
#[derive(Debug)]
pub struct MultiHeadAttention {
    /// Number of attention heads
    n_heads: usize,
    /// Number of key-value heads (for GQA support)
    n_kv_heads: usize,
    /// Dimension of each attention head
    head_dim: usize,
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    /// Keys and values of every position seen since the last reset
    kv_cache: Option<(Tensor, Tensor)>,
}

impl MultiHeadAttention {
    /// Creates the attention layer from `self_attn.{q,k,v,o}_proj` weights.
    ///
    /// # Errors
    ///
    /// Fails if the head counts do not divide evenly or a projection weight
    /// is missing or has the wrong shape.
    pub fn new(config: &LlamaConfig, vb: VarBuilder) -> Result<Self> {
        if config.dim % config.n_heads != 0 {
            return Err(LlamaError::config_error(
                "dim",
                format!(
                    "Model dimension {} not divisible by number of heads {}",
                    config.dim, config.n_heads
                ),
            )
            .into());
        }

        let n_kv_heads = config.n_kv_heads();
        if config.n_heads % n_kv_heads != 0 {
            return Err(LlamaError::config_error(
                "n_kv_heads",
                format!(
                    "Number of heads {} not divisible by number of KV heads {}",
                    config.n_heads, n_kv_heads
                ),
            )
            .into());
        }

        let head_dim = config.head_dim();

        let q_proj = linear_no_bias(config.dim, config.n_heads * head_dim, vb.pp("q_proj"))?;
        let k_proj = linear_no_bias(config.dim, n_kv_heads * head_dim, vb.pp("k_proj"))?;
        let v_proj = linear_no_bias(config.dim, n_kv_heads * head_dim, vb.pp("v_proj"))?;
        let o_proj = linear_no_bias(config.n_heads * head_dim, config.dim, vb.pp("o_proj"))?;

        Ok(Self {
            n_heads: config.n_heads,
            n_kv_heads,
            head_dim,
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            kv_cache: None,
        })
    }

    /// Forward pass for `seq_len` new positions.
    ///
    /// * `x` - `[batch, seq_len, dim]`
    /// * `cos` / `sin` - rotary tables for the new positions
    /// * `bias` - additive mask from [`attention_bias`] covering cached and new keys
    pub fn forward(&mut self, x: &Tensor, cos: &Tensor, sin: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;

        let q = self
            .q_proj
            .forward(x)?
            .reshape((batch_size, seq_len, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((batch_size, seq_len, self.n_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((batch_size, seq_len, self.n_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let q = apply_rotary_emb(&q, cos, sin)?;
        let k = apply_rotary_emb(&k, cos, sin)?;

        let (k, v) = match &self.kv_cache {
            Some((cached_k, cached_v)) => (
                Tensor::cat(&[cached_k, &k], 2)?,
                Tensor::cat(&[cached_v, &v], 2)?,
            ),
            None => (k, v),
        };
        self.kv_cache = Some((k.clone(), v.clone()));

        let n_rep = self.n_heads / self.n_kv_heads;
        let k = repeat_kv(k, n_rep)?;
        let v = repeat_kv(v, n_rep)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? * scale)?.to_dtype(DType::F32)?;
        let scores = scores.broadcast_add(bias)?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?.to_dtype(v.dtype())?;

        let output = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.n_heads * self.head_dim))?;

        self.o_proj.forward(&output)
    }

    /// Number of positions currently held in the cache
    pub fn cached_len(&self) -> usize {
        self.kv_cache
            .as_ref()
            .and_then(|(k, _)| k.dim(2).ok())
            .unwrap_or(0)
    }

    /// Drop cached keys and values before a new batch
    pub fn clear_kv_cache(&mut self) {
        self.kv_cache = None;
    }
}

/// Expand `[batch, n_kv_heads, len, head_dim]` to `n_kv_heads * n_rep` heads.
fn repeat_kv(x: Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (batch_size, n_kv_heads, seq_len, head_dim) = x.dims4()?;
    x.unsqueeze(2)?
        .expand((batch_size, n_kv_heads, n_rep, seq_len, head_dim))?
        .reshape((batch_size, n_kv_heads * n_rep, seq_len, head_dim))
}

/// Build the additive attention bias for `seq_len` new queries.
///
/// `attention_mask` is `[batch, kv_len]` and covers every cached position
/// plus the new ones; the new queries occupy its last `seq_len` columns.
pub fn attention_bias(attention_mask: &Tensor, seq_len: usize, device: &Device) -> Result<Tensor> {
    let rows = attention_mask.to_dtype(DType::U32)?.to_vec2::<u32>()?;
    let batch_size = rows.len();
    let kv_len = rows.first().map_or(0, Vec::len);
    if seq_len > kv_len {
        return Err(LlamaError::dimension_error(
            "attention_bias",
            vec![batch_size, seq_len],
            vec![batch_size, kv_len],
        )
        .into());
    }
    let past_len = kv_len - seq_len;

    let mut bias = Vec::with_capacity(batch_size * seq_len * kv_len);
    for row in &rows {
        for query in 0..seq_len {
            let last_visible = past_len + query;
            bias.extend(row.iter().enumerate().map(|(key, &keep)| {
                if key <= last_visible && keep != 0 {
                    0.0f32
                } else {
                    f32::MIN
                }
            }));
        }
    }

    Tensor::from_vec(bias, (batch_size, 1, seq_len, kv_len), device)
}
