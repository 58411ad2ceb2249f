//! # Llama Batch Model
//!
//! A Llama 3.x causal language model on candle, built for batched generation
//! over left-padded prompts.
//!
//! ## Key Features
//!
//! - Hugging Face checkpoint layout, loaded from memory-mapped SafeTensors shards
//! - Llama 3.1 RoPE frequency scaling
//! - Grouped-query attention with a per-layer KV cache
//! - Per-row position ids and padding-aware attention masks
//!
//! ## Architecture
//!
//! - `config`: model hyper-parameters parsed from `config.json`
//! - `rope`: rotary position embedding
//! - `normalization`: RMSNorm
//! - `attention`: grouped-query attention and mask construction
//! - `feed_forward`: SwiGLU network
//! - `transformer_block`: one decoder layer
//! - `model`: the complete model
//! - `loader`: checkpoint discovery and weight loading

pub mod attention;
pub mod config;
pub mod error;
pub mod feed_forward;
pub mod loader;
pub mod model;
pub mod normalization;
pub mod rope;
pub mod transformer_block;

// Re-export key types for convenience
pub use attention::{attention_bias, MultiHeadAttention};
pub use config::{LlamaConfig, RopeScaling};
pub use error::{LlamaError, Result};
pub use feed_forward::FeedForward;
pub use loader::ModelLoader;
pub use model::LlamaModel;
pub use normalization::RMSNorm;
pub use rope::{apply_rotary_emb, RotaryEmbedding};
pub use transformer_block::TransformerBlock;

/// Version information for the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
