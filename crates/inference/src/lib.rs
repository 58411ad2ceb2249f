//! # llama-batch inference
//!
//! Batched question answering on top of [`llama_batch_model`]: resolve a
//! checkpoint locally or on the Hugging Face Hub, encode all prompts into one
//! left-padded batch, generate, and decode every row.
//!
//! ## Features
//!
//! - **Hub or local checkpoints**: sharded SafeTensors fetched through `hf-hub`
//! - **Device selection**: CUDA when available, CPU otherwise
//! - **Checkpoint decoding defaults**: `generation_config.json` sampling settings
//! - **Pluggable models**: [`ModelProvider`] and [`CausalLm`] for tests and alternates
//!
//! ## Usage
//!
//! ```rust,no_run
//! use llama_batch_inference::{run_batch, write_transcript, BatchConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let prompts = ["What is the capital of France?"];
//!     let pairs = run_batch(&prompts, BatchConfig::default())?;
//!     write_transcript(&mut std::io::stdout(), &pairs)?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::missing_const_for_fn,
    clippy::uninlined_format_args,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::needless_range_loop
)]

// Core modules
pub mod config;
pub mod device;
pub mod error;

// Model access
pub mod hub;
pub mod tokenizer;
pub mod traits;

// Generation
pub mod generator;
pub mod pipeline;
pub mod sampling;

pub use config::{BatchConfig, BatchConfigBuilder, DecodingMode};
pub use device::{compute_dtype, DeviceSelection};
pub use error::{BatchError, BatchResult};
pub use generator::{generate, GenerationParams};
pub use hub::{HubModelProvider, ModelRepository};
pub use pipeline::{run_batch, write_transcript, BatchGenerator, QaPair};
pub use sampling::GenerationDefaults;
pub use tokenizer::{EncodedBatch, PromptTokenizer};
pub use traits::{CausalLm, ModelProvider};

/// Current version of the inference crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Checkpoint answered with when no other model is configured
pub const DEFAULT_MODEL_ID: &str = "meta-llama/Meta-Llama-3.1-70B";

/// Maximum total sequence length, prompt included
pub const DEFAULT_MAX_LENGTH: usize = 200;
