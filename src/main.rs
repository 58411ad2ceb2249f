//! # llama-batch
//!
//! Answers a fixed batch of questions with Llama 3.1 70B and prints each
//! question next to its answer.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --features cuda
//!
//! # More detail on stderr
//! RUST_LOG=debug cargo run --release
//! ```
//!
//! The model is fetched from the Hugging Face Hub on first use; gated
//! repositories need a token saved by `huggingface-cli login`. Answers go to
//! stdout, diagnostics to stderr.

use llama_batch_inference::{run_batch, write_transcript, BatchConfig, BatchResult};
use std::io;
use std::process;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const PROMPTS: [&str; 4] = [
    "Explain the theory of relativity.",
    "What is the capital of France?",
    "How does quantum computing work?",
    "What are the benefits of machine learning?",
];

fn main() {
    init_logging_basic();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        prompts = PROMPTS.len(),
        "Starting llama-batch"
    );

    if let Err(e) = run() {
        error!(error = %e, "Batch generation failed");
        eprintln!("Error: {}", e.user_message());
        process::exit(e.exit_code());
    }
}

fn run() -> BatchResult<()> {
    let config = BatchConfig::default();
    info!(
        model_id = %config.model_id,
        device = %config.device,
        max_length = config.max_length,
        "Configuration loaded"
    );

    let pairs = run_batch(&PROMPTS, config)?;
    write_transcript(&mut io::stdout().lock(), &pairs)
}

/// Logs go to stderr so stdout carries only the transcript.
fn init_logging_basic() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
}
