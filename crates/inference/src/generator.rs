//! Batched autoregressive generation
//!
//! One prefill pass over the left-padded prompts, then one token per row per
//! step against the model's KV cache. Rows that emit a stop token keep
//! receiving the pad token until every row is done or the length budget
//! runs out.

use std::time::Instant;

use candle_core::Tensor;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use tracing::{debug, info, warn};

use crate::error::{BatchError, BatchResult};
use crate::tokenizer::EncodedBatch;
use crate::traits::CausalLm;

/// Parameters for one call to [`generate`]
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Maximum total row length, prompt and padding included
    pub max_length: usize,
    /// Token appended to rows that already finished
    pub pad_token_id: u32,
    /// Any of these ends a row
    pub eos_token_ids: Vec<u32>,
    /// Token selection strategy
    pub sampling: Sampling,
    /// Seed for sampled decoding
    pub seed: u64,
}

/// Generate continuations for every row of `batch`.
///
/// Returns the full sequences (prompt first, padding included) in row order.
pub fn generate<M: CausalLm + ?Sized>(
    model: &mut M,
    batch: &EncodedBatch,
    params: &GenerationParams,
) -> BatchResult<Vec<Vec<u32>>> {
    let batch_size = batch.batch_size();
    if batch_size == 0 {
        return Ok(Vec::new());
    }

    let mut sequences = batch.input_ids.to_vec2::<u32>()?;
    let mut mask = batch.attention_mask.to_vec2::<u32>()?;
    let prompt_len = batch.seq_len();

    let context = model.max_context_length();
    let max_length = if params.max_length > context {
        warn!(
            max_length = params.max_length,
            context, "Length budget exceeds the model context, clamping"
        );
        context
    } else {
        params.max_length
    };

    if prompt_len >= max_length {
        return Err(BatchError::PromptTooLong {
            input_len: prompt_len,
            max_length,
        });
    }
    let max_new_tokens = max_length - prompt_len;

    let device = model.device().clone();
    let mut processor = LogitsProcessor::from_sampling(params.seed, params.sampling.clone());

    // Positions count real tokens only, so padding never shifts a row.
    let mut next_position: Vec<u32> = Vec::with_capacity(batch_size);
    let mut step_positions = Vec::with_capacity(batch_size * prompt_len);
    for row in &mask {
        let mut seen = 0u32;
        for &keep in row {
            if keep != 0 {
                step_positions.push(seen);
                seen += 1;
            } else {
                step_positions.push(1);
            }
        }
        next_position.push(seen);
    }
    let mut step_ids: Vec<u32> = sequences.concat();
    let mut step_len = prompt_len;

    let mut finished = vec![false; batch_size];
    let mut generated = 0usize;

    model.clear_kv_cache();
    let start = Instant::now();
    info!(batch_size, prompt_len, max_new_tokens, "Starting generation");

    for step in 0..max_new_tokens {
        let input_ids = Tensor::from_vec(step_ids, (batch_size, step_len), &device)?;
        let positions = Tensor::from_vec(step_positions, (batch_size, step_len), &device)?;
        let mask_width = mask.first().map_or(0, Vec::len);
        let attention_mask = Tensor::from_vec(mask.concat(), (batch_size, mask_width), &device)?;

        let logits = model.forward(&input_ids, &positions, &attention_mask)?;

        let mut next_ids = Vec::with_capacity(batch_size);
        let mut next_positions = Vec::with_capacity(batch_size);
        for row in 0..batch_size {
            let token = if finished[row] {
                params.pad_token_id
            } else {
                let token = processor.sample(&logits.get(row)?)?;
                generated += 1;
                if params.eos_token_ids.contains(&token) {
                    finished[row] = true;
                }
                token
            };

            sequences[row].push(token);
            mask[row].push(1);
            next_ids.push(token);
            next_positions.push(next_position[row]);
            next_position[row] += 1;
        }

        if step == 0 {
            debug!(elapsed = ?start.elapsed(), "Prefill complete");
        }

        if finished.iter().all(|done| *done) {
            debug!(step, "Every row emitted a stop token");
            break;
        }

        step_ids = next_ids;
        step_positions = next_positions;
        step_len = 1;
    }

    let elapsed = start.elapsed();
    let tokens_per_second = generated as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        generated,
        elapsed_ms = elapsed.as_millis() as u64,
        tokens_per_second,
        "Generation complete"
    );

    model.clear_kv_cache();
    Ok(sequences)
}
