//! Seams between the generation loop and concrete models

use candle_core::{Device, Tensor};
use llama_batch_model::LlamaModel;

use crate::error::BatchResult;
use crate::sampling::GenerationDefaults;
use crate::tokenizer::PromptTokenizer;

/// A decoder-only language model with an internal KV cache
pub trait CausalLm {
    /// Device the model's weights live on
    fn device(&self) -> &Device;

    /// Longest sequence the model accepts, prompt included
    fn max_context_length(&self) -> usize;

    /// Stop tokens from the model configuration
    fn eos_token_ids(&self) -> &[u32];

    /// Drop every cached key and value
    fn clear_kv_cache(&mut self);

    /// Run `input_ids` (`[batch, seq_len]`) through the model.
    ///
    /// `attention_mask` covers cached and new positions. Returns f32 logits
    /// of the last position of every row, `[batch, vocab]`.
    fn forward(
        &mut self,
        input_ids: &Tensor,
        positions: &Tensor,
        attention_mask: &Tensor,
    ) -> BatchResult<Tensor>;
}

impl CausalLm for LlamaModel {
    fn device(&self) -> &Device {
        LlamaModel::device(self)
    }

    fn max_context_length(&self) -> usize {
        self.config().max_seq_len
    }

    fn eos_token_ids(&self) -> &[u32] {
        &self.config().eos_token_ids
    }

    fn clear_kv_cache(&mut self) {
        LlamaModel::clear_kv_cache(self);
    }

    fn forward(
        &mut self,
        input_ids: &Tensor,
        positions: &Tensor,
        attention_mask: &Tensor,
    ) -> BatchResult<Tensor> {
        Ok(LlamaModel::forward(self, input_ids, positions, attention_mask)?)
    }
}

/// Source of tokenizers, models and generation defaults by model id
pub trait ModelProvider {
    /// Model type produced by this provider
    type Model: CausalLm;

    /// Load the tokenizer for `model_id`
    fn load_tokenizer(&self, model_id: &str) -> BatchResult<PromptTokenizer>;

    /// Load the model weights for `model_id` onto `device`
    fn load_model(&self, model_id: &str, device: &Device) -> BatchResult<Self::Model>;

    /// Decoding defaults shipped with the checkpoint
    fn generation_defaults(&self, _model_id: &str) -> BatchResult<GenerationDefaults> {
        Ok(GenerationDefaults::greedy())
    }
}
