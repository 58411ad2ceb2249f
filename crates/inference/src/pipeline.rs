//! End-to-end question answering over a batch of prompts

use std::fmt;
use std::io::Write;
use std::time::Instant;

use candle_transformers::generation::Sampling;
use tracing::info;
use validator::Validate;

use crate::config::{BatchConfig, DecodingMode};
use crate::error::{BatchError, BatchResult};
use crate::generator::{generate, GenerationParams};
use crate::hub::HubModelProvider;
use crate::traits::{CausalLm, ModelProvider};

/// A prompt and the model's decoded continuation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QaPair {
    /// The prompt as given
    pub question: String,
    /// Decoded output for the prompt's row, special tokens removed
    pub answer: String,
}

impl fmt::Display for QaPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Question: {}\nAnswer: {}\n\n", self.question, self.answer)
    }
}

/// Write every pair, in order
pub fn write_transcript<W: Write>(out: &mut W, pairs: &[QaPair]) -> BatchResult<()> {
    for pair in pairs {
        write!(out, "{}", pair)?;
    }
    out.flush()?;
    Ok(())
}

/// Loads a model through a [`ModelProvider`] and answers prompt batches
#[derive(Debug)]
pub struct BatchGenerator<P: ModelProvider> {
    provider: P,
    config: BatchConfig,
}

impl<P: ModelProvider> BatchGenerator<P> {
    /// Create a generator; fails if `config` does not validate
    pub fn new(provider: P, config: BatchConfig) -> BatchResult<Self> {
        config.validate()?;
        Ok(Self { provider, config })
    }

    /// Run configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Answer every prompt as one padded batch.
    ///
    /// The result has one pair per prompt, in prompt order. An empty prompt
    /// list returns immediately without loading anything.
    pub fn run<S: AsRef<str>>(&self, prompts: &[S]) -> BatchResult<Vec<QaPair>> {
        if prompts.is_empty() {
            info!("No prompts to answer");
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let model_id = self.config.model_id.as_str();

        let mut tokenizer = self.provider.load_tokenizer(model_id)?;
        tokenizer.set_pad_token_to_eos();
        let pad_token_id = tokenizer
            .pad_token_id()
            .ok_or_else(|| BatchError::Tokenizer("Pad token is not set".to_string()))?;

        let device = self.config.device.create_device()?;
        info!(model_id, device = ?device, "Loading model");
        let mut model = self.provider.load_model(model_id, &device)?;
        info!(elapsed_ms = start.elapsed().as_millis() as u64, "Model ready");

        let defaults = self.provider.generation_defaults(model_id)?;
        let sampling = match self.config.decoding {
            DecodingMode::ModelDefaults => defaults.sampling(),
            DecodingMode::Greedy => Sampling::ArgMax,
        };

        let pad_token_id = defaults.pad_token_id_or(pad_token_id);

        let mut eos_token_ids = defaults.eos_token_ids();
        if eos_token_ids.is_empty() {
            eos_token_ids = model.eos_token_ids().to_vec();
        }
        if eos_token_ids.is_empty() {
            eos_token_ids.push(tokenizer.eos_token_id());
        }

        let batch = tokenizer.encode_batch(prompts, model.max_context_length(), &device)?;
        info!(
            prompts = prompts.len(),
            padded_len = batch.seq_len(),
            "Encoded prompts"
        );

        let params = GenerationParams {
            max_length: self.config.max_length,
            pad_token_id,
            eos_token_ids,
            sampling,
            seed: self.config.seed,
        };
        let sequences = generate(&mut model, &batch, &params)?;

        let pairs = prompts
            .iter()
            .zip(&sequences)
            .map(|(prompt, ids)| {
                Ok(QaPair {
                    question: prompt.as_ref().to_string(),
                    answer: tokenizer.decode(ids, true)?,
                })
            })
            .collect::<BatchResult<Vec<_>>>()?;

        info!(
            answers = pairs.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch complete"
        );
        Ok(pairs)
    }
}

/// Answer `prompts` with the checkpoint named by `config`
pub fn run_batch<S: AsRef<str>>(prompts: &[S], config: BatchConfig) -> BatchResult<Vec<QaPair>> {
    let provider = HubModelProvider::from_config(&config);
    BatchGenerator::new(provider, config)?.run(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qa_pair_format() {
        let pair = QaPair {
            question: "What is the capital of France?".to_string(),
            answer: "What is the capital of France? Paris.".to_string(),
        };
        assert_eq!(
            pair.to_string(),
            "Question: What is the capital of France?\nAnswer: What is the capital of France? Paris.\n\n"
        );
    }

    #[test]
    fn test_transcript_keeps_order() {
        let pairs = vec![
            QaPair {
                question: "a".to_string(),
                answer: "1".to_string(),
            },
            QaPair {
                question: "b".to_string(),
                answer: "2".to_string(),
            },
        ];
        let mut out = Vec::new();
        write_transcript(&mut out, &pairs).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Question: a\nAnswer: 1\n\nQuestion: b\nAnswer: 2\n\n"
        );
    }

    #[test]
    fn test_run_batch_with_no_prompts() {
        let prompts: [&str; 0] = [];
        let config = BatchConfig {
            model_id: "/nonexistent/model".to_string(),
            ..BatchConfig::default()
        };
        assert!(run_batch(&prompts, config).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = BatchConfig {
            max_length: 0,
            ..BatchConfig::default()
        };
        let err = BatchGenerator::new(HubModelProvider::new("main", None), config).unwrap_err();
        assert_eq!(err.exit_code(), 64);
    }
}
