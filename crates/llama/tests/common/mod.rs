//! Tiny random Llama checkpoints for integration tests.

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use llama_batch_model::LlamaConfig;

pub fn tiny_config() -> LlamaConfig {
    let mut config = LlamaConfig::new(32, 2, 4, 64).unwrap();
    config.n_kv_heads = Some(2);
    config.intermediate_size = 48;
    config.max_seq_len = 256;
    config.norm_eps = 1e-5;
    config.eos_token_ids = vec![1];
    config.bos_token_id = Some(0);
    config
}

fn random(shape: (usize, usize), device: &Device) -> Tensor {
    (Tensor::randn(0f32, 1.0, shape, device).unwrap() * 0.2).unwrap()
}

/// Every tensor a checkpoint for `config` must contain, in HF naming.
pub fn random_weights(config: &LlamaConfig, device: &Device) -> HashMap<String, Tensor> {
    let head_dim = config.head_dim();
    let kv_dim = config.n_kv_heads() * head_dim;
    let mut tensors = HashMap::new();

    tensors.insert(
        "model.embed_tokens.weight".to_string(),
        random((config.vocab_size, config.dim), device),
    );
    for layer in 0..config.n_layers {
        let prefix = format!("model.layers.{}", layer);
        let shapes = [
            ("self_attn.q_proj", (config.dim, config.dim)),
            ("self_attn.k_proj", (kv_dim, config.dim)),
            ("self_attn.v_proj", (kv_dim, config.dim)),
            ("self_attn.o_proj", (config.dim, config.dim)),
            ("mlp.gate_proj", (config.intermediate_size, config.dim)),
            ("mlp.up_proj", (config.intermediate_size, config.dim)),
            ("mlp.down_proj", (config.dim, config.intermediate_size)),
        ];
        for (name, shape) in shapes {
            tensors.insert(format!("{}.{}.weight", prefix, name), random(shape, device));
        }
        for norm in ["input_layernorm", "post_attention_layernorm"] {
            tensors.insert(
                format!("{}.{}.weight", prefix, norm),
                Tensor::ones(config.dim, DType::F32, device).unwrap(),
            );
        }
    }
    tensors.insert(
        "model.norm.weight".to_string(),
        Tensor::ones(config.dim, DType::F32, device).unwrap(),
    );
    if !config.tie_word_embeddings {
        tensors.insert(
            "lm_head.weight".to_string(),
            random((config.vocab_size, config.dim), device),
        );
    }

    tensors
}
