//! Fixtures shared by the integration tests: a word-level tokenizer, a tiny
//! random Llama checkpoint, and scripted model/provider stubs.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use llama_batch_inference::{
    BatchResult, CausalLm, GenerationDefaults, ModelProvider, PromptTokenizer,
};
use llama_batch_model::{LlamaConfig, LlamaModel};
use serde_json::{json, Map, Value};

pub const BOS: u32 = 0;
pub const EOS: u32 = 1;
pub const UNK: u32 = 2;

pub const WORDS: [&str; 19] = [
    "What", "is", "the", "capital", "of", "France?", "Explain", "theory", "relativity.", "How",
    "does", "quantum", "computing", "work?", "are", "benefits", "machine", "learning?", "Paris.",
];

pub const VOCAB_SIZE: usize = 3 + WORDS.len();

/// Token id of a vocabulary word
pub fn word(text: &str) -> u32 {
    let index = WORDS
        .iter()
        .position(|w| *w == text)
        .unwrap_or_else(|| panic!("{} is not in the test vocabulary", text));
    3 + index as u32
}

fn added_token(id: u32, content: &str) -> Value {
    json!({
        "id": id,
        "content": content,
        "single_word": false,
        "lstrip": false,
        "rstrip": false,
        "normalized": false,
        "special": true
    })
}

/// Whitespace word-level tokenizer that prepends `<|begin_of_text|>`
pub fn tokenizer_json() -> Value {
    let mut vocab = Map::new();
    vocab.insert("<|begin_of_text|>".to_string(), json!(BOS));
    vocab.insert("<|end_of_text|>".to_string(), json!(EOS));
    vocab.insert("<unk>".to_string(), json!(UNK));
    for w in WORDS {
        vocab.insert(w.to_string(), json!(word(w)));
    }

    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            added_token(BOS, "<|begin_of_text|>"),
            added_token(EOS, "<|end_of_text|>")
        ],
        "normalizer": null,
        "pre_tokenizer": { "type": "WhitespaceSplit" },
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                { "SpecialToken": { "id": "<|begin_of_text|>", "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } }
            ],
            "pair": [
                { "SpecialToken": { "id": "<|begin_of_text|>", "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } },
                { "Sequence": { "id": "B", "type_id": 1 } }
            ],
            "special_tokens": {
                "<|begin_of_text|>": {
                    "id": "<|begin_of_text|>",
                    "ids": [BOS],
                    "tokens": ["<|begin_of_text|>"]
                }
            }
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "<unk>"
        }
    })
}

/// Write `tokenizer.json` and, if given, `tokenizer_config.json` into `dir`
pub fn write_tokenizer(dir: &Path, tokenizer_config: Option<Value>) {
    fs::write(dir.join("tokenizer.json"), tokenizer_json().to_string()).unwrap();
    if let Some(config) = tokenizer_config {
        fs::write(dir.join("tokenizer_config.json"), config.to_string()).unwrap();
    }
}

pub fn load_tokenizer(dir: &Path) -> PromptTokenizer {
    let config = dir.join("tokenizer_config.json");
    PromptTokenizer::from_files(
        &dir.join("tokenizer.json"),
        config.is_file().then_some(config.as_path()),
    )
    .unwrap()
}

fn checkpoint_config() -> Value {
    json!({
        "architectures": ["LlamaForCausalLM"],
        "bos_token_id": BOS,
        "eos_token_id": EOS,
        "hidden_size": 32,
        "intermediate_size": 48,
        "max_position_embeddings": 64,
        "num_attention_heads": 4,
        "num_hidden_layers": 2,
        "num_key_value_heads": 2,
        "rms_norm_eps": 1e-5,
        "rope_scaling": {
            "factor": 8.0,
            "low_freq_factor": 1.0,
            "high_freq_factor": 4.0,
            "original_max_position_embeddings": 16,
            "rope_type": "llama3"
        },
        "rope_theta": 500000.0,
        "tie_word_embeddings": false,
        "vocab_size": VOCAB_SIZE
    })
}

/// Write a complete tiny checkpoint (config, random weights, tokenizer) into `dir`
pub fn write_checkpoint(dir: &Path) {
    let json = checkpoint_config();
    fs::write(dir.join("config.json"), json.to_string()).unwrap();

    let config = LlamaConfig::from_json_value(json).unwrap();
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    LlamaModel::new(&config, vb).unwrap();
    for (name, var) in varmap.data().lock().unwrap().iter() {
        if name.ends_with("norm.weight") {
            var.set(&Tensor::ones(var.dims(), DType::F32, &device).unwrap())
                .unwrap();
        }
    }
    varmap.save(dir.join("model.safetensors")).unwrap();

    write_tokenizer(dir, Some(json!({ "eos_token": "<|end_of_text|>" })));
}

/// Emits `script[k]` for every row on the k-th forward call, repeating the
/// last entry once the script runs out.
pub struct ScriptedLm {
    device: Device,
    script: Vec<u32>,
    calls: usize,
    cached: usize,
    eos: Vec<u32>,
}

impl ScriptedLm {
    pub fn new(script: Vec<u32>) -> Self {
        Self {
            device: Device::Cpu,
            script,
            calls: 0,
            cached: 0,
            eos: vec![EOS],
        }
    }
}

impl CausalLm for ScriptedLm {
    fn device(&self) -> &Device {
        &self.device
    }

    fn max_context_length(&self) -> usize {
        64
    }

    fn eos_token_ids(&self) -> &[u32] {
        &self.eos
    }

    fn clear_kv_cache(&mut self) {
        self.calls = 0;
        self.cached = 0;
    }

    fn forward(
        &mut self,
        input_ids: &Tensor,
        _positions: &Tensor,
        attention_mask: &Tensor,
    ) -> BatchResult<Tensor> {
        let (batch, seq_len) = input_ids.dims2()?;
        assert_eq!(attention_mask.dims2()?, (batch, self.cached + seq_len));
        self.cached += seq_len;

        let token = self.script[self.calls.min(self.script.len() - 1)] as usize;
        self.calls += 1;

        let mut logits = vec![0f32; batch * VOCAB_SIZE];
        for row in 0..batch {
            logits[row * VOCAB_SIZE + token] = 10.0;
        }
        Ok(Tensor::from_vec(logits, (batch, VOCAB_SIZE), &self.device)?)
    }
}

/// Serves the fixture tokenizer from `dir` and a [`ScriptedLm`]
pub struct ScriptedProvider {
    pub dir: PathBuf,
    pub script: Vec<u32>,
    pub defaults: GenerationDefaults,
}

impl ScriptedProvider {
    pub fn new(dir: &Path, script: Vec<u32>) -> Self {
        write_tokenizer(dir, None);
        Self {
            dir: dir.to_path_buf(),
            script,
            defaults: GenerationDefaults::greedy(),
        }
    }
}

impl ModelProvider for ScriptedProvider {
    type Model = ScriptedLm;

    fn load_tokenizer(&self, _model_id: &str) -> BatchResult<PromptTokenizer> {
        Ok(load_tokenizer(&self.dir))
    }

    fn load_model(&self, _model_id: &str, device: &Device) -> BatchResult<ScriptedLm> {
        assert!(device.is_cpu());
        Ok(ScriptedLm::new(self.script.clone()))
    }

    fn generation_defaults(&self, _model_id: &str) -> BatchResult<GenerationDefaults> {
        Ok(self.defaults.clone())
    }
}

/// Fails the test if anything is loaded
pub struct UnreachableProvider;

impl ModelProvider for UnreachableProvider {
    type Model = ScriptedLm;

    fn load_tokenizer(&self, _model_id: &str) -> BatchResult<PromptTokenizer> {
        panic!("tokenizer should not be loaded");
    }

    fn load_model(&self, _model_id: &str, _device: &Device) -> BatchResult<ScriptedLm> {
        panic!("model should not be loaded");
    }
}
