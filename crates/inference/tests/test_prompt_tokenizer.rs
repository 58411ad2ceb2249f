//! Batch encoding: left padding with the end-of-sequence token, truncation,
//! and decoding without special tokens.

mod common;

use candle_core::Device;
use common::{word, BOS, EOS};
use llama_batch_inference::BatchError;
use serde_json::json;
use tempfile::TempDir;

#[test]
fn test_pad_token_is_eos_and_padding_is_on_the_left() {
    let dir = TempDir::new().unwrap();
    common::write_tokenizer(dir.path(), Some(json!({ "eos_token": "<|end_of_text|>" })));
    let mut tokenizer = common::load_tokenizer(dir.path());

    assert_eq!(tokenizer.pad_token_id(), None);
    tokenizer.set_pad_token_to_eos();
    assert_eq!(tokenizer.pad_token_id(), Some(EOS));
    assert_eq!(tokenizer.eos_token(), "<|end_of_text|>");

    let batch = tokenizer
        .encode_batch(&["What is", "the capital of France?"], 64, &Device::Cpu)
        .unwrap();
    assert_eq!(batch.batch_size(), 2);
    assert_eq!(batch.seq_len(), 5);

    let ids = batch.input_ids.to_vec2::<u32>().unwrap();
    let mask = batch.attention_mask.to_vec2::<u32>().unwrap();
    assert_eq!(ids[0], vec![EOS, EOS, BOS, word("What"), word("is")]);
    assert_eq!(mask[0], vec![0, 0, 1, 1, 1]);
    assert_eq!(
        ids[1],
        vec![BOS, word("the"), word("capital"), word("of"), word("France?")]
    );
    assert_eq!(mask[1], vec![1, 1, 1, 1, 1]);
}

#[test]
fn test_encoding_without_pad_token_fails() {
    let dir = TempDir::new().unwrap();
    common::write_tokenizer(dir.path(), None);
    let mut tokenizer = common::load_tokenizer(dir.path());

    let err = tokenizer
        .encode_batch(&["What is", "the capital"], 64, &Device::Cpu)
        .unwrap_err();
    assert!(matches!(err, BatchError::Tokenizer(_)));
}

#[test]
fn test_long_prompts_are_truncated_to_the_context() {
    let dir = TempDir::new().unwrap();
    common::write_tokenizer(dir.path(), None);
    let mut tokenizer = common::load_tokenizer(dir.path());
    tokenizer.set_pad_token_to_eos();

    let batch = tokenizer
        .encode_batch(&["What is", "the capital of France?"], 3, &Device::Cpu)
        .unwrap();
    let ids = batch.input_ids.to_vec2::<u32>().unwrap();
    assert_eq!(ids[0], vec![BOS, word("What"), word("is")]);
    assert_eq!(ids[1], vec![BOS, word("the"), word("capital")]);
}

#[test]
fn test_tokenizer_limit_wins_when_smaller() {
    let dir = TempDir::new().unwrap();
    common::write_tokenizer(
        dir.path(),
        Some(json!({ "eos_token": "<|end_of_text|>", "model_max_length": 2 })),
    );
    let mut tokenizer = common::load_tokenizer(dir.path());
    tokenizer.set_pad_token_to_eos();

    let batch = tokenizer
        .encode_batch(&["the capital of France?"], 64, &Device::Cpu)
        .unwrap();
    assert_eq!(batch.seq_len(), 2);
}

#[test]
fn test_decode_skips_special_tokens() {
    let dir = TempDir::new().unwrap();
    common::write_tokenizer(dir.path(), None);
    let tokenizer = common::load_tokenizer(dir.path());

    let ids = [EOS, EOS, BOS, word("What"), word("is"), word("Paris."), EOS];
    assert_eq!(tokenizer.decode(&ids, true).unwrap(), "What is Paris.");
    assert!(tokenizer
        .decode(&ids, false)
        .unwrap()
        .contains("<|end_of_text|>"));
}

#[test]
fn test_eos_resolution() {
    let dir = TempDir::new().unwrap();

    // Object form from tokenizer_config.json
    common::write_tokenizer(
        dir.path(),
        Some(json!({ "eos_token": { "content": "<|begin_of_text|>", "special": true } })),
    );
    assert_eq!(common::load_tokenizer(dir.path()).eos_token_id(), BOS);

    // A configured token the vocabulary lacks falls back to the Llama defaults
    common::write_tokenizer(dir.path(), Some(json!({ "eos_token": "<|eot_id|>" })));
    assert_eq!(common::load_tokenizer(dir.path()).eos_token_id(), EOS);
}
