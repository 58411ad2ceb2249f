//! Error types for the batch generator

use llama_batch_model::error::is_out_of_memory_message;
use llama_batch_model::LlamaError;
use thiserror::Error;

/// Result type for batch generation operations
pub type BatchResult<T> = Result<T, BatchError>;

/// Main error type for batch generation
#[derive(Error, Debug)]
pub enum BatchError {
    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model identifier could not be resolved locally or on the hub
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Hub request failed for a reason other than a missing repository
    #[error("Hub error: {0}")]
    Hub(String),

    /// Tokenizer loading, encoding or decoding failed
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Model files were found but could not be turned into a model
    #[error("Model operation failed: {0}")]
    ModelLoadFailed(String),

    /// Device could not hold the weights or activations
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Requested compute device is unavailable
    #[error("Device error: {0}")]
    Device(String),

    /// Padded prompts leave no room under the length budget
    #[error("Input length of input_ids is {input_len}, but max_length is set to {max_length}")]
    PromptTooLong {
        /// Padded prompt length in tokens
        input_len: usize,
        /// Effective length budget, after clamping to the model context
        max_length: usize,
    },

    /// Forward pass or sampling failed
    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    /// Error raised by the model crate
    #[error("Model error: {0}")]
    Model(LlamaError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<LlamaError> for BatchError {
    fn from(err: LlamaError) -> Self {
        match err {
            LlamaError::OutOfMemory { operation, details } => {
                Self::OutOfMemory(format!("{operation}: {details}"))
            }
            other => Self::Model(other),
        }
    }
}

impl From<candle_core::Error> for BatchError {
    fn from(err: candle_core::Error) -> Self {
        let message = err.to_string();
        if is_out_of_memory_message(&message) {
            Self::OutOfMemory(message)
        } else {
            Self::InferenceFailed(format!("Candle error: {message}"))
        }
    }
}

/// Convert from validator errors
impl From<validator::ValidationErrors> for BatchError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = err
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error
                            .message
                            .as_ref()
                            .unwrap_or(&std::borrow::Cow::Borrowed("validation error"))
                    )
                })
            })
            .collect();
        messages.sort();

        Self::Configuration(messages.join(", "))
    }
}

/// Process exit status mapping
impl BatchError {
    /// Exit code for the process boundary (sysexits.h conventions)
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 64,
            Self::Tokenizer(_) | Self::PromptTooLong { .. } | Self::Serialization(_) => 65,
            Self::ModelNotFound(_) => 66,
            Self::Hub(_) | Self::Device(_) => 69,
            Self::OutOfMemory(_) => 71,
            Self::Io(_) => 74,
            Self::ModelLoadFailed(_) | Self::InferenceFailed(_) | Self::Model(_) => 70,
        }
    }

    /// Get user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => format!("Invalid configuration: {msg}"),
            Self::ModelNotFound(msg) => {
                format!("Could not resolve the model: {msg}. Check the model id and your Hugging Face access.")
            }
            Self::OutOfMemory(_) => {
                "Insufficient device memory to load or run the model.".to_string()
            }
            Self::Device(msg) => format!("Compute device unavailable: {msg}"),
            Self::Tokenizer(msg) => format!("Could not tokenize the prompts: {msg}"),
            Self::PromptTooLong { input_len, max_length } => format!(
                "Prompts are {input_len} tokens long but max_length is {max_length}; \
                 raise max_length or shorten the prompts."
            ),
            _ => self.to_string(),
        }
    }
}
