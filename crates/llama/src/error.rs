//! Error types for the Llama model crate.
//!
//! Model construction, weight loading and forward passes all report through
//! [`LlamaError`]. Candle errors are folded into [`LlamaError::TensorError`]
//! unless they carry an allocation failure, which is surfaced separately so
//! callers can tell "the weights do not fit" apart from a broken checkpoint.

use thiserror::Error;

/// Result type alias for Llama operations
pub type Result<T> = std::result::Result<T, LlamaError>;

/// Error types for Llama operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlamaError {
    /// Tensor operation errors
    #[error("Tensor operation failed: {message}. Context: {context}")]
    TensorError { message: String, context: String },

    /// Configuration validation errors
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigError { field: String, reason: String },

    /// Device allocation failed while materializing weights or activations
    #[error("Out of device memory during {operation}: {details}")]
    OutOfMemory { operation: String, details: String },

    /// Dimension mismatch errors
    #[error("Dimension mismatch in {operation}: expected {expected:?}, got {actual:?}")]
    DimensionError {
        operation: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Checkpoint files missing or unreadable
    #[error("Model I/O error: {message} ({context})")]
    IoError { message: String, context: String },
}

impl LlamaError {
    /// Create a tensor error with context
    pub fn tensor_error(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::TensorError {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a configuration error
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigError {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an out-of-memory error
    pub fn out_of_memory(operation: impl Into<String>, details: impl Into<String>) -> Self {
        Self::OutOfMemory {
            operation: operation.into(),
            details: details.into(),
        }
    }

    /// Create a dimension mismatch error
    pub fn dimension_error(
        operation: impl Into<String>,
        expected: Vec<usize>,
        actual: Vec<usize>,
    ) -> Self {
        Self::DimensionError {
            operation: operation.into(),
            expected,
            actual,
        }
    }

    /// Create an I/O error
    pub fn io_error(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::IoError {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Wrap a candle error raised during `context`, keeping allocation
    /// failures distinguishable.
    pub fn from_candle(err: candle_core::Error, context: impl Into<String>) -> Self {
        let message = err.to_string();
        if is_out_of_memory_message(&message) {
            Self::out_of_memory(context, message)
        } else {
            Self::tensor_error(message, context)
        }
    }

    /// Whether this error reports a device allocation failure
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// Recognize the allocation failures candle and the CUDA driver report.
pub fn is_out_of_memory_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory")
        || lower.contains("cuda_error_out_of_memory")
        || lower.contains("failed to allocate")
        || lower.contains("cannot allocate memory")
}

impl From<candle_core::Error> for LlamaError {
    fn from(err: candle_core::Error) -> Self {
        LlamaError::from_candle(err, "candle tensor operation")
    }
}

impl From<LlamaError> for candle_core::Error {
    fn from(err: LlamaError) -> Self {
        candle_core::Error::Msg(err.to_string())
    }
}
