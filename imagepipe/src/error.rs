//! Error types for the image pipeline.
//!
//! Errors are categorized by the stage that produced them. Every error that
//! can reach a caller is `Clone` because a single stage failure is fanned out
//! to every subscriber of the failed task.

use thiserror::Error;

/// Failures reported by the transport collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be performed (connection, TLS, body read...)
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a response the pipeline refuses to use
    #[error("response rejected with status {status}")]
    Validation { status: u16 },

    /// The transfer finished without a single byte of payload
    #[error("response contained no data")]
    EmptyResponse,
}

/// Failures reported by the decoder collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodingError {
    /// The bytes do not look like any supported image format
    #[error("unsupported image format")]
    UnsupportedFormat,

    /// The format was recognized but the payload is corrupt or truncated
    #[error("failed to decode image: {0}")]
    Malformed(String),
}

/// A processor failed to transform an image.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("processor '{processor}' failed: {message}")]
pub struct ProcessingError {
    /// Identifier of the failing processor
    pub processor: String,
    /// Human readable failure description
    pub message: String,
}

impl ProcessingError {
    /// Creates a processing error for the given processor identifier.
    pub fn new(processor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            processor: processor.into(),
            message: message.into(),
        }
    }
}

/// Caller-visible outcome of a failed or cancelled task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Fetching the original bytes failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The fetched bytes could not be decoded
    #[error("decoding error: {0}")]
    Decoding(#[from] DecodingError),

    /// One of the request's processors failed
    #[error("processing error: {0}")]
    Processing(#[from] ProcessingError),

    /// The handle was cancelled. Never produced by a shared stage.
    #[error("task cancelled")]
    Cancelled,

    /// The pipeline was invalidated before or while the task was submitted
    #[error("pipeline invalidated")]
    PipelineInvalidated,

    /// The request only allowed cached data and none was found
    #[error("data not found in cache")]
    DataMissingInCache,

    /// A worker thread panicked or the runtime went away
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Returns true for the handle-local cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Validation { status: 404 };
        assert_eq!(err.to_string(), "response rejected with status 404");

        let err = PipelineError::from(TransportError::Request("timed out".into()));
        assert_eq!(err.to_string(), "transport error: request failed: timed out");
    }

    #[test]
    fn test_processing_error_display() {
        let err = PipelineError::from(ProcessingError::new("resize", "zero width"));
        assert_eq!(
            err.to_string(),
            "processing error: processor 'resize' failed: zero width"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(!PipelineError::PipelineInvalidated.is_cancelled());
        assert!(!PipelineError::from(DecodingError::UnsupportedFormat).is_cancelled());
    }

    #[test]
    fn test_errors_are_cloneable_for_fan_out() {
        let err = PipelineError::from(DecodingError::Malformed("eof".into()));
        let copies: Vec<_> = (0..3).map(|_| err.clone()).collect();
        assert!(copies.iter().all(|e| *e == err));
    }
}
