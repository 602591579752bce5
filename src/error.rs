//! Error taxonomy for the support subsystem.
//!
//! Upload-side failures ([`SupportError::UnsupportedFormat`],
//! [`SupportError::ExtractionFailure`], storage errors) propagate to the
//! caller. Conversational failures are logged and absorbed by the
//! orchestrator's fallback chain, so they never reach the end user.
//!
//! An empty retrieval is not represented here: it is a valid
//! [`RetrievalResult`](crate::models::RetrievalResult) with
//! `has_context == false`.

use thiserror::Error;

/// Main error type for support operations.
#[derive(Error, Debug)]
pub enum SupportError {
    /// The uploaded file's extension has no extractor.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// A supported format could not be read.
    #[error("text extraction failed: {0}")]
    ExtractionFailure(String),

    /// Embeddings are disabled or the endpoint is unreachable.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The model asked for a function the catalog does not offer.
    #[error("unknown function: {0}")]
    FunctionUnknown(String),

    /// A catalog function failed while running its query.
    #[error("function {name} failed: {message}")]
    FunctionExecutionFailure { name: String, message: String },

    /// The completion endpoint could not be reached or answered badly.
    #[error("completion transport failure: {0}")]
    CompletionTransportFailure(String),

    /// Caller supplied a malformed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A referenced document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Database error.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Anything else raised by helper code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result alias for support operations.
pub type Result<T> = std::result::Result<T, SupportError>;

impl SupportError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SupportError::UnsupportedFormat(_) => "unsupported_format",
            SupportError::ExtractionFailure(_) => "extraction_failure",
            SupportError::EmbeddingUnavailable(_) => "embedding_unavailable",
            SupportError::FunctionUnknown(_) => "function_unknown",
            SupportError::FunctionExecutionFailure { .. } => "function_failure",
            SupportError::CompletionTransportFailure(_) => "completion_failure",
            SupportError::InvalidRequest(_) => "bad_request",
            SupportError::NotFound(_) => "not_found",
            SupportError::Storage(_) | SupportError::Other(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_display() {
        let err = SupportError::UnsupportedFormat(".exe".to_string());
        assert_eq!(err.to_string(), "unsupported file format: .exe");
        assert_eq!(err.code(), "unsupported_format");
    }

    #[test]
    fn function_failure_display() {
        let err = SupportError::FunctionExecutionFailure {
            name: "getProductsExpiringSoon".to_string(),
            message: "no such table: products".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "function getProductsExpiringSoon failed: no such table: products"
        );
    }

    #[test]
    fn anyhow_converts_to_other() {
        let err: SupportError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, SupportError::Other(_)));
        assert_eq!(err.code(), "internal");
        assert_eq!(err.to_string(), "boom");
    }
}
