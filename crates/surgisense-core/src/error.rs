//! Error taxonomy shared by the core and the application crate.
//!
//! Three classes of failure exist:
//!
//! | Class | Type | Surfaced as |
//! |-------|------|-------------|
//! | Caller input | [`InputError`] | 4xx with a readable message |
//! | External model / provider | [`UpstreamError`] | ingestion failure, or a degraded answer for `ask` |
//! | Setup | [`ConfigurationError`] | fatal at startup or construction |
//!
//! [`RagError`] is the union returned by the orchestrator's typed API.

use thiserror::Error;

/// Invalid caller-supplied input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("document contains no text")]
    EmptyDocument,
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("missing multipart field: {0}")]
    MissingField(&'static str),
    #[error("unsupported binary file format: {0}. Please upload a PDF or TXT.")]
    UnsupportedContent(String),
    #[error("PDF extraction failed: {0}")]
    MalformedPdf(String),
    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Failure of an external collaborator (embedding model, chat model,
/// speech or vision API).
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: &'static str,
        timeout_secs: u64,
    },
    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("{operation} request failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} returned an invalid response: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} is disabled")]
    Disabled { operation: &'static str },
}

impl UpstreamError {
    /// Name of the external operation that failed (e.g. `"embedding"`).
    pub fn operation(&self) -> &'static str {
        match self {
            UpstreamError::Timeout { operation, .. }
            | UpstreamError::Status { operation, .. }
            | UpstreamError::Transport { operation, .. }
            | UpstreamError::InvalidResponse { operation, .. }
            | UpstreamError::Disabled { operation } => operation,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    ///
    /// Timeouts, transport failures, HTTP 429 and HTTP 5xx are retryable;
    /// other statuses, malformed responses and disabled providers are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout { .. } | UpstreamError::Transport { .. } => true,
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::InvalidResponse { .. } | UpstreamError::Disabled { .. } => false,
        }
    }
}

/// Invalid setup detected at startup or construction time.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid chunking parameters: size={size}, overlap={overlap} (require size > 0 and overlap < size)")]
    InvalidChunking { size: usize, overlap: usize },
    #[error("environment variable {0} is not set")]
    MissingCredential(String),
    #[error("unknown {kind} provider: '{name}'")]
    UnknownProvider { kind: &'static str, name: String },
    #[error("{0}")]
    Invalid(String),
}

/// Errors raised while building or querying a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    #[error("embedding vectors must have at least one dimension")]
    ZeroDimension,
    #[error("vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("embedding count mismatch: {chunks} chunks but {vectors} vectors")]
    CountMismatch { chunks: usize, vectors: usize },
}

/// Union error type for the RAG orchestrator's typed operations.
#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl RagError {
    /// Short machine-readable kind used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Input(_) => "input",
            RagError::Upstream(UpstreamError::Timeout { .. }) => "upstream_timeout",
            RagError::Upstream(_) => "upstream",
            RagError::Configuration(_) => "configuration",
            RagError::Index(_) => "index",
        }
    }
}
