//! Error taxonomy shared by both transports.
//!
//! [`ErrorCode`] is the value that crosses the system boundary in the
//! envelope's `error.code` field. [`StreamError`] and [`ReadError`] are the
//! typed failures of the streaming layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable failure code carried by an error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Opening the provider stream failed.
    UnableToCreateStream,
    /// A read from an opened stream failed after retries.
    UnableToConsumeStream,
    /// Sink construction failed.
    UnableToCreateSink,
    /// Rendering a prompt template failed.
    UnableToInvokeTemplate,
    /// The model answered with output that could not be parsed.
    UnableToParseLlmOutput,
    /// A multi-step extraction pipeline failed.
    UnableToExecuteLlmExtractionPipeline,
    /// The request body did not match the operation's request schema.
    UnableToParseRequest,
    /// A handler asked for a dependency the graph does not provide.
    UnableToResolveDependency,
    /// Uncategorized failure.
    Unidentified,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnableToCreateStream => "UNABLE_TO_CREATE_STREAM",
            Self::UnableToConsumeStream => "UNABLE_TO_CONSUME_STREAM",
            Self::UnableToCreateSink => "UNABLE_TO_CREATE_SINK",
            Self::UnableToInvokeTemplate => "UNABLE_TO_INVOKE_TEMPLATE",
            Self::UnableToParseLlmOutput => "UNABLE_TO_PARSE_LLM_OUTPUT",
            Self::UnableToExecuteLlmExtractionPipeline => {
                "UNABLE_TO_EXECUTE_LLM_EXTRACTION_PIPELINE"
            }
            Self::UnableToParseRequest => "UNABLE_TO_PARSE_REQUEST",
            Self::UnableToResolveDependency => "UNABLE_TO_RESOLVE_DEPENDENCY",
            Self::Unidentified => "UNIDENTIFIED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a provider's token reader.
///
/// The reader decides whether a failure is worth retrying; the consumer only
/// applies backoff to `Transient` failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// The read may succeed if attempted again (dropped connection, 5xx, ...).
    #[error("transient read failure: {0}")]
    Transient(String),
    /// The stream is unusable (malformed frame, protocol violation, ...).
    #[error("read failure: {0}")]
    Fatal(String),
}

impl ReadError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The underlying cause text without the classification prefix.
    #[must_use]
    pub fn cause(&self) -> &str {
        match self {
            Self::Transient(cause) | Self::Fatal(cause) => cause,
        }
    }
}

/// Typed failure of stream creation, consumption, or sink construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("unable to create stream: {cause}")]
    UnableToCreateStream { cause: String },

    #[error("unable to consume stream after {attempts} attempt(s): {cause}")]
    UnableToConsumeStream { cause: String, attempts: u32 },

    #[error("unable to create sink: {cause}")]
    UnableToCreateSink { cause: String },

    #[error("no token received within {timeout_ms}ms")]
    IdleTimeout { timeout_ms: u64 },

    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Envelope code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnableToCreateStream { .. } => ErrorCode::UnableToCreateStream,
            Self::UnableToCreateSink { .. } => ErrorCode::UnableToCreateSink,
            Self::UnableToConsumeStream { .. } | Self::IdleTimeout { .. } | Self::Cancelled => {
                ErrorCode::UnableToConsumeStream
            }
        }
    }

    /// Cause text, used as the envelope's `error.message`.
    #[must_use]
    pub fn cause(&self) -> String {
        match self {
            Self::UnableToCreateStream { cause }
            | Self::UnableToConsumeStream { cause, .. }
            | Self::UnableToCreateSink { cause } => cause.clone(),
            Self::IdleTimeout { .. } | Self::Cancelled => self.to_string(),
        }
    }
}
