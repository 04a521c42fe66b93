//! Errors raised while running operations and while wiring controllers.

use docintake_core::{ErrorCode, StreamError, Verb};

/// Failure of a single operation invocation.
///
/// Every variant maps to an envelope code via [`OperationError::code`].
/// Nothing here is fatal to the server: the caller reports it to the client
/// and keeps serving.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A failure the handler already classified.
    #[error("{cause}")]
    Tagged { code: ErrorCode, cause: String },

    #[error("invalid request: {cause}")]
    InvalidRequest { cause: String },

    #[error("dependency not provided: {type_name}")]
    MissingDependency { type_name: &'static str },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("operation panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    #[must_use]
    pub fn tagged(code: ErrorCode, cause: impl Into<String>) -> Self {
        Self::Tagged {
            code,
            cause: cause.into(),
        }
    }

    /// Envelope code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Stream(err) => err.code(),
            Self::Tagged { code, .. } => *code,
            Self::InvalidRequest { .. } => ErrorCode::UnableToParseRequest,
            Self::MissingDependency { .. } => ErrorCode::UnableToResolveDependency,
            Self::Transport(_) | Self::Panicked(_) | Self::Internal(_) => ErrorCode::Unidentified,
        }
    }

    /// Human-readable text for the envelope's `error.message`: the bare
    /// cause, since `code` already names the failure class.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Stream(err) => err.cause(),
            Self::Tagged { cause, .. } | Self::InvalidRequest { cause } => cause.clone(),
            Self::Transport(cause) | Self::Panicked(cause) => cause.clone(),
            Self::MissingDependency { type_name } => (*type_name).to_string(),
            Self::Internal(err) => format!("{err:#}"),
        }
    }
}

/// Controller wiring failure. Always raised before the server accepts traffic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("controller {controller}: GET and MESSAGE cannot share one url")]
    CollidingVerbs { controller: String },

    #[error("controller {controller}: verb {verb} registered twice")]
    DuplicateVerb { controller: String, verb: Verb },

    #[error("controller {controller}: HTTP and WebSocket operations cannot be mixed")]
    MixedTransports { controller: String },

    #[error("controller {controller}: verb {verb} does not match the operation's transport")]
    VerbTransportMismatch { controller: String, verb: Verb },

    #[error("controller {controller}: no operations registered")]
    NoOperations { controller: String },

    #[error("controller {controller}: already subscribed")]
    AlreadySubscribed { controller: String },

    #[error("schema {id} registered twice")]
    DuplicateSchema { id: String },

    #[error("schema {id}: {cause}")]
    Schema { id: String, cause: String },
}
