/// Error returned by a user-supplied parser callback.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Recoverable error reported by the SSE and NDJSON parsers.
///
/// Parse errors never stop a parser: they are handed to the parser's
/// `on_error` callback and parsing continues with the next unit.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed JSON line `{preview}`: {source}")]
    Json {
        preview: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Pending buffer exceeded {limit} bytes; buffered input discarded")]
    BufferOverflow { limit: usize },
    #[error("Handler error: {0}")]
    Handler(HandlerError),
}

/// Terminal error of a stream.
///
/// Passed to [`crate::result::StreamHandle::set_error`] by provider drivers and
/// surfaced to every consumer awaiting the stream's result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Stream dropped before it settled")]
    Abandoned,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category, used by drivers to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    ServerError,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl StreamError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Upstream { status, .. } => category_from_upstream_status(*status),
            StreamError::Transport(_)
            | StreamError::Decode(_)
            | StreamError::Abandoned
            | StreamError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Whether a driver may reasonably retry the request that produced this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Transport(_) => true,
            StreamError::Upstream { .. } => matches!(
                self.category(),
                ErrorCategory::RateLimit | ErrorCategory::ServerError
            ),
            StreamError::Decode(_) | StreamError::Abandoned | StreamError::Internal(_) => false,
        }
    }
}

impl From<ParseError> for StreamError {
    fn from(err: ParseError) -> Self {
        StreamError::Decode(err.to_string())
    }
}
