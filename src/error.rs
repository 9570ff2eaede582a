//! Error types for the ImmAgent store.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of asset that was missing, carrying the id that was looked up.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// A conversation snapshot could not be found.
    #[error("conversation not found: {0}")]
    Conversation(Uuid),
    /// A text asset referenced as a system prompt could not be found.
    #[error("system prompt not found: {0}")]
    SystemPrompt(Uuid),
    /// An agent version could not be found.
    #[error("agent not found: {0}")]
    Agent(Uuid),
    /// A message referenced by a conversation could not be found.
    #[error("message not found: {0}")]
    Message(Uuid),
}

/// Main error type for the store.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input rejected before any I/O was attempted.
    #[error("validation error on `{field}`: {message}")]
    Validation {
        /// Name of the offending field or argument.
        field: String,
        /// Human-readable description of what was wrong with it.
        message: String,
    },

    /// A referenced asset does not exist in the backend.
    #[error(transparent)]
    NotFound(#[from] NotFoundKind),

    /// The completion provider failed.
    #[error("LLM error ({}): {cause}", if *transient { "transient" } else { "permanent" })]
    Llm {
        /// Whether this failure was retried and is reported only after the retry budget was
        /// exhausted (`true`), or whether it was surfaced immediately as non-transient (`false`).
        transient: bool,
        /// Underlying cause, as reported by the provider.
        cause: String,
    },

    /// A tool invocation failed. The advance engine catches this per call and never lets
    /// it escape to the caller of `advance` — it becomes an `"Error: ..."` tool-result string.
    #[error("tool `{tool}` failed: {cause}")]
    ToolExecution {
        /// Name of the tool that was invoked.
        tool: String,
        /// Underlying failure reported by the tool provider.
        cause: String,
    },

    /// A relational constraint violation that escaped validation.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Connection acquisition failed within the pool's own timeout.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Any other database driver failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Create a new validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a permanent (non-retryable) LLM error.
    pub fn llm_permanent(cause: impl Into<String>) -> Self {
        Error::Llm {
            transient: false,
            cause: cause.into(),
        }
    }

    /// Create a transient LLM error (surfaced only after retries are exhausted).
    pub fn llm_transient(cause: impl Into<String>) -> Self {
        Error::Llm {
            transient: true,
            cause: cause.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool_execution(tool: impl Into<String>, cause: impl Into<String>) -> Self {
        Error::ToolExecution {
            tool: tool.into(),
            cause: cause.into(),
        }
    }

    /// Create an integrity error.
    pub fn integrity(detail: impl Into<String>) -> Self {
        Error::Integrity(detail.into())
    }

    /// Returns `true` for failures considered safe to retry with backoff (network hiccups,
    /// provider 5xx, rate limiting). Used by the LLM adapter's retry wrapper; persistence
    /// errors are never retried here since `save_bundle` is the only write and retrying it
    /// blindly could duplicate a turn's side effects before the transaction commits.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Llm { transient: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_validation() {
        let err = Error::validation("model", "must not be empty");
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(
            err.to_string(),
            "validation error on `model`: must not be empty"
        );
    }

    #[test]
    fn test_not_found_display() {
        let id = Uuid::nil();
        let err: Error = NotFoundKind::Agent(id).into();
        assert_eq!(err.to_string(), format!("agent not found: {id}"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::llm_transient("timeout").is_retryable());
        assert!(!Error::llm_permanent("invalid api key").is_retryable());
        assert!(!Error::validation("x", "y").is_retryable());
        assert!(!Error::tool_execution("clock", "boom").is_retryable());
    }

    #[test]
    fn test_tool_execution_message() {
        let err = Error::tool_execution("clock", "no such tool");
        assert_eq!(err.to_string(), "tool `clock` failed: no such tool");
    }
}
