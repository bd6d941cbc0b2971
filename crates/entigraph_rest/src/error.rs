//! Error types for the REST layer.

use entigraph_core::CoreError;
use entigraph_task::TaskError;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Result type for REST operations.
pub type RestResult<T> = Result<T, RestError>;

/// Backend error codes the client reacts to.
pub mod codes {
    /// Unspecified failure inside the backend.
    pub const INTERNAL_SERVER_ERROR: i64 = 1;
    /// The backend could not be reached.
    pub const CONNECTION_FAILED: i64 = 100;
    /// No object with the requested id.
    pub const OBJECT_NOT_FOUND: i64 = 101;
    /// A pointer names no saved object.
    pub const INVALID_POINTER: i64 = 106;
    /// The request or response body is not valid JSON.
    pub const INVALID_JSON: i64 = 107;
    /// The request is not allowed.
    pub const OPERATION_FORBIDDEN: i64 = 119;
    /// The backend timed out.
    pub const TIMEOUT: i64 = 124;
    /// The batch request carries too many commands.
    pub const TOO_MANY_COMMANDS_IN_BATCH_REQUEST: i64 = 154;
}

/// Errors that can occur while talking to the backend.
#[derive(Error, Debug)]
pub enum RestError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// The backend answered with an error body.
    #[error("server error {code}: {message}")]
    Server {
        /// Backend error code.
        code: i64,
        /// Backend error message.
        message: String,
    },

    /// Malformed response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Entity graph error while building a request or applying a response.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A batch response has the wrong number of results.
    #[error("batch expected {expected} results but got {actual}")]
    BatchMismatch {
        /// Number of requests sent.
        expected: usize,
        /// Number of results received.
        actual: usize,
    },

    /// The request is not allowed for the entity's state.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The transport is not connected.
    #[error("not connected to backend")]
    NotConnected,
}

impl RestError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Builds a server error from a `{"code": .., "error": ..}` body.
    ///
    /// Missing fields fall back to [`codes::INTERNAL_SERVER_ERROR`] and a
    /// generic message.
    pub fn from_error_body(body: &JsonValue) -> Self {
        Self::Server {
            code: body
                .get("code")
                .and_then(JsonValue::as_i64)
                .unwrap_or(codes::INTERNAL_SERVER_ERROR),
            message: body
                .get("error")
                .and_then(JsonValue::as_str)
                .unwrap_or("error undefined by backend")
                .to_string(),
        }
    }

    /// Backend error code, if this is a server error.
    pub fn code(&self) -> Option<i64> {
        match self {
            RestError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RestError::Transport { retryable, .. } => *retryable,
            RestError::Timeout => true,
            RestError::Server { code, .. } => matches!(
                *code,
                codes::INTERNAL_SERVER_ERROR | codes::CONNECTION_FAILED | codes::TIMEOUT
            ),
            _ => false,
        }
    }
}

impl From<entigraph_codec::CodecError> for RestError {
    fn from(error: entigraph_codec::CodecError) -> Self {
        RestError::Core(CoreError::Codec(error))
    }
}

impl From<RestError> for TaskError {
    fn from(error: RestError) -> Self {
        TaskError::new(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retryable_errors() {
        assert!(RestError::transport_retryable("connection reset").is_retryable());
        assert!(!RestError::transport_fatal("bad certificate").is_retryable());
        assert!(RestError::Timeout.is_retryable());
        assert!(RestError::from_error_body(&json!({"code": 124, "error": "timeout"})).is_retryable());
        assert!(!RestError::from_error_body(&json!({"code": 101, "error": "not found"})).is_retryable());
        assert!(!RestError::NotConnected.is_retryable());
    }

    #[test]
    fn error_body_fallbacks() {
        let err = RestError::from_error_body(&json!({}));
        assert_eq!(err.code(), Some(codes::INTERNAL_SERVER_ERROR));
        assert!(err.to_string().contains("undefined"));
    }

    #[test]
    fn typed_error_survives_task_error() {
        let task_error = TaskError::from(RestError::Forbidden("no".into()));
        assert!(matches!(
            task_error.downcast_ref::<RestError>(),
            Some(RestError::Forbidden(_))
        ));
    }
}
