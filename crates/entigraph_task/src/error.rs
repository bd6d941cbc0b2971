//! Error types for tasks.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type carried by faulted tasks.
pub type TaskResult<T> = Result<T, TaskError>;

/// Why a task did not succeed.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The computation returned an error.
    ///
    /// The source stays inspectable through [`TaskError::downcast_ref`].
    #[error("{0}")]
    Failed(Arc<dyn StdError + Send + Sync>),

    /// A callback panicked.
    #[error("task callback panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before it started running.
    #[error("task was cancelled")]
    Cancelled,

    /// A blocking wait was attempted on the foreground queue's thread.
    #[error("cannot block the foreground queue waiting for a task")]
    ForegroundWait,

    /// A bounded wait ran out before the task settled.
    #[error("timed out waiting for task")]
    Timeout,
}

impl TaskError {
    /// Wraps a typed error.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }

    /// Creates a failure from a plain message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Returns the wrapped error if it is of type `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            Self::Failed(error) => error.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns true for [`TaskError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}
