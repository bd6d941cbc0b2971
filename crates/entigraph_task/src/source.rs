//! Settling tasks from outside a callback.

use crate::error::TaskError;
use crate::task::{Outcome, Task};
use tracing::warn;

/// Producer side of a [`Task`].
///
/// Hand out [`TaskCompletionSource::task`] and settle it later, e.g. from
/// a callback-based API.
///
/// ```rust
/// use entigraph_task::TaskCompletionSource;
///
/// let source = TaskCompletionSource::new();
/// let task = source.task();
/// assert!(source.try_set_result(5));
/// assert!(!source.try_set_result(6));
/// assert_eq!(task.result(), Some(5));
/// ```
#[derive(Debug, Clone)]
pub struct TaskCompletionSource<T> {
    task: Task<T>,
}

impl<T> Default for TaskCompletionSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskCompletionSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a source with a pending task.
    #[must_use]
    pub fn new() -> Self {
        Self {
            task: Task::pending(),
        }
    }

    /// The task this source settles.
    pub fn task(&self) -> Task<T> {
        self.task.clone()
    }

    /// Settles with `value`. Returns false if already settled.
    pub fn try_set_result(&self, value: T) -> bool {
        self.task.settle(Outcome::Succeeded(value))
    }

    /// Settles with `error`. Returns false if already settled.
    pub fn try_set_error(&self, error: TaskError) -> bool {
        let outcome = match error {
            TaskError::Cancelled => Outcome::Cancelled,
            error => Outcome::Faulted(error),
        };
        self.task.settle(outcome)
    }

    /// Settles as cancelled. Returns false if already settled.
    pub fn try_set_cancelled(&self) -> bool {
        self.task.settle(Outcome::Cancelled)
    }

    /// Settles with `value`; a second settlement is logged and dropped.
    pub fn set_result(&self, value: T) {
        if !self.try_set_result(value) {
            warn!("completion source already settled, result dropped");
        }
    }

    /// Settles with `error`; a second settlement is logged and dropped.
    pub fn set_error(&self, error: TaskError) {
        if !self.try_set_error(error) {
            warn!("completion source already settled, error dropped");
        }
    }

    /// Settles as cancelled; a second settlement is logged and dropped.
    pub fn set_cancelled(&self) {
        if !self.try_set_cancelled() {
            warn!("completion source already settled, cancellation dropped");
        }
    }
}
