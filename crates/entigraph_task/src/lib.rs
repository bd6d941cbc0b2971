//! # Entigraph Task
//!
//! Task/continuation engine for Entigraph.
//!
//! A [`Task`] is a handle on a computation that settles exactly once as
//! succeeded, faulted or cancelled. Continuations registered on it run
//! exactly once at settlement, or right away when registered late.
//!
//! This crate provides:
//! - [`Task`] with `continue_with`, `on_success`, `on_error` and flattening
//!   `*_task` variants
//! - [`TaskCompletionSource`] for settling a task from the outside
//! - Executors: [`Immediate`], [`BackgroundPool`] and the cooperative
//!   [`ForegroundQueue`]
//!
//! ## Example
//!
//! ```rust
//! use entigraph_task::Task;
//!
//! let doubled = Task::for_result(21).on_success(|n| Ok(n * 2));
//! assert_eq!(doubled.result(), Some(42));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod executor;
mod source;
mod task;

pub use error::{TaskError, TaskResult};
pub use executor::{
    background, immediate, BackgroundPool, Executor, ForegroundQueue, Immediate, Job,
    MAX_INLINE_DEPTH,
};
pub use source::TaskCompletionSource;
pub use task::{Outcome, Task, TaskStatus};
