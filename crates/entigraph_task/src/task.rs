//! The task type and its continuations.

use crate::error::{TaskError, TaskResult};
use crate::executor::{background, immediate, Executor, ForegroundQueue, Job};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Observable lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, not started.
    Pending,
    /// Started, not settled.
    Running,
    /// Settled with a result.
    Succeeded,
    /// Settled with an error.
    Faulted,
    /// Cancelled before it started.
    Cancelled,
}

/// How a task settled.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// Result value.
    Succeeded(T),
    /// Failure.
    Faulted(TaskError),
    /// Cancelled before running.
    Cancelled,
}

impl<T> Outcome<T> {
    fn from_result(result: TaskResult<T>) -> Self {
        match result {
            Ok(value) => Outcome::Succeeded(value),
            Err(TaskError::Cancelled) => Outcome::Cancelled,
            Err(error) => Outcome::Faulted(error),
        }
    }

    /// Converts into a `Result`, mapping cancellation to
    /// [`TaskError::Cancelled`].
    pub fn into_result(self) -> TaskResult<T> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Faulted(error) => Err(error),
            Outcome::Cancelled => Err(TaskError::Cancelled),
        }
    }

    fn status(&self) -> TaskStatus {
        match self {
            Outcome::Succeeded(_) => TaskStatus::Succeeded,
            Outcome::Faulted(_) => TaskStatus::Faulted,
            Outcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

enum Progress<T> {
    Pending,
    Running,
    Settled(Outcome<T>),
}

struct State<T> {
    progress: Progress<T>,
    continuations: Vec<Job>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

/// A handle on a computation that settles exactly once.
///
/// Cloning a task clones the handle; every clone observes the same
/// settlement.
pub struct Task<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.inner.state.lock().progress {
            Progress::Pending => TaskStatus::Pending,
            Progress::Running => TaskStatus::Running,
            Progress::Settled(outcome) => outcome.status(),
        };
        f.debug_struct("Task").field("status", &status).finish()
    }
}

impl<T> Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn pending() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    progress: Progress::Pending,
                    continuations: Vec::new(),
                }),
                settled: Condvar::new(),
            }),
        }
    }

    fn settled(outcome: Outcome<T>) -> Self {
        let task = Self::pending();
        task.inner.state.lock().progress = Progress::Settled(outcome);
        task
    }

    /// A task that already succeeded with `value`.
    pub fn for_result(value: T) -> Self {
        Self::settled(Outcome::Succeeded(value))
    }

    /// A task that already faulted with `error`.
    pub fn for_error(error: TaskError) -> Self {
        Self::settled(Outcome::from_result(Err(error)))
    }

    /// A task that is already cancelled.
    pub fn cancelled() -> Self {
        Self::settled(Outcome::Cancelled)
    }

    /// Runs `f` on the default background pool.
    pub fn call_in_background<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        Self::call_on(background(), f)
    }

    /// Runs `f` on `executor`.
    pub fn call_on<F>(executor: Arc<dyn Executor>, f: F) -> Self
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        let task = Self::pending();
        let runner = task.clone();
        executor.execute(Box::new(move || runner.run(f)));
        task
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TaskStatus {
        match &self.inner.state.lock().progress {
            Progress::Pending => TaskStatus::Pending,
            Progress::Running => TaskStatus::Running,
            Progress::Settled(outcome) => outcome.status(),
        }
    }

    /// True once the task settled in any state.
    pub fn is_completed(&self) -> bool {
        matches!(self.inner.state.lock().progress, Progress::Settled(_))
    }

    /// True if the task faulted.
    pub fn is_faulted(&self) -> bool {
        self.status() == TaskStatus::Faulted
    }

    /// True if the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status() == TaskStatus::Cancelled
    }

    /// The settlement, if the task has settled.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match &self.inner.state.lock().progress {
            Progress::Settled(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// The result value, if the task succeeded.
    pub fn result(&self) -> Option<T> {
        match self.outcome()? {
            Outcome::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    /// The error, if the task faulted.
    pub fn error(&self) -> Option<TaskError> {
        match self.outcome()? {
            Outcome::Faulted(error) => Some(error),
            _ => None,
        }
    }

    /// Cancels the task if it has not started. Returns true if it did.
    ///
    /// Cancelling a running or settled task is a no-op.
    pub fn cancel(&self) -> bool {
        let continuations = {
            let mut state = self.inner.state.lock();
            if !matches!(state.progress, Progress::Pending) {
                return false;
            }
            state.progress = Progress::Settled(Outcome::Cancelled);
            std::mem::take(&mut state.continuations)
        };
        self.inner.settled.notify_all();
        for job in continuations {
            job();
        }
        true
    }

    /// Blocks until the task settles and returns its result.
    ///
    /// # Errors
    ///
    /// Returns the task's error, [`TaskError::Cancelled`], or
    /// [`TaskError::ForegroundWait`] when called while draining a
    /// [`ForegroundQueue`].
    pub fn wait_for_completion(&self) -> TaskResult<T> {
        if ForegroundQueue::is_current_thread() {
            return Err(TaskError::ForegroundWait);
        }
        let mut state = self.inner.state.lock();
        loop {
            if let Progress::Settled(outcome) = &state.progress {
                return outcome.clone().into_result();
            }
            self.inner.settled.wait(&mut state);
        }
    }

    /// Like [`Task::wait_for_completion`] but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Additionally returns [`TaskError::Timeout`] if the task is still
    /// unsettled when the timeout expires.
    pub fn wait_timeout(&self, timeout: Duration) -> TaskResult<T> {
        if ForegroundQueue::is_current_thread() {
            return Err(TaskError::ForegroundWait);
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Progress::Settled(outcome) = &state.progress {
                return outcome.clone().into_result();
            }
            if self.inner.settled.wait_until(&mut state, deadline).timed_out() {
                if let Progress::Settled(outcome) = &state.progress {
                    return outcome.clone().into_result();
                }
                return Err(TaskError::Timeout);
            }
        }
    }

    /// Runs `f` after this task settles, whatever the outcome.
    ///
    /// Runs inline on the settling thread, or right away if the task has
    /// already settled. Returning `Err(TaskError::Cancelled)` cancels the
    /// continuation; any other error faults it.
    pub fn continue_with<U, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Task<T>) -> TaskResult<U> + Send + 'static,
    {
        self.continue_with_on(immediate(), f)
    }

    /// [`Task::continue_with`] on a chosen executor.
    pub fn continue_with_on<U, F>(&self, executor: Arc<dyn Executor>, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Task<T>) -> TaskResult<U> + Send + 'static,
    {
        self.chain(executor, move |antecedent, next| next.run(move || f(antecedent)))
    }

    /// Runs `f` after this task settles and follows the task it returns.
    ///
    /// The returned task settles only once the inner task settles.
    pub fn continue_with_task<U, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Task<T>) -> Task<U> + Send + 'static,
    {
        self.continue_with_task_on(immediate(), f)
    }

    /// [`Task::continue_with_task`] on a chosen executor.
    pub fn continue_with_task_on<U, F>(&self, executor: Arc<dyn Executor>, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Task<T>) -> Task<U> + Send + 'static,
    {
        self.chain(executor, move |antecedent, next| {
            next.follow(move || f(antecedent));
        })
    }

    /// Runs `f` with the result if this task succeeds.
    ///
    /// Faults and cancellation are forwarded unchanged without calling `f`.
    pub fn on_success<U, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> TaskResult<U> + Send + 'static,
    {
        self.on_success_on(immediate(), f)
    }

    /// [`Task::on_success`] on a chosen executor.
    pub fn on_success_on<U, F>(&self, executor: Arc<dyn Executor>, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> TaskResult<U> + Send + 'static,
    {
        self.chain(executor, move |antecedent, next| match antecedent.outcome() {
            Some(Outcome::Succeeded(value)) => next.run(move || f(value)),
            Some(Outcome::Faulted(error)) => {
                next.settle(Outcome::Faulted(error));
            }
            _ => {
                next.settle(Outcome::Cancelled);
            }
        })
    }

    /// Runs `f` with the result if this task succeeds and follows the task
    /// it returns.
    pub fn on_success_task<U, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Task<U> + Send + 'static,
    {
        self.on_success_task_on(immediate(), f)
    }

    /// [`Task::on_success_task`] on a chosen executor.
    pub fn on_success_task_on<U, F>(&self, executor: Arc<dyn Executor>, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Task<U> + Send + 'static,
    {
        self.chain(executor, move |antecedent, next| match antecedent.outcome() {
            Some(Outcome::Succeeded(value)) => next.follow(move || f(value)),
            Some(Outcome::Faulted(error)) => {
                next.settle(Outcome::Faulted(error));
            }
            _ => {
                next.settle(Outcome::Cancelled);
            }
        })
    }

    /// Runs `f` with the error if this task faults, giving it a chance to
    /// recover. Success and cancellation are forwarded unchanged.
    pub fn on_error<F>(&self, f: F) -> Task<T>
    where
        F: FnOnce(TaskError) -> TaskResult<T> + Send + 'static,
    {
        self.on_error_on(immediate(), f)
    }

    /// [`Task::on_error`] on a chosen executor.
    pub fn on_error_on<F>(&self, executor: Arc<dyn Executor>, f: F) -> Task<T>
    where
        F: FnOnce(TaskError) -> TaskResult<T> + Send + 'static,
    {
        self.chain(executor, move |antecedent, next| match antecedent.outcome() {
            Some(Outcome::Faulted(error)) => next.run(move || f(error)),
            Some(outcome) => {
                next.settle(outcome);
            }
            None => {}
        })
    }

    /// A task that settles once every task in `tasks` has settled.
    ///
    /// Faults with the first error in input order if any task faulted,
    /// is cancelled if any was cancelled, and otherwise succeeds with the
    /// results in input order.
    pub fn when_all(tasks: Vec<Task<T>>) -> Task<Vec<T>> {
        if tasks.is_empty() {
            return Task::for_result(Vec::new());
        }
        let all = Task::pending();
        let remaining = Arc::new(AtomicUsize::new(tasks.len()));
        let tasks = Arc::new(tasks);
        for task in tasks.iter() {
            let all = all.clone();
            let remaining = Arc::clone(&remaining);
            let tasks = Arc::clone(&tasks);
            task.register(Box::new(move || {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    all.settle(combine(&tasks));
                }
            }));
        }
        all
    }

    /// Registers a job to run once at settlement. Runs it right away if
    /// the task has already settled.
    fn register(&self, job: Job) {
        let mut state = self.inner.state.lock();
        if matches!(state.progress, Progress::Settled(_)) {
            drop(state);
            job();
        } else {
            state.continuations.push(job);
        }
    }

    fn chain<U, F>(&self, executor: Arc<dyn Executor>, drive: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Task<T>, Task<U>) + Send + 'static,
    {
        let next = Task::<U>::pending();
        let antecedent = self.clone();
        let continuation = next.clone();
        self.register(Box::new(move || {
            executor.execute(Box::new(move || drive(antecedent, continuation)));
        }));
        next
    }

    /// Pending → Running. Fails if the task was cancelled meanwhile.
    fn try_start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if matches!(state.progress, Progress::Pending) {
            state.progress = Progress::Running;
            true
        } else {
            false
        }
    }

    fn run<F>(&self, f: F)
    where
        F: FnOnce() -> TaskResult<T>,
    {
        if !self.try_start() {
            return;
        }
        let outcome = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => Outcome::from_result(result),
            Err(payload) => Outcome::Faulted(panicked(payload)),
        };
        self.settle(outcome);
    }

    fn follow<F>(&self, f: F)
    where
        F: FnOnce() -> Task<T>,
    {
        if !self.try_start() {
            return;
        }
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(inner) => {
                let next = self.clone();
                let source = inner.clone();
                inner.register(Box::new(move || {
                    if let Some(outcome) = source.outcome() {
                        next.settle(outcome);
                    }
                }));
            }
            Err(payload) => {
                self.settle(Outcome::Faulted(panicked(payload)));
            }
        }
    }

    /// Settles the task and drains its continuations. Returns false if it
    /// had already settled.
    pub(crate) fn settle(&self, outcome: Outcome<T>) -> bool {
        let continuations = {
            let mut state = self.inner.state.lock();
            if matches!(state.progress, Progress::Settled(_)) {
                return false;
            }
            state.progress = Progress::Settled(outcome);
            std::mem::take(&mut state.continuations)
        };
        self.inner.settled.notify_all();
        for job in continuations {
            job();
        }
        true
    }
}

fn combine<T>(tasks: &[Task<T>]) -> Outcome<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let mut results = Vec::with_capacity(tasks.len());
    let mut cancelled = false;
    for task in tasks {
        match task.outcome() {
            Some(Outcome::Succeeded(value)) => results.push(value),
            Some(Outcome::Faulted(error)) => return Outcome::Faulted(error),
            Some(Outcome::Cancelled) | None => cancelled = true,
        }
    }
    if cancelled {
        Outcome::Cancelled
    } else {
        Outcome::Succeeded(results)
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> TaskError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    warn!(%message, "task callback panicked");
    TaskError::Panicked(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Immediate;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn for_result_is_succeeded() {
        let task = Task::for_result(42);
        assert_eq!(task.status(), TaskStatus::Succeeded);
        assert_eq!(task.result(), Some(42));
        assert!(task.is_completed());
    }

    #[test]
    fn continue_with_on_settled_task_runs_synchronously() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let next = Task::for_result(42).continue_with(move |t| {
            flag.store(true, Ordering::SeqCst);
            Ok(t.result().unwrap_or_default() + 1)
        });
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(next.result(), Some(43));
    }

    #[test]
    fn on_success_skips_faults() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let next = Task::<i32>::for_error(TaskError::message("bad")).on_success(move |n| {
            flag.store(true, Ordering::SeqCst);
            Ok(n)
        });
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(next.error().unwrap().to_string(), "bad");
    }

    #[test]
    fn on_error_recovers_and_skips_success() {
        let recovered = Task::<i32>::for_error(TaskError::message("bad")).on_error(|_| Ok(7));
        assert_eq!(recovered.result(), Some(7));

        let untouched = Task::for_result(1).on_error(|_| Ok(99));
        assert_eq!(untouched.result(), Some(1));
    }

    #[test]
    fn callback_error_faults_continuation() {
        let next: Task<i32> = Task::for_result(1).continue_with(|_| Err(TaskError::message("x")));
        assert!(next.is_faulted());
    }

    #[test]
    fn callback_panic_faults_continuation() {
        let next: Task<i32> = Task::for_result(1).on_success(|_| panic!("kaboom"));
        match next.error() {
            Some(TaskError::Panicked(message)) => assert_eq!(message, "kaboom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancel_only_before_start() {
        let task: Task<i32> = Task::pending();
        assert!(task.cancel());
        assert!(task.is_cancelled());
        assert!(!task.cancel());

        let done = Task::for_result(1);
        assert!(!done.cancel());
        assert_eq!(done.status(), TaskStatus::Succeeded);
    }

    #[test]
    fn cancelled_task_never_runs() {
        let queue = Arc::new(ForegroundQueue::new());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = Task::call_on(queue.clone(), move || {
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        });
        assert!(task.cancel());
        queue.run_until_idle();
        assert!(!ran.load(Ordering::SeqCst));
        assert!(task.is_cancelled());
    }

    #[test]
    fn continuation_registered_twice_runs_each_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let task: Task<i32> = Task::pending();
        for _ in 0..3 {
            let count = Arc::clone(&count);
            task.continue_with(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(task.settle(Outcome::Succeeded(5)));
        assert!(!task.settle(Outcome::Succeeded(6)));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(task.result(), Some(5));
    }

    #[test]
    fn continue_with_task_flattens() {
        let inner: Task<i32> = Task::pending();
        let handle = inner.clone();
        let outer = Task::for_result(()).continue_with_task(move |_| handle);
        assert_eq!(outer.status(), TaskStatus::Running);
        inner.settle(Outcome::Succeeded(9));
        assert_eq!(outer.result(), Some(9));
    }

    #[test]
    fn when_all_collects_in_order() {
        let a: Task<i32> = Task::pending();
        let b = Task::for_result(2);
        let all = Task::when_all(vec![a.clone(), b]);
        assert!(!all.is_completed());
        a.settle(Outcome::Succeeded(1));
        assert_eq!(all.result(), Some(vec![1, 2]));
    }

    #[test]
    fn when_all_reports_first_fault() {
        let all = Task::when_all(vec![
            Task::for_result(1),
            Task::for_error(TaskError::message("first")),
            Task::for_error(TaskError::message("second")),
        ]);
        assert_eq!(all.error().unwrap().to_string(), "first");

        let all = Task::when_all(vec![Task::for_result(1), Task::cancelled()]);
        assert!(all.is_cancelled());

        assert_eq!(Task::<i32>::when_all(Vec::new()).result(), Some(Vec::new()));
    }

    #[test]
    fn wait_on_foreground_thread_is_rejected() {
        let queue = Arc::new(ForegroundQueue::new());
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        queue.execute(Box::new(move || {
            *slot.lock() = Some(Task::<i32>::pending().wait_for_completion());
        }));
        queue.run_until_idle();
        assert!(matches!(
            seen.lock().take(),
            Some(Err(TaskError::ForegroundWait))
        ));
    }

    #[test]
    fn wait_timeout_expires() {
        let task: Task<i32> = Task::pending();
        assert!(matches!(
            task.wait_timeout(Duration::from_millis(10)),
            Err(TaskError::Timeout)
        ));
    }

    #[test]
    fn call_on_immediate_settles_inline() {
        let task = Task::call_on(Arc::new(Immediate), || Ok("done"));
        assert_eq!(task.result(), Some("done"));
    }
}
