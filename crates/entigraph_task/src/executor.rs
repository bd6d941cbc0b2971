//! Execution contexts for tasks and continuations.

use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use tracing::warn;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Inline continuations nested deeper than this are moved to the
/// background pool.
pub const MAX_INLINE_DEPTH: usize = 15;

/// Runs jobs.
pub trait Executor: Send + Sync {
    /// Schedules `job`. Implementations may run it before returning.
    fn execute(&self, job: Job);
}

thread_local! {
    static INLINE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static ON_FOREGROUND: Cell<bool> = const { Cell::new(false) };
}

/// Runs jobs on the calling thread.
///
/// Once inline nesting reaches [`MAX_INLINE_DEPTH`] the job goes to the
/// default background pool instead, bounding stack growth on long
/// continuation chains.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Executor for Immediate {
    fn execute(&self, job: Job) {
        let depth = INLINE_DEPTH.with(Cell::get);
        if depth >= MAX_INLINE_DEPTH {
            background().execute(job);
            return;
        }
        INLINE_DEPTH.with(|d| d.set(depth + 1));
        job();
        INLINE_DEPTH.with(|d| d.set(depth));
    }
}

/// Unbounded pool for blocking network and codec work, backed by a tokio
/// runtime's blocking threads.
pub struct BackgroundPool {
    runtime: Option<tokio::runtime::Runtime>,
}

impl BackgroundPool {
    /// Builds a pool whose blocking threads are named `name`.
    ///
    /// `threads` bounds the runtime's core workers; blocking jobs get their
    /// own threads on demand.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn with_threads(name: &str, threads: usize) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(name)
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }
}

impl Executor for BackgroundPool {
    fn execute(&self, job: Job) {
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn_blocking(job);
            }
            None => ThreadPerJob.execute(job),
        }
    }
}

impl Drop for BackgroundPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for BackgroundPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPool")
            .field("running", &self.runtime.is_some())
            .finish()
    }
}

/// Spawns a thread per job. Used when no runtime could be started.
struct ThreadPerJob;

impl Executor for ThreadPerJob {
    fn execute(&self, job: Job) {
        spawn_or_inline(job, |job| {
            thread::Builder::new()
                .name("entigraph-task".into())
                .spawn(job)
                .map(drop)
        });
    }
}

/// Hands `job` to `spawn`, running it on the calling thread if spawning
/// fails.
fn spawn_or_inline(job: Job, spawn: impl FnOnce(Job) -> io::Result<()>) {
    let slot = Arc::new(Mutex::new(Some(job)));
    let remote = Arc::clone(&slot);
    let result = spawn(Box::new(move || {
        let job = remote.lock().take();
        if let Some(job) = job {
            job();
        }
    }));
    if let Err(e) = result {
        warn!(error = %e, "failed to spawn task thread, running job inline");
        let job = slot.lock().take();
        if let Some(job) = job {
            job();
        }
    }
}

/// Returns the process-wide background pool, starting it on first use.
pub fn background() -> Arc<dyn Executor> {
    static POOL: OnceLock<Arc<dyn Executor>> = OnceLock::new();
    POOL.get_or_init(|| {
        let threads = thread::available_parallelism().map_or(2, usize::from);
        match BackgroundPool::with_threads("entigraph-bg", threads) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                warn!(error = %e, "background runtime unavailable, using plain threads");
                Arc::new(ThreadPerJob)
            }
        }
    })
    .clone()
}

/// Returns a shared [`Immediate`] executor.
pub fn immediate() -> Arc<dyn Executor> {
    static IMMEDIATE: OnceLock<Arc<dyn Executor>> = OnceLock::new();
    IMMEDIATE.get_or_init(|| Arc::new(Immediate)).clone()
}

/// A single cooperative queue standing in for a UI/event-loop thread.
///
/// Jobs accumulate until the owning thread drains them with
/// [`ForegroundQueue::run_until_idle`]. Blocking waits on tasks fail with
/// [`crate::TaskError::ForegroundWait`] while the queue is being drained,
/// since the awaited work may itself be queued behind the caller.
#[derive(Default)]
pub struct ForegroundQueue {
    jobs: Mutex<VecDeque<Job>>,
    executed: AtomicUsize,
}

impl ForegroundQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs.
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Total number of jobs run so far.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    /// Runs queued jobs, including ones they enqueue, until the queue is
    /// empty. Returns how many jobs ran.
    pub fn run_until_idle(&self) -> usize {
        let previous = ON_FOREGROUND.with(|f| f.replace(true));
        let mut ran = 0;
        loop {
            let next = self.jobs.lock().pop_front();
            match next {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => break,
            }
        }
        ON_FOREGROUND.with(|f| f.set(previous));
        self.executed.fetch_add(ran, Ordering::Relaxed);
        ran
    }

    /// True while the current thread is draining a foreground queue.
    pub fn is_current_thread() -> bool {
        ON_FOREGROUND.with(Cell::get)
    }
}

impl Executor for ForegroundQueue {
    fn execute(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}

impl std::fmt::Debug for ForegroundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForegroundQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn failed_spawn_runs_job_inline() {
        let (tx, rx) = mpsc::channel();
        spawn_or_inline(Box::new(move || tx.send(7).unwrap()), |_| {
            Err(io::Error::other("thread limit reached"))
        });
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn thread_per_job_settles_tasks() {
        let (tx, rx) = mpsc::channel();
        ThreadPerJob.execute(Box::new(move || tx.send(3).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
    }

    #[test]
    fn immediate_runs_inline() {
        let (tx, rx) = mpsc::channel();
        Immediate.execute(Box::new(move || tx.send(1).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), 1);
    }

    #[test]
    fn background_runs_elsewhere() {
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();
        background().execute(Box::new(move || tx.send(thread::current().id()).unwrap()));
        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn dedicated_pool_runs_jobs() {
        let pool = BackgroundPool::with_threads("test-pool", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn foreground_queue_waits_for_drain() {
        let queue = Arc::new(ForegroundQueue::new());
        let (tx, rx) = mpsc::channel();
        let inner_queue = Arc::clone(&queue);
        queue.execute(Box::new(move || {
            assert!(ForegroundQueue::is_current_thread());
            let tx = tx.clone();
            inner_queue.execute(Box::new(move || tx.send("nested").unwrap()));
        }));
        assert_eq!(queue.pending(), 1);
        assert!(rx.try_recv().is_err());

        assert_eq!(queue.run_until_idle(), 2);
        assert_eq!(rx.try_recv().unwrap(), "nested");
        assert_eq!(queue.executed(), 2);
        assert!(!ForegroundQueue::is_current_thread());
    }

    #[test]
    fn deep_inline_nesting_moves_off_thread() {
        fn nest(level: usize, tx: mpsc::Sender<thread::ThreadId>) {
            if level == 0 {
                tx.send(thread::current().id()).unwrap();
                return;
            }
            Immediate.execute(Box::new(move || nest(level - 1, tx)));
        }

        let (tx, rx) = mpsc::channel();
        nest(MAX_INLINE_DEPTH + 2, tx);
        let leaf = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(leaf, thread::current().id());
    }
}
