//! Cross-thread behavior of task chains.

use entigraph_task::{
    background, BackgroundPool, ForegroundQueue, Task, TaskCompletionSource, TaskError,
    TaskStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, PartialEq)]
struct QuotaExceeded(u32);

impl std::fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "quota exceeded after {} requests", self.0)
    }
}

impl std::error::Error for QuotaExceeded {}

#[test]
fn background_chain_settles() {
    let task = Task::call_in_background(|| Ok(20))
        .on_success(|n| Ok(n + 1))
        .on_success_task(|n| Task::call_in_background(move || Ok(n * 2)));
    assert_eq!(task.wait_timeout(Duration::from_secs(5)).unwrap(), 42);
}

#[test]
fn typed_error_survives_the_chain() {
    let task: Task<u32> = Task::call_in_background(|| Err(TaskError::new(QuotaExceeded(3))))
        .on_success(|n: u32| Ok(n + 1))
        .continue_with(|t| t.wait_for_completion());
    let err = task.wait_timeout(Duration::from_secs(5)).unwrap_err();
    assert_eq!(err.downcast_ref::<QuotaExceeded>(), Some(&QuotaExceeded(3)));
}

#[test]
fn continuations_registered_from_many_threads_each_run_once() {
    let source = TaskCompletionSource::<u32>::new();
    let task = source.task();
    let runs = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let task = task.clone();
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                task.continue_with(move |_| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        })
        .collect();

    let settler = {
        let source = source.clone();
        thread::spawn(move || source.set_result(1))
    };

    let continuations: Vec<Task<()>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    settler.join().unwrap();
    for c in &continuations {
        c.wait_timeout(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 8);
}

#[test]
fn foreground_continuations_wait_for_drain() {
    let queue = Arc::new(ForegroundQueue::new());
    let task = Task::for_result(5).on_success_on(queue.clone(), |n| Ok(n * 3));
    assert_eq!(task.status(), TaskStatus::Pending);
    queue.run_until_idle();
    assert_eq!(task.result(), Some(15));
}

#[test]
fn background_result_delivered_to_foreground() {
    let queue = Arc::new(ForegroundQueue::new());
    let task = Task::call_in_background(|| Ok("payload")).continue_with_on(queue.clone(), |t| {
        assert!(ForegroundQueue::is_current_thread());
        t.result().ok_or(TaskError::Cancelled)
    });

    let mut spins = 0;
    while !task.is_completed() && spins < 500 {
        queue.run_until_idle();
        thread::sleep(Duration::from_millis(2));
        spins += 1;
    }
    assert_eq!(task.result(), Some("payload"));
}

#[test]
fn dedicated_pool_executes_chain() {
    let pool = Arc::new(BackgroundPool::with_threads("chain-test", 2).unwrap());
    let task = Task::call_on(pool.clone(), || Ok(1)).on_success_on(pool, |n| Ok(n + 1));
    assert_eq!(task.wait_timeout(Duration::from_secs(5)).unwrap(), 2);
}

#[test]
fn when_all_over_background_work() {
    let tasks: Vec<Task<usize>> = (0..16)
        .map(|i| Task::call_on(background(), move || Ok(i * i)))
        .collect();
    let all = Task::when_all(tasks);
    let squares = all.wait_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(squares, (0..16).map(|i| i * i).collect::<Vec<_>>());
}

#[test]
fn long_inline_chain_completes() {
    let mut task = Task::for_result(0usize);
    for _ in 0..200 {
        task = task.on_success(|n| Ok(n + 1));
    }
    assert_eq!(task.wait_timeout(Duration::from_secs(5)).unwrap(), 200);
}
