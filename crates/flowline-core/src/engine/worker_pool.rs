//! Bounded-concurrency task pool for state processors.
//!
//! At most `thread_count` tasks run at once; up to `queue_size` more may wait
//! for a slot. The dispatcher sizes every poll by [`WorkerPool::remaining_capacity`]
//! so it never claims more instances than the pool can accept.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio_util::task::TaskTracker;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("worker pool is shut down")]
    ShutDown,

    #[error("worker pool queue is full ({0} tasks pending)")]
    Full(usize),
}

/// Cloneable handle to a shared pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    thread_count: usize,
    capacity: usize,
    slots: Arc<Semaphore>,
    /// Accepted tasks that have not completed (queued + running).
    pending: AtomicUsize,
    /// Start instant of every running task, keyed by task number.
    running: DashMap<u64, Instant>,
    next_task: AtomicU64,
    capacity_freed: Notify,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(thread_count: usize, queue_size: usize) -> Self {
        let thread_count = thread_count.max(1);
        Self {
            inner: Arc::new(PoolInner {
                thread_count,
                capacity: thread_count + queue_size,
                slots: Arc::new(Semaphore::new(thread_count)),
                pending: AtomicUsize::new(0),
                running: DashMap::new(),
                next_task: AtomicU64::new(0),
                capacity_freed: Notify::new(),
                tracker: TaskTracker::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.inner.thread_count
    }

    /// How many more tasks the pool accepts right now.
    pub fn remaining_capacity(&self) -> usize {
        if self.inner.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.inner
            .capacity
            .saturating_sub(self.inner.pending.load(Ordering::Acquire))
    }

    pub fn running_count(&self) -> usize {
        self.inner.running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner
            .pending
            .load(Ordering::Acquire)
            .saturating_sub(self.running_count())
    }

    /// Number of tasks that have been running for at least `threshold`.
    /// Advisory only; the pool never cancels a task.
    pub fn potentially_stuck(&self, threshold: Duration) -> usize {
        self.inner
            .running
            .iter()
            .filter(|entry| entry.value().elapsed() >= threshold)
            .count()
    }

    /// Accept a task. It starts once a slot is free.
    pub fn execute<F>(&self, task: F) -> Result<(), WorkerPoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(WorkerPoolError::ShutDown);
        }
        let pending = self.inner.pending.fetch_add(1, Ordering::AcqRel);
        if pending >= self.inner.capacity {
            self.inner.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(WorkerPoolError::Full(pending));
        }

        let inner = Arc::clone(&self.inner);
        let task_no = inner.next_task.fetch_add(1, Ordering::Relaxed);
        self.inner.tracker.spawn(async move {
            let _done = TaskGuard {
                inner: Arc::clone(&inner),
                task_no,
            };
            let Ok(_permit) = Arc::clone(&inner.slots).acquire_owned().await else {
                return;
            };
            inner.running.insert(task_no, Instant::now());
            task.await;
        });
        Ok(())
    }

    /// Wait until at least `n` tasks can be accepted or `deadline` passes.
    /// Returns whether the capacity is available.
    pub async fn wait_until_capacity_at_least(&self, n: usize, deadline: tokio::time::Instant) -> bool {
        loop {
            let notified = self.inner.capacity_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.remaining_capacity() >= n {
                return true;
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return false;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return self.remaining_capacity() >= n;
                }
            }
        }
    }

    /// Stop accepting tasks and wait up to `timeout` for accepted ones to
    /// finish. Returns `true` when the pool drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.tracker.close();
        self.inner.capacity_freed.notify_waiters();
        let drained = tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        if !drained {
            tracing::warn!(
                running = self.running_count(),
                "worker pool did not drain before shutdown timeout"
            );
        }
        drained
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Releases the task's bookkeeping on completion, including on panic.
struct TaskGuard {
    inner: Arc<PoolInner>,
    task_no: u64,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.inner.running.remove(&self.task_no);
        self.inner.pending.fetch_sub(1, Ordering::AcqRel);
        self.inner.capacity_freed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_capacity_counts_queue_and_threads() {
        let pool = WorkerPool::new(2, 3);
        assert_eq!(pool.thread_count(), 2);
        assert_eq!(pool.remaining_capacity(), 5);

        let (tx, rx) = oneshot::channel::<()>();
        let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));
        for _ in 0..5 {
            let rx = Arc::clone(&rx);
            pool.execute(async move {
                if let Some(rx) = rx.lock().await.take() {
                    let _ = rx.await;
                }
            })
            .unwrap();
        }
        assert_eq!(pool.remaining_capacity(), 0);
        assert_eq!(pool.execute(async {}), Err(WorkerPoolError::Full(5)));

        drop(tx);
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(pool.running_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_until_capacity_wakes_when_task_finishes() {
        let pool = WorkerPool::new(1, 0);
        let (tx, rx) = oneshot::channel::<()>();
        pool.execute(async move {
            let _ = rx.await;
        })
        .unwrap();
        assert_eq!(pool.remaining_capacity(), 0);

        let deadline = tokio::time::Instant::now() + Duration::from_millis(50);
        assert!(!pool.wait_until_capacity_at_least(1, deadline).await);

        tx.send(()).unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        assert!(pool.wait_until_capacity_at_least(1, deadline).await);
        assert_eq!(pool.remaining_capacity(), 1);
    }

    #[tokio::test]
    async fn test_potentially_stuck_reports_long_running_tasks() {
        let pool = WorkerPool::new(2, 0);
        let (tx, rx) = oneshot::channel::<()>();
        pool.execute(async move {
            let _ = rx.await;
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.running_count(), 1);
        assert_eq!(pool.potentially_stuck(Duration::from_millis(10)), 1);
        assert_eq!(pool.potentially_stuck(Duration::from_secs(60)), 0);

        tx.send(()).unwrap();
        assert!(pool.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_execute_after_shutdown_fails() {
        let pool = WorkerPool::new(1, 1);
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert_eq!(pool.execute(async {}), Err(WorkerPoolError::ShutDown));
        assert_eq!(pool.remaining_capacity(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_capacity() {
        let pool = WorkerPool::new(1, 0);
        pool.execute(async { panic!("handler blew up") }).unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        assert!(pool.wait_until_capacity_at_least(1, deadline).await);
    }
}
