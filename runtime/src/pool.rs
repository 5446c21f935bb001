//! Fixed-width worker pool for batch passes.
//!
//! Workers pull items from a shared queue and run each one to completion
//! before taking the next. Results fan in over one channel, so they arrive
//! in completion order. Dispatch stops at the batch deadline or after a
//! fatal error; in-flight items always finish, and whatever is still queued
//! is reported back as timed out or aborted.
//!
//! The deadline is an absolute instant shared by every run of the pool, so a
//! command that runs several passes is bounded as a whole. A run started
//! after the deadline dispatches nothing.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use image_archive_core::error::{ArchiveError, Result};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Default number of concurrent workers.
pub const DEFAULT_WIDTH: usize = 10;

/// A unit of work dispatched to the pool.
pub trait WorkItem: Send + 'static {
    /// Identifier used in reports.
    fn id(&self) -> String;
}

/// Why dispatch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Running,
    Deadline,
    Fatal,
}

/// Everything a pool run produced.
#[derive(Debug)]
pub struct PoolRun<T> {
    /// Finished items, in completion order
    pub completed: Vec<(String, Result<T>)>,
    /// Items not dispatched before the deadline
    pub timed_out: Vec<String>,
    /// Items not dispatched after a fatal error
    pub aborted: Vec<String>,
}

/// Bounded worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    width: usize,
    deadline: Option<Instant>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH)
    }
}

impl WorkerPool {
    /// Create a pool with `width` workers (at least one) and no deadline.
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            deadline: None,
        }
    }

    /// Stop dispatching new items at `deadline`, across every run.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        self.with_deadline(timeout.map(|timeout| Instant::now() + timeout))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run `op` over every item.
    ///
    /// A fatal error (see [`ArchiveError::is_fatal`]) or a panicking item
    /// stops further dispatch.
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, op: F) -> PoolRun<T>
    where
        I: WorkItem,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = items.len();
        let workers = self.width.min(total);
        let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<_>>()));
        let (halt_tx, halt_rx) = watch::channel(Halt::Running);
        let halt_tx = Arc::new(halt_tx);
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let op = Arc::new(op);

        tracing::debug!(items = total, workers, "Starting worker pool");

        // Checked before any worker starts so a late run dispatches nothing
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now())
            && halt(&halt_tx, Halt::Deadline)
        {
            tracing::warn!(items = total, "Batch deadline already passed, nothing dispatched");
        }

        let timer = self.deadline.map(|deadline| {
            let halt_tx = halt_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if halt(&halt_tx, Halt::Deadline) {
                    tracing::warn!("Batch deadline reached, stopping dispatch");
                }
            })
        });

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let queue = queue.clone();
                let halt_rx = halt_rx.clone();
                let halt_tx = halt_tx.clone();
                let result_tx = result_tx.clone();
                let op = op.clone();

                tokio::spawn(async move {
                    loop {
                        if *halt_rx.borrow() != Halt::Running {
                            break;
                        }
                        let Some(item) = next_item(&queue) else {
                            break;
                        };

                        let id = item.id();
                        tracing::trace!(worker, item = %id, "Dispatching item");
                        let outcome = AssertUnwindSafe(op(item))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                Err(ArchiveError::Invariant(format!("worker panicked on {}", id)))
                            });

                        if let Err(e) = &outcome {
                            if e.is_fatal() && halt(&halt_tx, Halt::Fatal) {
                                tracing::error!(item = %id, error = %e, "Fatal error, stopping dispatch");
                            }
                        }
                        if result_tx.send((id, outcome)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(result_tx);

        let mut completed = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            completed.push(result);
        }

        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        let leftover: Vec<String> = queue.lock().drain(..).map(|item| item.id()).collect();
        let reason = *halt_rx.borrow();
        let (timed_out, aborted) = match reason {
            Halt::Deadline => (leftover, Vec::new()),
            Halt::Fatal | Halt::Running => (Vec::new(), leftover),
        };

        tracing::debug!(
            completed = completed.len(),
            timed_out = timed_out.len(),
            aborted = aborted.len(),
            "Worker pool finished"
        );

        PoolRun {
            completed,
            timed_out,
            aborted,
        }
    }
}

fn next_item<I>(queue: &Mutex<VecDeque<I>>) -> Option<I> {
    queue.lock().pop_front()
}

/// Record the first halt reason. Returns whether this call set it.
fn halt(tx: &watch::Sender<Halt>, reason: Halt) -> bool {
    tx.send_if_modified(|current| {
        if *current == Halt::Running {
            *current = reason;
            true
        } else {
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Job {
        name: &'static str,
        delay_ms: u64,
    }

    impl WorkItem for Job {
        fn id(&self) -> String {
            self.name.to_string()
        }
    }

    fn job(name: &'static str, delay_ms: u64) -> Job {
        Job { name, delay_ms }
    }

    fn ids<T>(run: &PoolRun<T>) -> Vec<&str> {
        run.completed.iter().map(|(id, _)| id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_results_in_completion_order() {
        let pool = WorkerPool::new(3);
        let run = pool
            .run(vec![job("slow", 150), job("fast", 10), job("mid", 70)], |job| async move {
                tokio::time::sleep(Duration::from_millis(job.delay_ms)).await;
                Ok(job.delay_ms)
            })
            .await;

        assert_eq!(ids(&run), vec!["fast", "mid", "slow"]);
        assert!(run.timed_out.is_empty());
        assert!(run.aborted.is_empty());
    }

    #[tokio::test]
    async fn test_width_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..8).map(|_| job("j", 10)).collect();

        let (a, p) = (active.clone(), peak.clone());
        let run = WorkerPool::new(2)
            .run(jobs, move |job| {
                let (active, peak) = (a.clone(), p.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(job.delay_ms)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(run.completed.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_item_failure_does_not_stop_batch() {
        let run = WorkerPool::new(1)
            .run(vec![job("a", 0), job("b", 0), job("c", 0)], |job| async move {
                if job.name == "a" {
                    Err(ArchiveError::NotFound("a".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(run.completed.len(), 3);
        assert!(run.completed[0].1.is_err());
        assert!(run.aborted.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_remaining() {
        let run = WorkerPool::new(1)
            .run(vec![job("a", 0), job("b", 0), job("c", 0)], |job| async move {
                if job.name == "a" {
                    Err(ArchiveError::Invariant("source vanished".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(ids(&run), vec!["a"]);
        assert_eq!(run.aborted, vec!["b".to_string(), "c".to_string()]);
        assert!(run.timed_out.is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_invariant() {
        let run = WorkerPool::new(1)
            .run(vec![job("boom", 0), job("next", 0)], |job| async move {
                if job.name == "boom" {
                    panic!("bad item");
                }
                Ok(())
            })
            .await;

        assert!(matches!(run.completed[0].1, Err(ArchiveError::Invariant(_))));
        assert_eq!(run.aborted, vec!["next".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_reports_undispatched_items() {
        let jobs = vec![job("a", 100), job("b", 100), job("c", 100), job("d", 100)];
        let run = WorkerPool::new(1)
            .with_timeout(Some(Duration::from_millis(150)))
            .run(jobs, |job| async move {
                tokio::time::sleep(Duration::from_millis(job.delay_ms)).await;
                Ok(())
            })
            .await;

        // "b" was in flight at the deadline and still finished
        assert_eq!(ids(&run), vec!["a", "b"]);
        assert_eq!(run.timed_out, vec!["c".to_string(), "d".to_string()]);
        assert!(run.aborted.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_spans_consecutive_runs() {
        let pool = WorkerPool::new(1).with_timeout(Some(Duration::from_millis(150)));
        let sleep = |job: Job| async move {
            tokio::time::sleep(Duration::from_millis(job.delay_ms)).await;
            Ok::<_, ArchiveError>(())
        };

        // Each run alone fits in the timeout; together they do not
        let first = pool.run(vec![job("a", 100)], sleep).await;
        assert_eq!(ids(&first), vec!["a"]);

        let second = pool.run(vec![job("b", 100), job("c", 100)], sleep).await;
        assert_eq!(ids(&second), vec!["b"]);
        assert_eq!(second.timed_out, vec!["c".to_string()]);

        let third = pool.run(vec![job("d", 0)], sleep).await;
        assert!(third.completed.is_empty());
        assert_eq!(third.timed_out, vec!["d".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_deadline_dispatches_nothing() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = dispatched.clone();
        let run = WorkerPool::new(2)
            .with_deadline(Some(Instant::now()))
            .run(vec![job("a", 0), job("b", 0)], move |_job| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(dispatched.load(Ordering::SeqCst), 0);
        assert_eq!(run.timed_out, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let run = WorkerPool::default()
            .run(Vec::<Job>::new(), |_job| async move { Ok(()) })
            .await;
        assert!(run.completed.is_empty());
    }
}
