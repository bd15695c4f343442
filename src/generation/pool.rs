//! Bounded worker pool for generator calls
//!
//! Every task runs under a shared concurrency limit, its own deadline and
//! the pool's cancellation token. Cancelling the token stops queued tasks
//! from starting and aborts the ones in flight.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Why a pooled task produced no value
#[derive(Error, Debug)]
pub enum TaskError<E> {
    /// The pool was cancelled before or while the task ran
    #[error("task cancelled")]
    Cancelled,

    /// The task exceeded the per-task deadline
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),

    /// The task itself failed
    #[error("{0}")]
    Failed(E),
}

/// Concurrency-limited runner with per-task timeout and cancellation
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    task_timeout: Duration,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize, task_timeout: Duration, cancel: CancellationToken) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            task_timeout,
            cancel,
        }
    }

    /// Token observed by every task of this pool
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel queued and running tasks
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one task under the pool's limits
    pub async fn run<T, E, Fut>(&self, task: Fut) -> Result<T, TaskError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
            permit = self.semaphore.acquire() => permit.map_err(|_| TaskError::Cancelled)?,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TaskError::Cancelled),
            outcome = tokio::time::timeout(self.task_timeout, task) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(_) => Err(TaskError::TimedOut(self.task_timeout)),
            },
        }
    }

    /// Run `task` for every item, returning each item with its outcome
    ///
    /// Results come back in completion order.
    pub async fn run_all<K, T, E, F, Fut>(
        &self,
        items: Vec<K>,
        task: F,
    ) -> Vec<(K, Result<T, TaskError<E>>)>
    where
        K: Clone,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        stream::iter(items)
            .map(|item| {
                let fut = task(item.clone());
                async move { (item, self.run(fut).await) }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(concurrency: usize, timeout_ms: u64) -> WorkerPool {
        WorkerPool::new(
            concurrency,
            Duration::from_millis(timeout_ms),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_run_success_and_failure() {
        let pool = pool(2, 1_000);

        let ok: Result<u32, TaskError<String>> = pool.run(async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let failed: Result<u32, TaskError<String>> =
            pool.run(async { Err("boom".to_string()) }).await;
        assert!(matches!(failed, Err(TaskError::Failed(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let pool = pool(1, 20);
        let slow: Result<(), TaskError<String>> = pool
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(slow, Err(TaskError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_cancelled_pool_rejects_tasks() {
        let pool = pool(1, 1_000);
        pool.cancel();
        let result: Result<(), TaskError<String>> = pool.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(TaskError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_aborts_running_task() {
        let pool = pool(1, 10_000);
        let token = pool.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result: Result<(), TaskError<String>> = pool
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TaskError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_all_respects_concurrency() {
        let pool = pool(2, 1_000);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = pool
            .run_all((0..6).collect::<Vec<u32>>(), |n| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    if n == 3 {
                        Err("three")
                    } else {
                        Ok(n * 10)
                    }
                }
            })
            .await;

        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        let failures = results.iter().filter(|(_, r)| r.is_err()).count();
        assert_eq!(failures, 1);
    }
}
