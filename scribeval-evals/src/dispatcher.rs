// Copyright 2025 Scribeval Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bounded concurrent batch execution.
//!
//! One dispatcher is created per [`Orchestrator`](crate::Orchestrator) and
//! reused for every batch, trial, and criterion it runs, so `max_concurrent`
//! caps outstanding model calls system-wide rather than per batch.

use crate::EvalConfig;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a single task produced no value.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("batch cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panic(String),
}

/// Completion state of the batch currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Fans tasks out across a bounded worker set and collects results aligned
/// by input index, regardless of completion order.
pub struct BatchDispatcher {
    semaphore: Arc<Semaphore>,
    task_timeout: Duration,
    run_cancel: Mutex<CancellationToken>,
    progress: watch::Sender<BatchProgress>,
}

// A poisoned lock only means a panicking thread held the guard; the token
// inside is still usable.
fn lock(m: &Mutex<CancellationToken>) -> MutexGuard<'_, CancellationToken> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl BatchDispatcher {
    pub fn new(config: &EvalConfig) -> Self {
        let (progress, _) = watch::channel(BatchProgress::default());
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            task_timeout: Duration::from_secs(config.timeout_secs),
            run_cancel: Mutex::new(CancellationToken::new()),
            progress,
        }
    }

    /// Install a fresh cancellation token for the next run. Each orchestrator
    /// pass begins here, so cancelling one run never poisons the next.
    pub(crate) fn begin_run(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        *lock(&self.run_cancel) = fresh.clone();
        fresh
    }

    /// Stop the run currently in flight. Already-completed slots keep their
    /// results; unfinished tasks resolve to [`TaskError::Cancelled`].
    pub fn cancel(&self) {
        lock(&self.run_cancel).cancel();
    }

    /// Token for the run currently in flight. Clones do not outlive the run:
    /// the next pass installs a fresh token.
    pub fn cancel_token(&self) -> CancellationToken {
        lock(&self.run_cancel).clone()
    }

    /// Observe progress of the batch in flight.
    pub fn watch_progress(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    /// Run `tasks` concurrently under the shared bound. Result `i` always
    /// corresponds to input task `i`.
    pub async fn dispatch<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T, TaskError>>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let total = tasks.len();
        let _ = self.progress.send(BatchProgress { completed: 0, total });
        debug!(total, "dispatching batch");

        let completed = Arc::new(AtomicUsize::new(0));
        let run_cancel = self.cancel_token();
        let mut handles = Vec::with_capacity(total);

        for task in tasks {
            let semaphore = Arc::clone(&self.semaphore);
            let cancel = run_cancel.clone();
            let task_timeout = self.task_timeout;
            let progress = self.progress.clone();
            let completed = Arc::clone(&completed);

            handles.push(tokio::spawn(async move {
                // Biased: the cancellation arm is polled first, so a
                // cancelled run never lets another task slip through.
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TaskError::Cancelled),
                    permit = semaphore.acquire_owned() => {
                        permit.map_err(|_| TaskError::Cancelled)?
                    }
                };

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TaskError::Cancelled),
                    outcome = tokio::time::timeout(task_timeout, task) => {
                        outcome.map_err(|_| TaskError::Timeout(task_timeout))
                    }
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = progress.send(BatchProgress {
                    completed: done,
                    total,
                });
                result
            }));
        }

        // Awaiting handles in spawn order aligns results with input order;
        // the tasks themselves complete in any order.
        let mut results = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("batch task panicked: {}", e);
                    results.push(Err(TaskError::Panic(e.to_string())));
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(max_concurrent: usize, timeout_secs: u64) -> BatchDispatcher {
        BatchDispatcher::new(&EvalConfig {
            max_concurrent,
            timeout_secs,
            trial_count: 1,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_align_with_input_order() {
        let dispatcher = dispatcher(8, 60);
        // Later tasks finish first; output order must still be input order.
        let tasks: Vec<_> = (0..4u64)
            .map(|i| async move {
                tokio::time::sleep(Duration::from_millis(100 - i * 20)).await;
                i
            })
            .collect();
        let results = dispatcher.dispatch(tasks).await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_task_error() {
        let dispatcher = dispatcher(2, 1);
        let tasks = vec![
            Box::pin(async { 1u32 }) as std::pin::Pin<Box<dyn Future<Output = u32> + Send>>,
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                2u32
            }),
        ];
        let results = dispatcher.dispatch(tasks).await;
        assert!(matches!(results[0], Ok(1)));
        assert!(matches!(results[1], Err(TaskError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_yields_cancelled_slots() {
        let dispatcher = dispatcher(2, 600);
        dispatcher.cancel();
        let tasks: Vec<_> = (0..3u32)
            .map(|i| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                i
            })
            .collect();
        let results = dispatcher.dispatch(tasks).await;
        assert_eq!(results.len(), 3);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(TaskError::Cancelled))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_flight_cancel_keeps_completed_slots() {
        let dispatcher = dispatcher(2, 600);
        let cancel = dispatcher.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        // Slot 0 finishes before the cancel fires and must keep its value;
        // slot 1 is still sleeping and must map to Cancelled.
        let tasks = vec![
            Box::pin(async { 1u32 }) as std::pin::Pin<Box<dyn Future<Output = u32> + Send>>,
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                2u32
            }),
        ];
        let results = dispatcher.dispatch(tasks).await;
        assert!(matches!(results[0], Ok(1)));
        assert!(matches!(results[1], Err(TaskError::Cancelled)));
    }

    #[tokio::test]
    async fn test_new_run_after_cancel_starts_clean() {
        let dispatcher = dispatcher(2, 60);
        dispatcher.cancel();
        let results = dispatcher
            .dispatch((0..2u32).map(|i| async move { i }).collect::<Vec<_>>())
            .await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(TaskError::Cancelled))));

        // A fresh run installs a fresh token; the earlier cancel is gone.
        dispatcher.begin_run();
        let results = dispatcher
            .dispatch((0..2u32).map(|i| async move { i }).collect::<Vec<_>>())
            .await;
        let values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let dispatcher = dispatcher(2, 60);
        let watch = dispatcher.watch_progress();
        let tasks: Vec<_> = (0..5u32).map(|i| async move { i }).collect();
        let results = dispatcher.dispatch(tasks).await;
        assert_eq!(results.len(), 5);
        let progress = *watch.borrow();
        assert_eq!(progress.completed, 5);
        assert_eq!(progress.total, 5);
        assert_eq!(progress.fraction(), 1.0);
    }

    #[tokio::test]
    async fn test_panic_isolated_to_its_slot() {
        let dispatcher = dispatcher(2, 60);
        let tasks = vec![
            Box::pin(async { 1u32 }) as std::pin::Pin<Box<dyn Future<Output = u32> + Send>>,
            Box::pin(async { panic!("boom") }),
            Box::pin(async { 3u32 }),
        ];
        let results = dispatcher.dispatch(tasks).await;
        assert!(matches!(results[0], Ok(1)));
        assert!(matches!(results[1], Err(TaskError::Panic(_))));
        assert!(matches!(results[2], Ok(3)));
    }

    #[test]
    fn test_empty_progress_fraction() {
        assert_eq!(BatchProgress::default().fraction(), 0.0);
    }
}
