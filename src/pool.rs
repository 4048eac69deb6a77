//! Bounded-concurrency batch engine shared by export, import and cleanup
//!
//! Items go into a single queue that every worker pulls from, so a slow API
//! call never holds up items assigned to an idle worker. Outcomes flow back
//! over a channel to one aggregating consumer which owns the [`BatchResult`]
//! and drives the progress bar.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{GmailError, Result};
use crate::shutdown::ShutdownSignal;

/// A unit of work the engine can hand to a handler
pub trait WorkItem: Send + 'static {
    /// Identifier used in failure records and logs
    fn describe(&self) -> String;
}

impl WorkItem for String {
    fn describe(&self) -> String {
        self.clone()
    }
}

impl WorkItem for PathBuf {
    fn describe(&self) -> String {
        self.display().to_string()
    }
}

/// Handler output that contributes to the byte total
pub trait Processed: Send + 'static {
    fn bytes(&self) -> u64;
}

impl Processed for u64 {
    fn bytes(&self) -> u64 {
        *self
    }
}

/// One item that could not be processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub item: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated outcome of one batch
#[derive(Debug, Clone)]
pub struct BatchResult<O> {
    /// Items that matched before any limit was applied
    pub total_matched: usize,
    pub total_succeeded: usize,
    pub total_failed: usize,
    pub total_bytes: u64,
    pub duration: Duration,
    /// Failure records in completion order
    pub failures: Vec<Failure>,
    /// Handler outputs in completion order
    pub completed: Vec<O>,
    /// True when a shutdown request cut the batch short
    pub cancelled: bool,
}

impl<O> BatchResult<O> {
    pub fn empty() -> Self {
        Self {
            total_matched: 0,
            total_succeeded: 0,
            total_failed: 0,
            total_bytes: 0,
            duration: Duration::ZERO,
            failures: Vec::new(),
            completed: Vec::new(),
            cancelled: false,
        }
    }

    /// Items that reached a terminal outcome
    pub fn processed(&self) -> usize {
        self.total_succeeded + self.total_failed
    }

    pub fn has_failures(&self) -> bool {
        self.total_failed > 0
    }
}

impl<O> Default for BatchResult<O> {
    fn default() -> Self {
        Self::empty()
    }
}

enum Outcome<O> {
    Succeeded(O),
    Failed { item: String, error: String, cancelled: bool },
}

/// Fixed-size pool of tokio tasks draining a shared queue
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    progress: Option<ProgressBar>,
    shutdown: Option<ShutdownSignal>,
}

impl WorkerPool {
    /// Create a pool; a concurrency of zero is clamped to one
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            progress: None,
            shutdown: None,
        }
    }

    /// Advance this bar after every completed item
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stop pulling work once this signal fires
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process every item with `handler`, at most `concurrency` at a time.
    ///
    /// Never fails as a whole: each item ends up either in `completed` or in
    /// `failures`. `total_matched` is set to `items.len()`; callers that
    /// truncated the list overwrite it with the pre-limit count.
    pub async fn run<T, O, F, Fut>(&self, items: Vec<T>, handler: F) -> BatchResult<O>
    where
        T: WorkItem,
        O: Processed,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let start = Instant::now();
        let total = items.len();
        let mut result = BatchResult::empty();
        result.total_matched = total;

        if total == 0 {
            return result;
        }

        let workers = self.concurrency.min(total);
        info!("Processing {} items with {} workers", total, workers);

        if let Some(pb) = &self.progress {
            pb.set_length(total as u64);
            pb.set_position(0);
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        for item in items {
            // Receiver is alive until the workers are spawned below
            let _ = queue_tx.send(item);
        }
        drop(queue_tx);

        let queue = Arc::new(Mutex::new(queue_rx));
        let handler = Arc::new(handler);
        let (results_tx, mut results_rx) = mpsc::channel::<Outcome<O>>(workers * 2);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let results_tx = results_tx.clone();
            let shutdown = self.shutdown.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, handler, results_tx, shutdown).await;
            }));
        }
        drop(results_tx);

        let mut saw_cancellation = false;
        while let Some(outcome) = results_rx.recv().await {
            match outcome {
                Outcome::Succeeded(output) => {
                    result.total_succeeded += 1;
                    result.total_bytes += output.bytes();
                    result.completed.push(output);
                }
                Outcome::Failed {
                    item,
                    error,
                    cancelled,
                } => {
                    if cancelled {
                        saw_cancellation = true;
                    } else {
                        warn!("Failed to process {}: {}", item, error);
                    }
                    result.total_failed += 1;
                    result.failures.push(Failure {
                        item,
                        error,
                        timestamp: Utc::now(),
                    });
                }
            }

            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }

        result.cancelled = saw_cancellation || result.processed() < total;
        result.duration = start.elapsed();

        if let Some(pb) = &self.progress {
            pb.finish();
        }

        if result.cancelled {
            info!(
                "Batch cancelled after {} of {} items",
                result.processed(),
                total
            );
        } else {
            info!(
                "Batch complete: {} succeeded, {} failed in {:.2?}",
                result.total_succeeded, result.total_failed, result.duration
            );
        }

        result
    }
}

async fn worker_loop<T, O, F, Fut>(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
    handler: Arc<F>,
    results: mpsc::Sender<Outcome<O>>,
    shutdown: Option<ShutdownSignal>,
) where
    T: WorkItem,
    O: Processed,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    loop {
        if shutdown.as_ref().is_some_and(|s| s.is_triggered()) {
            debug!("Worker {} stopping on shutdown", worker_id);
            break;
        }

        let next = queue.lock().await.recv().await;
        let Some(item) = next else {
            break;
        };

        let label = item.describe();
        debug!("Worker {} processing {}", worker_id, label);

        // Calling the handler happens inside the guarded future so a panic
        // while building it is caught as well
        let guarded = AssertUnwindSafe(async { handler(item).await }).catch_unwind();

        let outcome = match &shutdown {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.triggered() => Outcome::Failed {
                        item: label,
                        error: GmailError::OperationCancelled("shutdown requested".to_string())
                            .to_string(),
                        cancelled: true,
                    },
                    res = guarded => into_outcome(label, res),
                }
            }
            None => into_outcome(label, guarded.await),
        };

        if results.send(outcome).await.is_err() {
            break;
        }
    }
}

fn into_outcome<O>(
    label: String,
    res: std::result::Result<Result<O>, Box<dyn std::any::Any + Send>>,
) -> Outcome<O> {
    match res {
        Ok(Ok(output)) => Outcome::Succeeded(output),
        Ok(Err(e)) => Outcome::Failed {
            item: label,
            error: e.to_string(),
            cancelled: false,
        },
        Err(_) => Outcome::Failed {
            item: label,
            error: "handler panicked".to_string(),
            cancelled: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("msg{:04}", i)).collect()
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let result = WorkerPool::new(4)
            .run(Vec::<String>::new(), |_id| async { Ok(1u64) })
            .await;

        assert_eq!(result.total_matched, 0);
        assert_eq!(result.total_succeeded, 0);
        assert_eq!(result.total_failed, 0);
        assert_eq!(result.total_bytes, 0);
        assert!(result.failures.is_empty());
        assert!(!result.cancelled);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(WorkerPool::new(0).concurrency(), 1);
        assert_eq!(WorkerPool::new(7).concurrency(), 7);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_processes_everything() {
        let result = WorkerPool::new(0)
            .run(ids(5), |_id| async { Ok(10u64) })
            .await;
        assert_eq!(result.total_succeeded, 5);
        assert_eq!(result.total_bytes, 50);
    }

    #[tokio::test]
    async fn test_all_success() {
        let result = WorkerPool::new(3)
            .run(ids(10), |id: String| async move { Ok(id.len() as u64) })
            .await;

        assert_eq!(result.total_matched, 10);
        assert_eq!(result.total_succeeded, 10);
        assert_eq!(result.total_failed, 0);
        assert_eq!(result.total_bytes, 70);
        assert_eq!(result.completed.len(), 10);
        assert!(result.failures.is_empty());
        assert!(!result.has_failures());
    }

    #[tokio::test]
    async fn test_all_failure() {
        let result = WorkerPool::new(2)
            .run(ids(6), |id: String| async move {
                Err::<u64, _>(GmailError::MessageNotFound(id))
            })
            .await;

        assert_eq!(result.total_succeeded, 0);
        assert_eq!(result.total_failed, 6);
        assert_eq!(result.failures.len(), 6);
        assert!(result
            .failures
            .iter()
            .all(|f| f.error.contains("Message not found") && f.item.starts_with("msg")));
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_abort_batch() {
        let result = WorkerPool::new(4)
            .run(ids(20), |id: String| async move {
                if id.ends_with('3') {
                    Err(GmailError::ApiError("boom".to_string()))
                } else {
                    Ok(1u64)
                }
            })
            .await;

        assert_eq!(result.total_failed, 2);
        assert_eq!(result.total_succeeded, 18);
        assert_eq!(result.total_bytes, 18);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (in_flight_h, peak_h) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let result = WorkerPool::new(3)
            .run(ids(12), move |_id: String| {
                let in_flight = Arc::clone(&in_flight_h);
                let peak = Arc::clone(&peak_h);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(0u64)
                }
            })
            .await;

        assert_eq!(result.total_succeeded, 12);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {} exceeded limit", peak);
        assert!(peak >= 2, "expected parallel execution, peak was {}", peak);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_recorded_as_failure() {
        let result = WorkerPool::new(2)
            .run(ids(4), |id: String| async move {
                if id == "msg0001" {
                    panic!("corrupt message");
                }
                Ok(5u64)
            })
            .await;

        assert_eq!(result.total_succeeded, 3);
        assert_eq!(result.total_failed, 1);
        assert_eq!(result.failures[0].item, "msg0001");
        assert_eq!(result.failures[0].error, "handler panicked");
    }

    #[tokio::test]
    async fn test_progress_bar_tracks_completed_items() {
        let pb = ProgressBar::hidden();
        let result = WorkerPool::new(2)
            .with_progress(pb.clone())
            .run(ids(7), |_id| async { Ok(1u64) })
            .await;

        assert_eq!(result.total_succeeded, 7);
        assert_eq!(pb.position(), 7);
        assert_eq!(pb.length(), Some(7));
    }

    #[tokio::test]
    async fn test_shutdown_before_start_processes_nothing() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let result = WorkerPool::new(2)
            .with_shutdown(shutdown)
            .run(ids(5), |_id| async { Ok(1u64) })
            .await;

        assert_eq!(result.processed(), 0);
        assert_eq!(result.total_matched, 5);
        assert!(result.cancelled);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_items() {
        let shutdown = ShutdownSignal::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.trigger();
        });

        let result = WorkerPool::new(2)
            .with_shutdown(shutdown)
            .run(ids(10), |_id| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1u64)
            })
            .await;

        assert!(result.cancelled);
        assert_eq!(result.total_succeeded, 0);
        assert!(result.processed() < 10);
        assert!(result.total_failed >= 1);
        assert!(result
            .failures
            .iter()
            .all(|f| f.error.contains("Operation cancelled")));
    }

    #[tokio::test]
    async fn test_path_items_describe_themselves() {
        let items = vec![PathBuf::from("/tmp/a.eml"), PathBuf::from("/tmp/b.eml")];
        let result = WorkerPool::new(1)
            .run(items, |path: PathBuf| async move {
                Err::<u64, _>(GmailError::InvalidMessageFormat(path.display().to_string()))
            })
            .await;

        let mut failed: Vec<_> = result.failures.iter().map(|f| f.item.clone()).collect();
        failed.sort();
        assert_eq!(failed, vec!["/tmp/a.eml", "/tmp/b.eml"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_every_item_has_exactly_one_outcome(
            outcomes in proptest::collection::vec(any::<bool>(), 0..40),
            concurrency in 0usize..8,
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let expected_ok = outcomes.iter().filter(|ok| **ok).count();
            let items: Vec<String> = outcomes
                .iter()
                .enumerate()
                .map(|(i, ok)| format!("{}:{}", i, ok))
                .collect();

            let result = runtime.block_on(WorkerPool::new(concurrency).run(items, |item: String| async move {
                if item.ends_with("true") {
                    Ok(1u64)
                } else {
                    Err(GmailError::ApiError(item))
                }
            }));

            prop_assert_eq!(result.total_succeeded + result.total_failed, outcomes.len());
            prop_assert_eq!(result.total_succeeded, expected_ok);
            prop_assert_eq!(result.failures.len(), result.total_failed);
            prop_assert_eq!(result.total_bytes, expected_ok as u64);
        }
    }
}
