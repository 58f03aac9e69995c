//! `parallel_map` (spec §4.2): the sole intra-phase concurrency primitive.
//! Bounded-concurrency application of a function across a list of items,
//! with idempotency-aware failure classification and periodic progress
//! callbacks.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::domain::PhaseError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure<I> {
    pub item: I,
    pub message: String,
}

/// Result of a `parallel_map` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelMapResult<I, O> {
    pub succeeded: Vec<O>,
    pub failed: Vec<ItemFailure<I>>,
}

/// Aggregated rollup attached to a phase result (`SPEC_FULL.md` §C.1,
/// grounded on `original_source/api/workflow/engine.py`'s
/// `_aggregate_task_outputs`): a flat succeeded/failed pair is not enough to
/// report to callers, they want a count summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelMapSummary {
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub failures: Vec<String>,
}

impl<I, O> ParallelMapResult<I, O> {
    pub fn aggregate(&self) -> ParallelMapSummary
    where
        I: std::fmt::Debug,
    {
        ParallelMapSummary {
            succeeded_count: self.succeeded.len(),
            failed_count: self.failed.len(),
            failures: self.failed.iter().map(|f| format!("{:?}: {}", f.item, f.message)).collect(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Bounded-concurrency map over `items`, calling `f` for each with at most
/// `max_concurrent` in flight. An error whose message contains "not found"
/// is folded into `succeeded` rather than `failed` — the idempotency
/// convention for cascade-deletes (spec §4.2). `on_progress` is invoked
/// every `progress_interval` completions with `(done, total)`.
///
/// `should_cancel` is polled before launching each new item; once it
/// returns `true`, no further items are started, but already-dispatched
/// calls run to completion (spec §4.6 cancellation semantics — in-flight
/// upstream calls cannot be safely aborted mid-request).
pub async fn parallel_map<I, O, F, Fut, C>(
    items: Vec<I>,
    f: F,
    max_concurrent: usize,
    progress_interval: usize,
    mut on_progress: impl FnMut(usize, usize),
    should_cancel: C,
) -> ParallelMapResult<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, PhaseError>> + Send + 'static,
    C: Fn() -> bool,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let f = Arc::new(f);
    let mut in_flight = FuturesUnordered::new();
    let mut result = ParallelMapResult { succeeded: Vec::new(), failed: Vec::new() };
    let done = AtomicUsize::new(0);

    let mut items = items.into_iter();
    for _ in 0..max_concurrent.max(1) {
        let Some(item) = items.next() else { break };
        in_flight.push(spawn_one(item, semaphore.clone(), f.clone()));
    }

    while let Some((item, outcome)) = in_flight.next().await {
        record_outcome(item, outcome, &mut result);
        let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
        if progress_interval > 0 && completed % progress_interval == 0 {
            on_progress(completed, total);
        }

        if !should_cancel() {
            if let Some(item) = items.next() {
                in_flight.push(spawn_one(item, semaphore.clone(), f.clone()));
            }
        }
    }

    result
}

fn spawn_one<I, O, F, Fut>(
    item: I,
    semaphore: Arc<Semaphore>,
    f: Arc<F>,
) -> impl Future<Output = (I, Result<O, PhaseError>)>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, PhaseError>> + Send + 'static,
{
    async move {
        let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
        let outcome = f(item.clone()).await;
        (item, outcome)
    }
}

fn record_outcome<I, O>(item: I, outcome: Result<O, PhaseError>, result: &mut ParallelMapResult<I, O>) {
    match outcome {
        Ok(value) => result.succeeded.push(value),
        Err(err) if PhaseError::is_not_found(&err.message) => {
            // Idempotency convention: a cascade-delete's "not found" means
            // the desired end state already holds.
        }
        Err(err) => result.failed.push(ItemFailure { item, message: err.message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;

    #[tokio::test]
    async fn collapses_not_found_errors_into_success_bucket() {
        let items = vec![1, 2, 3];
        let result = parallel_map(
            items,
            |n: i32| async move {
                if n == 2 {
                    Err(PhaseError::upstream_fatal("resource not found"))
                } else {
                    Ok(n * 10)
                }
            },
            2,
            0,
            |_, _| {},
            || false,
        )
        .await;

        assert_eq!(result.succeeded.len(), 2);
        assert!(result.failed.is_empty());
    }

    #[tokio::test]
    async fn records_genuine_failures_separately() {
        let items = vec![1, 2];
        let result = parallel_map(
            items,
            |n: i32| async move {
                if n == 2 {
                    Err(PhaseError::upstream_fatal("permission denied"))
                } else {
                    Ok(n)
                }
            },
            2,
            0,
            |_, _| {},
            || false,
        )
        .await;

        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].item, 2);
    }

    #[tokio::test]
    async fn stops_launching_new_items_once_cancelled() {
        let launched = Arc::new(Counter::new(0));
        let launched_clone = launched.clone();
        let items = vec![1, 2, 3, 4, 5];

        let result = parallel_map(
            items,
            move |n: i32| {
                let launched = launched_clone.clone();
                async move {
                    launched.fetch_add(1, Ordering::SeqCst);
                    Ok::<i32, PhaseError>(n)
                }
            },
            1,
            0,
            |_, _| {},
            || true,
        )
        .await;

        // Exactly the initial batch (bounded by max_concurrent=1) runs;
        // cancellation prevents any further dispatch.
        assert!(launched.load(Ordering::SeqCst) <= 1);
        assert!(result.succeeded.len() <= 1);
    }

    #[tokio::test]
    async fn reports_progress_at_configured_interval() {
        let progress_calls = Arc::new(Mutex_::new(Vec::new()));
        let progress_calls_clone = progress_calls.clone();
        let items = vec![1, 2, 3, 4];

        parallel_map(
            items,
            |n: i32| async move { Ok::<i32, PhaseError>(n) },
            4,
            2,
            move |done, total| progress_calls_clone.lock().unwrap().push((done, total)),
            || false,
        )
        .await;

        let calls = progress_calls.lock().unwrap();
        assert_eq!(*calls, vec![(2, 4), (4, 4)]);
    }

    use std::sync::Mutex as Mutex_;
}
