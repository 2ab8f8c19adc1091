//! Bounded-concurrency batch execution.
//!
//! Items are split into consecutive chunks of `concurrency` items. Every item
//! of a chunk runs concurrently and the whole chunk finishes before the next
//! one starts, which bounds peak concurrency exactly and gives a natural
//! point for an inter-chunk delay. Outcomes are returned in input order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

/// What to do with an item whose operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Record the failure as the item's outcome and carry on.
    Skip,
    /// Stop: no further chunks start and the error is returned.
    Abort,
    /// Re-run the item inline (bounded by `max_retries_per_item`).
    Retry,
}

/// Progress notification, fired once per finished item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

/// Outcome for one input item.
#[derive(Debug)]
pub struct BatchOutcome<T, R, E> {
    pub item: T,
    pub result: Result<R, E>,
}

impl<T, R, E> BatchOutcome<T, R, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

type ProgressFn = Arc<dyn Fn(BatchProgress) + Send + Sync>;
type ErrorFn<T, E> = Arc<dyn Fn(&E, &T) -> ErrorAction + Send + Sync>;

/// Runs homogeneous async jobs with bounded concurrency.
pub struct BatchProcessor<T, E> {
    concurrency: usize,
    delay_between_batches: Option<Duration>,
    max_retries_per_item: u32,
    on_progress: Option<ProgressFn>,
    on_error: Option<ErrorFn<T, E>>,
}

impl<T, E> BatchProcessor<T, E> {
    /// A processor running `concurrency` items at a time (at least one).
    /// Failures are skipped unless an `on_error` hook says otherwise.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            delay_between_batches: None,
            max_retries_per_item: 3,
            on_progress: None,
            on_error: None,
        }
    }

    pub fn with_delay_between_batches(mut self, delay: Duration) -> Self {
        self.delay_between_batches = Some(delay);
        self
    }

    /// Caps how often [`ErrorAction::Retry`] is honoured per item; once spent
    /// the failure is recorded as if skipped.
    pub fn with_max_retries_per_item(mut self, max: u32) -> Self {
        self.max_retries_per_item = max;
        self
    }

    pub fn with_on_progress(mut self, on_progress: impl Fn(BatchProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn with_on_error(
        mut self,
        on_error: impl Fn(&E, &T) -> ErrorAction + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `operation` over every item.
    ///
    /// Returns one outcome per item in input order, or the first aborting
    /// error. On abort the current chunk still runs to completion (in-flight
    /// calls are never cancelled) but no later chunk starts.
    pub async fn process<R, F, Fut>(
        &self,
        items: Vec<T>,
        operation: F,
    ) -> Result<Vec<BatchOutcome<T, R, E>>, E>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let total = items.len();
        let completed = AtomicUsize::new(0);
        let mut outcomes = Vec::with_capacity(total);
        let mut remaining = items.into_iter();
        let mut chunk_index = 0usize;

        loop {
            let chunk: Vec<T> = remaining.by_ref().take(self.concurrency).collect();
            if chunk.is_empty() {
                break;
            }
            if chunk_index > 0 {
                if let Some(delay) = self.delay_between_batches {
                    tokio::time::sleep(delay).await;
                }
            }
            debug!(chunk = chunk_index, size = chunk.len(), total, "Starting batch chunk");

            let results = join_all(
                chunk
                    .into_iter()
                    .map(|item| self.run_item(item, &operation, &completed, total)),
            )
            .await;

            let mut abort = None;
            for result in results {
                match result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(error) if abort.is_none() => abort = Some(error),
                    Err(_) => {}
                }
            }
            if let Some(error) = abort {
                warn!(chunk = chunk_index, "Batch aborted by error handler");
                return Err(error);
            }
            chunk_index += 1;
        }

        Ok(outcomes)
    }

    async fn run_item<R, F, Fut>(
        &self,
        item: T,
        operation: &F,
        completed: &AtomicUsize,
        total: usize,
    ) -> Result<BatchOutcome<T, R, E>, E>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut retries = 0;
        let result = loop {
            let error = match operation(item.clone()).await {
                Ok(value) => break Ok(value),
                Err(error) => error,
            };
            let action = self
                .on_error
                .as_ref()
                .map_or(ErrorAction::Skip, |on_error| on_error(&error, &item));
            match action {
                ErrorAction::Retry if retries < self.max_retries_per_item => {
                    retries += 1;
                    debug!(retries, "Retrying batch item");
                }
                ErrorAction::Abort => return Err(error),
                ErrorAction::Retry | ErrorAction::Skip => break Err(error),
            }
        };

        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(on_progress) = &self.on_progress {
            on_progress(BatchProgress {
                completed: done,
                total,
            });
        }
        Ok(BatchOutcome { item, result })
    }
}

impl<T, E> std::fmt::Debug for BatchProcessor<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("concurrency", &self.concurrency)
            .field("delay_between_batches", &self.delay_between_batches)
            .field("max_retries_per_item", &self.max_retries_per_item)
            .finish()
    }
}
