//! Batch Orchestrator: bounded-concurrency sliding window over work items.
//!
//! One driver task owns the queue, the in-flight set and the status list.
//! Recording a finished item and dispatching the next queued one happen in the
//! same loop iteration of that single owner, so the in-flight count can never
//! exceed `concurrency` and the run is done exactly when both the queue and
//! the in-flight set are empty. Observers only ever see whole snapshots
//! published through a `watch` channel.
//!
//! Item payloads are released as soon as they complete; after the run only the
//! failed ones are still held, for `retry_failed`.

use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::batch::status::{BatchItemStatus, BatchSnapshot, ItemState};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error("batch has no items")]
    EmptyBatch,

    #[error("batch is still running")]
    StillRunning,

    #[error("batch has no failed items to retry")]
    NothingToRetry,
}

/// The per-item operation a batch runs. Each call is independent; a failure
/// is recorded on that item and never aborts the batch.
#[async_trait]
pub trait ItemProcessor<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    type Output: Clone + Send + Sync + 'static;
    type Error: Display + Send + 'static;

    /// Display label for an item (candidate id, file name).
    fn describe(&self, item: &T) -> String;

    async fn process(&self, item: &T) -> Result<Self::Output, Self::Error>;
}

/// Pause flag plus a wake-up for the driver.
#[derive(Default)]
struct Control {
    paused: AtomicBool,
    wake: Notify,
}

/// Item payloads by input index. `None` once the item completed.
type Payloads<T> = Arc<Mutex<Vec<Option<Arc<T>>>>>;

fn lock_payloads<T>(payloads: &Mutex<Vec<Option<Arc<T>>>>) -> MutexGuard<'_, Vec<Option<Arc<T>>>> {
    payloads
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running (or finished) batch.
pub struct BatchHandle<T, P>
where
    T: Send + Sync + 'static,
    P: ItemProcessor<T>,
{
    payloads: Payloads<T>,
    processor: Arc<P>,
    concurrency: usize,
    control: Arc<Control>,
    status: watch::Receiver<BatchSnapshot<P::Output>>,
}

/// Starts a batch over `items`, running at most `concurrency` items at once.
pub fn start<T, P>(
    items: Vec<T>,
    concurrency: usize,
    processor: Arc<P>,
) -> Result<BatchHandle<T, P>, BatchError>
where
    T: Send + Sync + 'static,
    P: ItemProcessor<T>,
{
    launch(items.into_iter().map(Arc::new).collect(), concurrency, processor)
}

fn launch<T, P>(
    items: Vec<Arc<T>>,
    concurrency: usize,
    processor: Arc<P>,
) -> Result<BatchHandle<T, P>, BatchError>
where
    T: Send + Sync + 'static,
    P: ItemProcessor<T>,
{
    if concurrency == 0 {
        return Err(BatchError::InvalidConcurrency(concurrency));
    }
    if items.is_empty() {
        return Err(BatchError::EmptyBatch);
    }

    let initial = BatchSnapshot {
        items: items
            .iter()
            .enumerate()
            .map(|(idx, item)| BatchItemStatus::pending(idx, processor.describe(item)))
            .collect(),
        concurrency,
        paused: false,
        done: false,
    };
    let (status_tx, status_rx) = watch::channel(initial);

    let total = items.len();
    let payloads: Payloads<T> = Arc::new(Mutex::new(items.into_iter().map(Some).collect()));
    let control = Arc::new(Control::default());

    info!("Starting batch of {total} items with concurrency {concurrency}");

    tokio::spawn(drive(
        total,
        Arc::clone(&payloads),
        Arc::clone(&processor),
        concurrency,
        Arc::clone(&control),
        status_tx,
    ));

    Ok(BatchHandle {
        payloads,
        processor,
        concurrency,
        control,
        status: status_rx,
    })
}

async fn drive<T, P>(
    total: usize,
    payloads: Payloads<T>,
    processor: Arc<P>,
    concurrency: usize,
    control: Arc<Control>,
    status_tx: watch::Sender<BatchSnapshot<P::Output>>,
) where
    T: Send + Sync + 'static,
    P: ItemProcessor<T>,
{
    let mut queue: VecDeque<usize> = (0..total).collect();
    let mut in_flight = FuturesUnordered::new();

    loop {
        while !control.paused.load(Ordering::SeqCst) && in_flight.len() < concurrency {
            let Some(idx) = queue.pop_front() else {
                break;
            };
            let Some(item) = lock_payloads(&payloads)[idx].clone() else {
                continue;
            };
            status_tx.send_modify(|s| {
                let item = &mut s.items[idx];
                item.status = ItemState::Processing;
                item.started_at = Some(Utc::now());
            });
            debug!("Dispatching batch item {idx}");

            let processor = Arc::clone(&processor);
            in_flight.push(async move {
                let task = tokio::spawn(async move {
                    processor
                        .process(&item)
                        .await
                        .map_err(|e| e.to_string())
                });
                (idx, task.await)
            });
        }

        let paused = control.paused.load(Ordering::SeqCst);
        status_tx.send_if_modified(|s| {
            let changed = s.paused != paused;
            s.paused = paused;
            changed
        });

        if queue.is_empty() && in_flight.is_empty() {
            break;
        }

        tokio::select! {
            Some((idx, joined)) = in_flight.next(), if !in_flight.is_empty() => {
                let outcome = match joined {
                    Ok(result) => result,
                    Err(e) => Err(format!("item task aborted: {e}")),
                };
                if outcome.is_ok() {
                    lock_payloads(&payloads)[idx] = None;
                }
                status_tx.send_modify(|s| {
                    let item = &mut s.items[idx];
                    item.finished_at = Some(Utc::now());
                    match outcome {
                        Ok(output) => {
                            item.status = ItemState::Completed;
                            item.result = Some(output);
                        }
                        Err(message) => {
                            warn!("Batch item {} ({}) failed: {message}", idx, item.label);
                            item.status = ItemState::Failed;
                            item.error = Some(message);
                        }
                    }
                });
            }
            _ = control.wake.notified() => {}
        }
    }

    status_tx.send_modify(|s| s.done = true);
    let summary = status_tx.borrow().summary();
    info!(
        "Batch finished: {} completed, {} failed of {}",
        summary.completed, summary.failed, summary.total
    );
}

impl<T, P> BatchHandle<T, P>
where
    T: Send + Sync + 'static,
    P: ItemProcessor<T>,
{
    /// Stops dispatching new items. In-flight items run to completion.
    pub fn pause(&self) {
        self.control.paused.store(true, Ordering::SeqCst);
        self.control.wake.notify_one();
    }

    /// Clears the pause flag; dispatch restarts immediately if slots are free.
    pub fn resume(&self) {
        self.control.paused.store(false, Ordering::SeqCst);
        self.control.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.control.paused.load(Ordering::SeqCst)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn snapshot(&self) -> BatchSnapshot<P::Output> {
        (*self.status.borrow()).clone()
    }

    /// A receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<BatchSnapshot<P::Output>> {
        self.status.clone()
    }

    /// Waits for the run to finish and returns the final snapshot.
    pub async fn wait(&self) -> BatchSnapshot<P::Output> {
        let mut rx = self.status.clone();
        let done = rx.wait_for(|s| s.done).await.map(|s| (*s).clone());
        match done {
            Ok(snapshot) => snapshot,
            // Driver vanished without finishing; report what we last saw.
            Err(_) => (*self.status.borrow()).clone(),
        }
    }

    /// Starts a new run over exactly the items that failed in this one.
    pub fn retry_failed(&self) -> Result<BatchHandle<T, P>, BatchError> {
        let snapshot = self.snapshot();
        if !snapshot.done {
            return Err(BatchError::StillRunning);
        }
        let failed: Vec<Arc<T>> = {
            let payloads = lock_payloads(&self.payloads);
            snapshot
                .items
                .iter()
                .filter(|i| i.status == ItemState::Failed)
                .filter_map(|i| payloads[i.index].clone())
                .collect()
        };
        if failed.is_empty() {
            return Err(BatchError::NothingToRetry);
        }
        info!("Retrying {} failed batch items", failed.len());
        launch(failed, self.concurrency, Arc::clone(&self.processor))
    }
}
