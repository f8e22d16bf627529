//! In-process registry of running and finished batches, addressed by id.
//!
//! Batches of different item types sit behind `ManagedBatch`. Each registered
//! run gets a watcher task that notifies the owning user over the real-time
//! hub when the run finishes. A retry replaces the run under the same id.
//!
//! Finished batches stay readable for `Retention::ttl`, and at most
//! `Retention::max_finished` of them are kept; older ones are evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::orchestrator::{BatchError, BatchHandle, ItemProcessor};
use crate::batch::status::{BatchItemStatus, BatchSummary};
use crate::errors::AppError;
use crate::realtime::protocol::Notification;
use crate::realtime::RealtimeHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Profiles,
    Uploads,
}

/// Type-erased view of one batch run.
#[async_trait]
pub trait ManagedBatch: Send + Sync {
    fn pause(&self);
    fn resume(&self);
    fn summary(&self) -> BatchSummary;
    /// Item statuses with results rendered as JSON.
    fn items(&self) -> Vec<BatchItemStatus<Value>>;
    fn retry_failed(&self) -> Result<Arc<dyn ManagedBatch>, BatchError>;
    async fn finished(&self) -> BatchSummary;
}

#[async_trait]
impl<T, P> ManagedBatch for BatchHandle<T, P>
where
    T: Send + Sync + 'static,
    P: ItemProcessor<T>,
    P::Output: Serialize,
{
    fn pause(&self) {
        BatchHandle::pause(self)
    }

    fn resume(&self) {
        BatchHandle::resume(self)
    }

    fn summary(&self) -> BatchSummary {
        self.snapshot().summary()
    }

    fn items(&self) -> Vec<BatchItemStatus<Value>> {
        self.snapshot()
            .items
            .into_iter()
            .map(|item| BatchItemStatus {
                index: item.index,
                label: item.label,
                status: item.status,
                error: item.error,
                result: item
                    .result
                    .map(|r| serde_json::to_value(r).unwrap_or(Value::Null)),
                started_at: item.started_at,
                finished_at: item.finished_at,
            })
            .collect()
    }

    fn retry_failed(&self) -> Result<Arc<dyn ManagedBatch>, BatchError> {
        Ok(Arc::new(BatchHandle::retry_failed(self)?))
    }

    async fn finished(&self) -> BatchSummary {
        self.wait().await.summary()
    }
}

struct Entry {
    kind: BatchKind,
    owner: Uuid,
    created_at: DateTime<Utc>,
    run: u32,
    /// Set when the current run finishes; cleared by a retry.
    finished_at: Option<DateTime<Utc>>,
    batch: Arc<dyn ManagedBatch>,
}

/// How long finished batches stay in the registry.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub ttl: Duration,
    pub max_finished: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            max_finished: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    pub id: Uuid,
    pub kind: BatchKind,
    pub owner: Uuid,
    pub created_at: DateTime<Utc>,
    /// 1 for the original run, incremented by each retry.
    pub run: u32,
    /// When the current run finished, as recorded by the registry.
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: BatchSummary,
    pub items: Vec<BatchItemStatus<Value>>,
}

#[derive(Clone)]
pub struct BatchRegistry {
    batches: Arc<Mutex<HashMap<Uuid, Entry>>>,
    hub: RealtimeHub,
    retention: Retention,
}

impl BatchRegistry {
    pub fn new(hub: RealtimeHub, retention: Retention) -> Self {
        Self {
            batches: Arc::new(Mutex::new(HashMap::new())),
            hub,
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, kind: BatchKind, owner: Uuid, batch: Arc<dyn ManagedBatch>) -> Uuid {
        let id = Uuid::new_v4();
        {
            let mut batches = self.lock();
            evict_finished(&mut batches, &self.retention, Utc::now());
            batches.insert(
                id,
                Entry {
                    kind,
                    owner,
                    created_at: Utc::now(),
                    run: 1,
                    finished_at: None,
                    batch: Arc::clone(&batch),
                },
            );
        }
        info!(batch_id = %id, ?kind, %owner, "Registered batch");
        self.watch(id, kind, owner, 1, batch);
        id
    }

    pub fn view(&self, id: Uuid) -> Result<BatchView, AppError> {
        let batches = self.lock();
        let entry = batches.get(&id).ok_or_else(|| not_found(id))?;
        Ok(BatchView {
            id,
            kind: entry.kind,
            owner: entry.owner,
            created_at: entry.created_at,
            run: entry.run,
            finished_at: entry.finished_at,
            summary: entry.batch.summary(),
            items: entry.batch.items(),
        })
    }

    pub fn pause(&self, id: Uuid) -> Result<BatchView, AppError> {
        self.batch(id)?.pause();
        info!(batch_id = %id, "Batch paused");
        self.view(id)
    }

    pub fn resume(&self, id: Uuid) -> Result<BatchView, AppError> {
        self.batch(id)?.resume();
        info!(batch_id = %id, "Batch resumed");
        self.view(id)
    }

    /// Starts a new run over the failed items and swaps it in under the same id.
    pub fn retry(&self, id: Uuid) -> Result<BatchView, AppError> {
        let (kind, owner, run, retried) = {
            let mut batches = self.lock();
            let entry = batches.get_mut(&id).ok_or_else(|| not_found(id))?;
            let retried = entry.batch.retry_failed()?;
            entry.batch = Arc::clone(&retried);
            entry.run += 1;
            entry.finished_at = None;
            (entry.kind, entry.owner, entry.run, retried)
        };
        info!(batch_id = %id, run, "Batch retry started");
        self.watch(id, kind, owner, run, retried);
        self.view(id)
    }

    fn batch(&self, id: Uuid) -> Result<Arc<dyn ManagedBatch>, AppError> {
        self.lock()
            .get(&id)
            .map(|e| Arc::clone(&e.batch))
            .ok_or_else(|| not_found(id))
    }

    fn watch(&self, id: Uuid, kind: BatchKind, owner: Uuid, run: u32, batch: Arc<dyn ManagedBatch>) {
        let registry = self.clone();
        tokio::spawn(async move {
            let summary = batch.finished().await;
            drop(batch);
            registry.mark_finished(id, run);

            let notification = completion_notification(id, kind, run, &summary);
            if !registry.hub.notify_user(owner, notification) {
                warn!(batch_id = %id, %owner, "Batch owner offline, completion not delivered");
            }
        });
    }

    fn mark_finished(&self, id: Uuid, run: u32) {
        let now = Utc::now();
        let mut batches = self.lock();
        if let Some(entry) = batches.get_mut(&id).filter(|e| e.run == run) {
            entry.finished_at = Some(now);
        }
        evict_finished(&mut batches, &self.retention, now);
    }
}

/// Drops finished entries older than the ttl, then the oldest finished ones
/// beyond `max_finished`. Running batches are never evicted.
fn evict_finished(batches: &mut HashMap<Uuid, Entry>, retention: &Retention, now: DateTime<Utc>) {
    let expired = |finished: DateTime<Utc>| {
        now.signed_duration_since(finished)
            .to_std()
            .is_ok_and(|age| age >= retention.ttl)
    };
    batches.retain(|id, entry| match entry.finished_at {
        Some(finished) if expired(finished) => {
            debug!(batch_id = %id, "Evicting expired batch");
            false
        }
        _ => true,
    });

    let mut finished: Vec<(DateTime<Utc>, Uuid)> = batches
        .iter()
        .filter_map(|(id, e)| e.finished_at.map(|at| (at, *id)))
        .collect();
    if finished.len() > retention.max_finished {
        finished.sort();
        let excess = finished.len() - retention.max_finished;
        for (_, id) in finished.into_iter().take(excess) {
            debug!(batch_id = %id, "Evicting batch beyond retention limit");
            batches.remove(&id);
        }
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Batch {id} not found"))
}

fn completion_notification(
    id: Uuid,
    kind: BatchKind,
    run: u32,
    summary: &BatchSummary,
) -> Notification {
    let what = match kind {
        BatchKind::Profiles => "Profile generation",
        BatchKind::Uploads => "Resume upload",
    };
    Notification {
        kind: "batch_completed".to_string(),
        title: format!("{what} batch finished"),
        message: format!(
            "{} of {} completed, {} failed",
            summary.completed, summary.total, summary.failed
        ),
        data: json!({
            "batchId": id,
            "batchKind": kind,
            "run": run,
            "summary": summary,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::batch::orchestrator::start;
    use crate::realtime::hub::Outbound;
    use crate::realtime::protocol::ServerMessage;

    /// Doubles even numbers, fails odd ones. Each item waits for a permit when gated.
    struct Doubler {
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl ItemProcessor<u32> for Doubler {
        type Output = u32;
        type Error = String;

        fn describe(&self, item: &u32) -> String {
            format!("item-{item}")
        }

        async fn process(&self, item: &u32) -> Result<u32, String> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.map_err(|e| e.to_string())?.forget();
            }
            if item % 2 == 0 {
                Ok(item * 2)
            } else {
                Err(format!("{item} is odd"))
            }
        }
    }

    fn batch(items: Vec<u32>, gate: Option<Arc<Semaphore>>) -> Arc<dyn ManagedBatch> {
        Arc::new(start(items, 2, Arc::new(Doubler { gate })).unwrap())
    }

    async fn until_done(registry: &BatchRegistry, id: Uuid) -> BatchView {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let view = registry.view(id).unwrap();
                if view.summary.done {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("batch did not finish")
    }

    #[tokio::test]
    async fn test_view_renders_results_as_json() {
        let registry = BatchRegistry::new(RealtimeHub::new(), Retention::default());
        let id = registry.register(BatchKind::Profiles, Uuid::new_v4(), batch(vec![2, 3], None));

        let view = until_done(&registry, id).await;
        assert_eq!(view.run, 1);
        assert_eq!(view.summary.completed, 1);
        assert_eq!(view.summary.failed, 1);
        assert_eq!(view.items[0].result, Some(json!(4)));
        assert_eq!(view.items[1].error.as_deref(), Some("3 is odd"));
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let registry = BatchRegistry::new(RealtimeHub::new(), Retention::default());
        assert!(matches!(
            registry.view(Uuid::new_v4()),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            registry.retry(Uuid::new_v4()),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_replaces_run_under_same_id() {
        let registry = BatchRegistry::new(RealtimeHub::new(), Retention::default());
        let id = registry.register(BatchKind::Uploads, Uuid::new_v4(), batch(vec![1, 2, 3, 4], None));
        until_done(&registry, id).await;

        let retried = registry.retry(id).unwrap();
        assert_eq!(retried.id, id);
        assert_eq!(retried.run, 2);
        assert_eq!(retried.summary.total, 2);
        let labels: Vec<&str> = retried.items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["item-1", "item-3"]);
    }

    #[tokio::test]
    async fn test_retry_while_running_is_conflict() {
        let gate = Arc::new(Semaphore::new(0));
        let registry = BatchRegistry::new(RealtimeHub::new(), Retention::default());
        let id = registry.register(
            BatchKind::Profiles,
            Uuid::new_v4(),
            batch(vec![1, 2], Some(Arc::clone(&gate))),
        );

        assert!(matches!(registry.retry(id), Err(AppError::Conflict(_))));
        gate.add_permits(2);
        until_done(&registry, id).await;
    }

    #[tokio::test]
    async fn test_pause_is_visible_in_view() {
        let gate = Arc::new(Semaphore::new(0));
        let registry = BatchRegistry::new(RealtimeHub::new(), Retention::default());
        let id = registry.register(
            BatchKind::Profiles,
            Uuid::new_v4(),
            batch(vec![2, 4, 6, 8], Some(Arc::clone(&gate))),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.view(id).unwrap().summary.processing < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        registry.pause(id).unwrap();
        gate.add_permits(2);
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.view(id).unwrap().summary.completed < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let view = registry.view(id).unwrap();
        assert!(view.summary.paused);
        assert_eq!(view.summary.pending, 2);
        assert_eq!(view.summary.processing, 0);

        registry.resume(id).unwrap();
        gate.add_permits(2);
        assert_eq!(until_done(&registry, id).await.summary.completed, 4);
    }

    #[tokio::test]
    async fn test_owner_notified_on_completion() {
        let hub = RealtimeHub::new();
        let owner = Uuid::new_v4();
        let mut connection = hub.register(owner);
        let registry = BatchRegistry::new(hub.clone(), Retention::default());

        let id = registry.register(BatchKind::Profiles, owner, batch(vec![2, 3, 4], None));

        let outbound = tokio::time::timeout(Duration::from_secs(5), connection.outbound.recv())
            .await
            .unwrap();
        match outbound {
            Some(Outbound::Message(ServerMessage::Notification(n))) => {
                assert_eq!(n.kind, "batch_completed");
                assert_eq!(n.message, "2 of 3 completed, 1 failed");
                assert_eq!(n.data["batchId"], json!(id));
                assert_eq!(n.data["batchKind"], json!("profiles"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn until_evicted(registry: &BatchRegistry, id: Uuid) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.view(id).is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("batch was not evicted");
    }

    #[tokio::test]
    async fn test_finished_batch_evicted_after_ttl() {
        let registry = BatchRegistry::new(
            RealtimeHub::new(),
            Retention {
                ttl: Duration::ZERO,
                max_finished: 10,
            },
        );
        let id = registry.register(BatchKind::Uploads, Uuid::new_v4(), batch(vec![2], None));

        until_evicted(&registry, id).await;
        assert!(matches!(registry.view(id), Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_oldest_finished_batch_evicted_beyond_limit() {
        let registry = BatchRegistry::new(
            RealtimeHub::new(),
            Retention {
                ttl: Duration::from_secs(3600),
                max_finished: 1,
            },
        );
        let first = registry.register(BatchKind::Profiles, Uuid::new_v4(), batch(vec![2], None));
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.view(first).unwrap().finished_at.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let second = registry.register(BatchKind::Profiles, Uuid::new_v4(), batch(vec![4], None));
        until_evicted(&registry, first).await;
        assert_eq!(until_done(&registry, second).await.summary.completed, 1);
    }

    #[tokio::test]
    async fn test_running_batch_is_never_evicted() {
        let gate = Arc::new(Semaphore::new(0));
        let registry = BatchRegistry::new(
            RealtimeHub::new(),
            Retention {
                ttl: Duration::ZERO,
                max_finished: 0,
            },
        );
        let running = registry.register(
            BatchKind::Profiles,
            Uuid::new_v4(),
            batch(vec![2], Some(Arc::clone(&gate))),
        );
        let done = registry.register(BatchKind::Profiles, Uuid::new_v4(), batch(vec![4], None));
        until_evicted(&registry, done).await;

        assert!(registry.view(running).is_ok());
        gate.add_permits(1);
        until_evicted(&registry, running).await;
    }
}
