use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Failed)
    }
}

/// Per-item state within one batch run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemStatus<O> {
    /// Position in the run's input list.
    pub index: usize,
    /// Candidate id or file name, for display.
    pub label: String,
    pub status: ItemState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<O>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl<O> BatchItemStatus<O> {
    pub fn pending(index: usize, label: String) -> Self {
        Self {
            index,
            label,
            status: ItemState::Pending,
            error: None,
            result: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Whole-run state as published by the driver. Always replaced wholesale.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot<O> {
    pub items: Vec<BatchItemStatus<O>>,
    pub concurrency: usize,
    pub paused: bool,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// `(completed + failed) / total * 100`.
    pub progress: f64,
    /// Mean duration over completed items only.
    pub average_duration_ms: Option<f64>,
    pub concurrency: usize,
    pub paused: bool,
    pub done: bool,
}

impl<O> BatchSnapshot<O> {
    pub fn count(&self, state: ItemState) -> usize {
        self.items.iter().filter(|i| i.status == state).count()
    }

    pub fn summary(&self) -> BatchSummary {
        let total = self.items.len();
        let completed = self.count(ItemState::Completed);
        let failed = self.count(ItemState::Failed);
        let progress = if total == 0 {
            0.0
        } else {
            (completed + failed) as f64 / total as f64 * 100.0
        };

        let durations: Vec<i64> = self
            .items
            .iter()
            .filter(|i| i.status == ItemState::Completed)
            .filter_map(|i| i.duration_ms())
            .collect();
        let average_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
        };

        BatchSummary {
            total,
            pending: self.count(ItemState::Pending),
            processing: self.count(ItemState::Processing),
            completed,
            failed,
            progress,
            average_duration_ms,
            concurrency: self.concurrency,
            paused: self.paused,
            done: self.done,
        }
    }
}
