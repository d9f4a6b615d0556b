//! Per-task status tracking
//!
//! [`StatusSink`] is a cloneable handle over a shared map from task id to
//! [`TaskStatus`]. The orchestrator feeds it every [`Event`] it emits; UIs
//! poll [`StatusSink::snapshot`] or subscribe to the event stream instead.
//!
//! Updates may arrive duplicated or out of order from concurrent workers, so
//! the sink enforces two rules itself: a task's fraction never decreases,
//! and once a task is Completed or Failed no later update changes it.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{Event, TaskId, TaskState, TaskStatus};

/// Shared, concurrency-safe task status map
#[derive(Clone, Debug, Default)]
pub struct StatusSink {
    inner: Arc<RwLock<HashMap<TaskId, TaskStatus>>>,
}

impl StatusSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a task to `state`.
    ///
    /// Returns false (and changes nothing) if the task already reached a
    /// terminal state.
    pub async fn update(&self, id: TaskId, state: TaskState) -> bool {
        let mut map = self.inner.write().await;
        let status = map
            .entry(id)
            .or_insert_with(|| TaskStatus::new(TaskState::Pending));
        if status.state.is_terminal() {
            return false;
        }
        status.state = state;
        if state == TaskState::Completed {
            status.fraction = 1.0;
        }
        status.updated_at = Utc::now();
        true
    }

    /// Apply an orchestrator event
    pub async fn record(&self, event: &Event) {
        let Some(id) = event.task_id() else {
            return;
        };

        let mut map = self.inner.write().await;
        let status = map
            .entry(id)
            .or_insert_with(|| TaskStatus::new(TaskState::Pending));
        if status.state.is_terminal() {
            return;
        }

        match event {
            Event::TaskQueued { .. } => {}
            Event::TaskStarted { attempt, .. } => {
                status.state = TaskState::InProgress;
                status.attempts = status.attempts.max(*attempt);
            }
            Event::TaskProgress {
                fraction,
                speed_bps,
                ..
            } => {
                status.state = TaskState::InProgress;
                status.fraction = status.fraction.max(fraction.clamp(0.0, 1.0));
                if speed_bps.is_some() {
                    status.speed_bps = *speed_bps;
                }
            }
            Event::TaskRetrying { error, .. } => {
                status.state = TaskState::Pending;
                status.error = Some(error.clone());
                status.speed_bps = None;
            }
            Event::TaskCompleted { path, .. } => {
                status.state = TaskState::Completed;
                status.fraction = 1.0;
                status.output = Some(path.clone());
                status.error = None;
                status.speed_bps = None;
            }
            Event::TaskFailed {
                error, will_retry, ..
            } => {
                status.state = if *will_retry {
                    TaskState::Pending
                } else {
                    TaskState::Failed
                };
                status.error = Some(error.clone());
                status.speed_bps = None;
            }
            Event::BatchPassStarted { .. } | Event::BatchFinished { .. } => {}
        }
        status.updated_at = Utc::now();
    }

    /// Copy of every task's status
    pub async fn snapshot(&self) -> HashMap<TaskId, TaskStatus> {
        self.inner.read().await.clone()
    }

    /// One task's status
    pub async fn get(&self, id: TaskId) -> Option<TaskStatus> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Forget every task
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Number of tracked tasks in each state
    pub async fn counts(&self) -> HashMap<TaskState, usize> {
        let map = self.inner.read().await;
        let mut counts = HashMap::new();
        for status in map.values() {
            *counts.entry(status.state).or_insert(0) += 1;
        }
        counts
    }
}
