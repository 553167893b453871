//! Task store — lifecycle-enforcing persistence for tasks.
//!
//! The store owns every task record and is the single authority on state
//! transitions. Callers can only move a task along the transition table;
//! terminal tasks are frozen except for artifact appends. The provided
//! [`InMemoryTaskStore`] keeps everything in a `HashMap` and is suitable
//! for single-process deployments; alternative stores implement the
//! [`TaskStore`] trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{A2AError, A2AResult};
use crate::types::{Artifact, Message, Task, TaskState, TaskStatus};

/// Fallback page size for [`TaskStore::list`] when the caller supplies a
/// non-positive limit.
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Whether `set_state` may move a task from `from` to `to`.
///
/// Cancellation is not part of this table; [`TaskStore::cancel`] may leave
/// any non-terminal state.
pub fn transition_allowed(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    matches!(
        (from, to),
        (Submitted, Working)
            | (
                Working,
                Completed | Failed | Canceled | InputRequired | AuthRequired | Rejected
            )
            | (InputRequired, Working | Canceled)
            | (AuthRequired, Working | Canceled)
    )
}

/// Trait for persisting and mutating tasks.
///
/// Implementations must be safe for concurrent use; operations on the same
/// task are serialized internally.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task in `submitted` state, stamped now.
    ///
    /// Fails with [`A2AError::TaskExists`] if the ID is already present.
    async fn create(&self, id: &str, context_id: &str) -> A2AResult<Task>;

    /// Retrieve a snapshot of a task.
    async fn get(&self, id: &str) -> A2AResult<Task>;

    /// Transition a task to `new_state`, attaching an optional status
    /// message and advancing the status timestamp.
    ///
    /// Fails with [`A2AError::TerminalTask`] if the task is already
    /// terminal, or [`A2AError::InvalidTransition`] if the move is not in
    /// the transition table.
    async fn set_state(
        &self,
        id: &str,
        new_state: TaskState,
        message: Option<Message>,
    ) -> A2AResult<()>;

    /// Cancel a task from any non-terminal state, bypassing the normal
    /// transition table.
    async fn cancel(&self, id: &str) -> A2AResult<()>;

    /// Append artifacts to a task. Does not touch state or timestamp, and
    /// is permitted on terminal tasks.
    async fn add_artifacts(&self, id: &str, artifacts: Vec<Artifact>) -> A2AResult<()>;

    /// Append a message to the task's history. Does not touch state or
    /// timestamp.
    async fn append_history(&self, id: &str, message: Message) -> A2AResult<()>;

    /// List tasks in insertion order, filtered by context (empty string
    /// means all), with offset/limit pagination. A limit ≤ 0 falls back to
    /// [`DEFAULT_LIST_LIMIT`].
    async fn list(&self, context_id: &str, limit: i64, offset: i64) -> A2AResult<Vec<Task>>;

    /// Delete every terminal task whose status timestamp is strictly older
    /// than `cutoff`. Returns the evicted IDs.
    async fn evict_terminal(&self, cutoff: DateTime<Utc>) -> A2AResult<Vec<String>>;
}

/// Map contents plus insertion order, guarded by one lock.
struct StoreInner {
    tasks: HashMap<String, Task>,
    insertion_order: Vec<String>,
}

/// In-memory task store backed by a `HashMap`.
///
/// All task data is lost when the process exits.
pub struct InMemoryTaskStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryTaskStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                tasks: HashMap::new(),
                insertion_order: Vec::new(),
            }),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, id: &str, context_id: &str) -> A2AResult<Task> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(id) {
            return Err(A2AError::TaskExists { id: id.to_string() });
        }

        let task = Task {
            id: id.to_string(),
            context_id: context_id.to_string(),
            kind: "task".to_string(),
            status: TaskStatus::new(TaskState::Submitted),
            artifacts: Vec::new(),
            history: Vec::new(),
            metadata: None,
        };

        inner.tasks.insert(id.to_string(), task.clone());
        inner.insertion_order.push(id.to_string());

        debug!(task_id = %id, context_id = %context_id, "Task created");
        Ok(task)
    }

    async fn get(&self, id: &str) -> A2AResult<Task> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| A2AError::task_not_found(id))
    }

    async fn set_state(
        &self,
        id: &str,
        new_state: TaskState,
        message: Option<Message>,
    ) -> A2AResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| A2AError::task_not_found(id))?;

        let current = task.status.state;
        if current.is_terminal() {
            return Err(A2AError::TerminalTask { id: id.to_string() });
        }
        if !transition_allowed(current, new_state) {
            return Err(A2AError::InvalidTransition {
                from: current,
                to: new_state,
            });
        }

        task.status = TaskStatus {
            state: new_state,
            message,
            timestamp: Some(advance(task.status.timestamp)),
        };

        debug!(task_id = %id, from = %current, to = %new_state, "Task transitioned");
        Ok(())
    }

    async fn cancel(&self, id: &str) -> A2AResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| A2AError::task_not_found(id))?;

        if task.status.state.is_terminal() {
            return Err(A2AError::TerminalTask { id: id.to_string() });
        }

        let from = task.status.state;
        task.status = TaskStatus {
            state: TaskState::Canceled,
            message: None,
            timestamp: Some(advance(task.status.timestamp)),
        };

        debug!(task_id = %id, from = %from, "Task canceled");
        Ok(())
    }

    async fn add_artifacts(&self, id: &str, artifacts: Vec<Artifact>) -> A2AResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| A2AError::task_not_found(id))?;

        debug!(task_id = %id, count = artifacts.len(), "Artifacts appended");
        task.artifacts.extend(artifacts);
        Ok(())
    }

    async fn append_history(&self, id: &str, message: Message) -> A2AResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| A2AError::task_not_found(id))?;

        task.history.push(message);
        Ok(())
    }

    async fn list(&self, context_id: &str, limit: i64, offset: i64) -> A2AResult<Vec<Task>> {
        let limit = if limit <= 0 {
            DEFAULT_LIST_LIMIT as usize
        } else {
            limit as usize
        };
        let offset = offset.max(0) as usize;

        let inner = self.inner.read().await;
        let tasks: Vec<Task> = inner
            .insertion_order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|task| context_id.is_empty() || task.context_id == context_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        debug!(context_id = %context_id, count = tasks.len(), "Listed tasks");
        Ok(tasks)
    }

    async fn evict_terminal(&self, cutoff: DateTime<Utc>) -> A2AResult<Vec<String>> {
        let mut inner = self.inner.write().await;

        let expired: Vec<String> = inner
            .tasks
            .values()
            .filter(|task| {
                task.status.state.is_terminal()
                    && task.status.timestamp.is_some_and(|ts| ts < cutoff)
            })
            .map(|task| task.id.clone())
            .collect();

        let StoreInner {
            tasks,
            insertion_order,
        } = &mut *inner;
        for id in &expired {
            tasks.remove(id);
        }
        insertion_order.retain(|id| tasks.contains_key(id));

        if !expired.is_empty() {
            warn!(count = expired.len(), "Evicted expired terminal tasks");
        }
        Ok(expired)
    }
}

/// Next status timestamp: now, clamped to never run backwards relative to
/// the previous status.
fn advance(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}
