use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::models::{QueueStats, Task, TaskId, TaskStatus};

/// The in-memory task table. Every read and mutation goes through the lock,
/// which is never held across an await on a collaborator.
pub struct TaskTable {
  // Each task is stored with its insertion sequence number.
  tasks: Mutex<HashMap<TaskId, (u64, Task)>>,
  next_seq: AtomicU64,
}

impl TaskTable {
  pub fn new() -> Self {
    Self {
      tasks: Mutex::new(HashMap::new()),
      next_seq: AtomicU64::new(0),
    }
  }

  pub async fn insert(&self, task: Task) {
    let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
    self.tasks.lock().await.insert(task.id.clone(), (seq, task));
  }

  pub async fn get(&self, id: &TaskId) -> Option<Task> {
    self.tasks.lock().await.get(id).map(|(_, task)| task.clone())
  }

  /// Snapshot of pending and processing tasks in enqueue order.
  pub async fn active(&self) -> Vec<Task> {
    let mut active: Vec<(u64, Task)> = self
      .tasks
      .lock()
      .await
      .values()
      .filter(|(_, task)| task.status.is_active())
      .cloned()
      .collect();
    active.sort_by_key(|(seq, _)| *seq);
    active.into_iter().map(|(_, task)| task).collect()
  }

  pub async fn stats(&self) -> QueueStats {
    let tasks = self.tasks.lock().await;
    let mut stats = QueueStats::default();
    for (_, task) in tasks.values() {
      match task.status {
        TaskStatus::Pending => stats.pending += 1,
        TaskStatus::Processing => stats.processing += 1,
        TaskStatus::Completed => stats.completed += 1,
        TaskStatus::Failed => stats.failed += 1,
      }
    }
    stats
  }

  /// Applies a status transition and returns the updated record.
  /// Returns None if the task is gone or the transition is not allowed.
  pub async fn transition(&self, id: &TaskId, next: TaskStatus, error: Option<String>) -> Option<Task> {
    let mut tasks = self.tasks.lock().await;
    let (_, task) = tasks.get_mut(id)?;
    let from = task.status;
    if !task.transition(next, error) {
      error!("Task {}: refusing transition {:?} -> {:?}", id, from, next);
      return None;
    }
    Some(task.clone())
  }

  /// Fails the task only if it is still pending. Returns whether it did.
  pub async fn fail_if_pending(&self, id: &TaskId, reason: &str) -> bool {
    match self.tasks.lock().await.get_mut(id) {
      Some((_, task)) if task.status == TaskStatus::Pending => {
        task.transition(TaskStatus::Failed, Some(reason.to_string()))
      }
      _ => false,
    }
  }

  /// Fails every task still pending and returns their ids.
  pub async fn fail_pending(&self, reason: &str) -> Vec<TaskId> {
    let mut tasks = self.tasks.lock().await;
    tasks
      .values_mut()
      .map(|(_, task)| task)
      .filter(|task| task.status == TaskStatus::Pending)
      .filter_map(|task| {
        task
          .transition(TaskStatus::Failed, Some(reason.to_string()))
          .then(|| task.id.clone())
      })
      .collect()
  }

  async fn remove(&self, id: &TaskId) -> Option<Task> {
    self.tasks.lock().await.remove(id).map(|(_, task)| task)
  }

  /// Removes the task once `delay` has elapsed.
  pub fn evict_after(self: &Arc<Self>, id: TaskId, delay: Duration) {
    let table = Arc::clone(self);
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if table.remove(&id).await.is_some() {
        debug!("Task {} evicted", id);
      }
    });
  }
}
