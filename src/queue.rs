//! Public handle to the knowledge task queue.
//!
//! `TaskQueue::start` spawns the single worker that drains tasks in enqueue
//! order. Clones share the same table and worker, so a handle can be passed to
//! every request handler that needs to enqueue or poll.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::{QueueStats, Task, TaskId, TaskKind};
use crate::services::Services;
use crate::worker::{Command, Worker};
use crate::worker_scheduler::TaskTable;

const SHUT_DOWN: &str = "task queue is shut down";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Run every task already queued, then stop.
  Drain,
  /// Mark queued tasks failed without running them.
  Abandon,
}

#[derive(Clone)]
pub struct TaskQueue {
  inner: Arc<Inner>,
}

struct Inner {
  table: Arc<TaskTable>,
  sender: UnboundedSender<Command>,
  retention: Duration,
  closed: AtomicBool,
  abandon: Arc<AtomicBool>,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
  /// Spawns the worker on the current tokio runtime.
  pub fn start(config: &Config, services: Services) -> Self {
    let table = Arc::new(TaskTable::new());
    let abandon = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = mpsc::unbounded_channel();

    let worker = Worker {
      table: table.clone(),
      services,
      retention: config.retention,
      abandon: abandon.clone(),
    };
    let handle = tokio::spawn(worker.run(receiver));

    Self {
      inner: Arc::new(Inner {
        table,
        sender,
        retention: config.retention,
        closed: AtomicBool::new(false),
        abandon,
        worker: Mutex::new(Some(handle)),
      }),
    }
  }

  /// Records the task and hands it to the worker. The payload is not inspected
  /// here; a malformed one fails the task when it runs.
  pub async fn enqueue(&self, kind: TaskKind, subject_id: impl Into<String>, payload: Value) -> TaskId {
    let subject_id = subject_id.into();
    let task = Task::new(kind, subject_id.clone(), payload);
    let task_id = task.id.clone();
    self.inner.table.insert(task).await;

    if self.inner.closed.load(Ordering::SeqCst) {
      self.refuse(&task_id).await;
      return task_id;
    }
    if self.inner.sender.send(Command::Run(task_id.clone())).is_err() {
      error!("Task worker is gone, cannot run task {}", task_id);
      self.refuse(&task_id).await;
      return task_id;
    }

    info!("Task {} queued ({} for knowledge {})", task_id, kind, subject_id);
    task_id
  }

  pub async fn get_status(&self, task_id: &TaskId) -> Option<Task> {
    self.inner.table.get(task_id).await
  }

  /// Pending and processing tasks in enqueue order, as of the call.
  pub async fn list_active(&self) -> std::vec::IntoIter<Task> {
    self.inner.table.active().await.into_iter()
  }

  pub async fn stats(&self) -> QueueStats {
    self.inner.table.stats().await
  }

  /// Stops the worker and waits for it. Later enqueues are recorded as failed.
  pub async fn shutdown(&self, mode: ShutdownMode) {
    if self.inner.closed.swap(true, Ordering::SeqCst) {
      return;
    }
    if mode == ShutdownMode::Abandon {
      self.inner.abandon.store(true, Ordering::SeqCst);
    }
    info!("Shutting down task queue ({:?})", mode);

    // Anything already queued sits ahead of this in the channel.
    let _ = self.inner.sender.send(Command::Shutdown);
    let handle = self.inner.worker.lock().await.take();
    if let Some(handle) = handle {
      if let Err(e) = handle.await {
        error!("Task worker ended abnormally: {:?}", e);
      }
    }

    // Enqueues racing the shutdown may have landed behind it in the channel.
    for task_id in self.inner.table.fail_pending(SHUT_DOWN).await {
      warn!("Task {} refused: {}", task_id, SHUT_DOWN);
      self.inner.table.evict_after(task_id, self.inner.retention);
    }
  }

  // A shutdown running concurrently may already have failed and scheduled this task.
  async fn refuse(&self, task_id: &TaskId) {
    if self.inner.table.fail_if_pending(task_id, SHUT_DOWN).await {
      warn!("Task {} refused: {}", task_id, SHUT_DOWN);
      self.inner.table.evict_after(task_id.clone(), self.inner.retention);
    }
  }
}
