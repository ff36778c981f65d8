use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

use crate::models::{Task, TaskId, TaskKind, TaskStatus};
use crate::services::Services;
use crate::worker_processing::{process_delete_task, process_update_task, process_upload_task};
use crate::worker_scheduler::TaskTable;

pub(crate) const ABANDONED: &str = "abandoned at shutdown";

#[derive(Debug)]
pub(crate) enum Command {
  Run(TaskId),
  Shutdown,
}

pub(crate) struct Worker {
  pub table: Arc<TaskTable>,
  pub services: Services,
  pub retention: Duration,
  pub abandon: Arc<AtomicBool>,
}

impl Worker {
  /// Drains commands one at a time until shutdown or until every sender is gone.
  pub async fn run(self, mut commands: UnboundedReceiver<Command>) {
    info!("Task worker started");
    while let Some(command) = commands.recv().await {
      match command {
        Command::Run(task_id) => self.process(task_id).await,
        Command::Shutdown => break,
      }
    }
    info!("Task worker stopped");
  }

  async fn process(&self, task_id: TaskId) {
    if self.abandon.load(Ordering::SeqCst) {
      if self
        .table
        .transition(&task_id, TaskStatus::Failed, Some(ABANDONED.to_string()))
        .await
        .is_some()
      {
        warn!("Task {} abandoned at shutdown", task_id);
        self.table.evict_after(task_id, self.retention);
      }
      return;
    }

    let Some(task) = self.table.transition(&task_id, TaskStatus::Processing, None).await else {
      warn!("Task {} is no longer pending, skipping", task_id);
      return;
    };
    info!("Task {}: processing {} for knowledge {}", task.id, task.kind, task.subject_id);

    let outcome = AssertUnwindSafe(dispatch(&task, &self.services)).catch_unwind().await;
    let (status, error) = match outcome {
      Ok(Ok(())) => (TaskStatus::Completed, None),
      Ok(Err(e)) => (TaskStatus::Failed, Some(format!("{:#}", e))),
      Err(panic) => (TaskStatus::Failed, Some(format!("handler panicked: {}", panic_message(&*panic)))),
    };

    match &error {
      None => info!("Task {} processed successfully", task_id),
      Some(message) => error!("Processing failed for task {}: {}", task_id, message),
    }
    self.table.transition(&task_id, status, error).await;
    self.table.evict_after(task_id, self.retention);
  }
}

async fn dispatch(task: &Task, services: &Services) -> Result<()> {
  match task.kind {
    TaskKind::Upload => process_upload_task(&task.subject_id, &task.payload, services).await,
    TaskKind::Delete => process_delete_task(&task.subject_id, &task.payload, services).await,
    TaskKind::Update => process_update_task(&task.subject_id, &task.payload, services).await,
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}
