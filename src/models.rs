use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
  /// Millisecond timestamp plus a random suffix.
  pub fn generate() -> Self {
    let suffix = Uuid::new_v4().simple().to_string();
    Self(format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..8]))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<String> for TaskId {
  fn from(id: String) -> Self {
    Self(id)
  }
}

impl From<&str> for TaskId {
  fn from(id: &str) -> Self {
    Self(id.to_string())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
  Upload,
  Delete,
  Update,
}

impl fmt::Display for TaskKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TaskKind::Upload => "upload",
      TaskKind::Delete => "delete",
      TaskKind::Update => "update",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
  Pending,
  Processing,
  Completed,
  Failed,
}

impl TaskStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, TaskStatus::Completed | TaskStatus::Failed)
  }

  pub fn is_active(self) -> bool {
    !self.is_terminal()
  }

  // Pending -> Failed only happens when a queued task is abandoned or refused at shutdown.
  pub fn can_transition_to(self, next: TaskStatus) -> bool {
    matches!(
      (self, next),
      (TaskStatus::Pending, TaskStatus::Processing)
        | (TaskStatus::Pending, TaskStatus::Failed)
        | (TaskStatus::Processing, TaskStatus::Completed)
        | (TaskStatus::Processing, TaskStatus::Failed)
    )
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
  pub id: TaskId,
  pub kind: TaskKind,
  pub subject_id: String,
  pub payload: serde_json::Value,
  pub status: TaskStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl Task {
  pub fn new(kind: TaskKind, subject_id: String, payload: serde_json::Value) -> Self {
    let now = Utc::now();
    Self {
      id: TaskId::generate(),
      kind,
      subject_id,
      payload,
      status: TaskStatus::Pending,
      created_at: now,
      updated_at: now,
      error: None,
    }
  }

  /// Moves to `next` if the lifecycle allows it. Returns false and leaves the task untouched otherwise.
  pub fn transition(&mut self, next: TaskStatus, error: Option<String>) -> bool {
    if !self.status.can_transition_to(next) {
      return false;
    }
    self.status = next;
    self.updated_at = Utc::now();
    if next == TaskStatus::Failed {
      self.error = error;
    }
    true
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalDocRef(pub String);

impl ExternalDocRef {
  pub fn new(doc_ref: impl Into<String>) -> Self {
    Self(doc_ref.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_blank(&self) -> bool {
    self.0.trim().is_empty()
  }
}

impl fmt::Display for ExternalDocRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPayload {
  pub file_path: PathBuf,
  pub display_name: String,
  #[serde(default)]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
  #[serde(default)]
  pub old_external_ref: Option<ExternalDocRef>,
  #[serde(flatten)]
  pub upload: UploadPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletePayload {
  #[serde(default)]
  pub external_ref: Option<ExternalDocRef>,
}

/// Status written to the knowledge record in the metadata store, not the task's status.
/// The queue only ever marks a record indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KnowledgeStatus {
  Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub external_ref: Option<ExternalDocRef>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<KnowledgeStatus>,
}

impl MetadataUpdate {
  pub fn indexed(external_ref: ExternalDocRef) -> Self {
    Self {
      external_ref: Some(external_ref),
      status: Some(KnowledgeStatus::Completed),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
  pub pending: usize,
  pub processing: usize,
  pub completed: usize,
  pub failed: usize,
}
