use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{DeletePayload, MetadataUpdate, UpdatePayload, UploadPayload};
use crate::services::Services;

pub async fn process_upload_task(subject_id: &str, payload: &Value, services: &Services) -> Result<()> {
  let upload: UploadPayload = serde_json::from_value(payload.clone()).context("Invalid upload payload")?;
  info!("Uploading {} for knowledge {}", upload.display_name, subject_id);

  let result = upload_and_record(subject_id, &upload, services).await;
  remove_temp_file(&upload.file_path).await;
  result
}

pub async fn process_update_task(subject_id: &str, payload: &Value, services: &Services) -> Result<()> {
  let update: UpdatePayload = serde_json::from_value(payload.clone()).context("Invalid update payload")?;
  info!("Replacing document for knowledge {} with {}", subject_id, update.upload.display_name);

  if let Some(old_ref) = update.old_external_ref.as_ref().filter(|r| !r.is_blank()) {
    // The old document may already be gone; the replacement goes ahead either way.
    if let Err(e) = services.indexer.delete(old_ref).await {
      warn!("Knowledge {}: failed to delete old document {}: {:#}", subject_id, old_ref, e);
    }
  }

  let result = upload_and_record(subject_id, &update.upload, services).await;
  remove_temp_file(&update.upload.file_path).await;
  result
}

pub async fn process_delete_task(subject_id: &str, payload: &Value, services: &Services) -> Result<()> {
  let delete: DeletePayload = if payload.is_null() {
    DeletePayload::default()
  } else {
    serde_json::from_value(payload.clone()).context("Invalid delete payload")?
  };

  match delete.external_ref.filter(|r| !r.is_blank()) {
    Some(doc_ref) => {
      services
        .indexer
        .delete(&doc_ref)
        .await
        .with_context(|| format!("Failed to delete document {} from the index", doc_ref))?;
      info!("Deleted document {} for knowledge {}", doc_ref, subject_id);
    }
    None => debug!("Knowledge {} has no indexed document, nothing to delete", subject_id),
  }
  Ok(())
}

// The metadata record is only touched once the index has accepted the file.
async fn upload_and_record(subject_id: &str, upload: &UploadPayload, services: &Services) -> Result<()> {
  let doc_ref = services
    .indexer
    .upload(&upload.file_path, &upload.display_name, upload.description.as_deref())
    .await
    .with_context(|| format!("Failed to upload {} to the index", upload.display_name))?;

  services
    .store
    .update(subject_id, MetadataUpdate::indexed(doc_ref.clone()))
    .await
    .with_context(|| format!("Failed to record document {} on knowledge {}", doc_ref, subject_id))?;

  info!("Knowledge {} indexed as {}", subject_id, doc_ref);
  Ok(())
}

async fn remove_temp_file(path: &Path) {
  match tokio::fs::remove_file(path).await {
    Ok(()) => debug!("Removed temp file {}", path.display()),
    Err(e) if e.kind() == ErrorKind::NotFound => debug!("Temp file {} already gone", path.display()),
    Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{ExternalDocRef, KnowledgeStatus};
  use crate::services::{IndexingService, MetadataStore};
  use anyhow::bail;
  use async_trait::async_trait;
  use serde_json::json;
  use std::path::PathBuf;
  use std::sync::{Arc, Mutex};

  #[derive(Default)]
  struct RecordingIndex {
    fail_upload: bool,
    fail_delete: bool,
    calls: Mutex<Vec<String>>,
  }

  #[async_trait]
  impl IndexingService for RecordingIndex {
    async fn upload(&self, file_path: &Path, display_name: &str, _description: Option<&str>) -> Result<ExternalDocRef> {
      self.calls.lock().unwrap().push(format!("upload {}", display_name));
      if self.fail_upload {
        bail!("corpus rejected {}", file_path.display());
      }
      Ok(ExternalDocRef::new(format!("doc/{}", display_name)))
    }

    async fn delete(&self, doc_ref: &ExternalDocRef) -> Result<()> {
      self.calls.lock().unwrap().push(format!("delete {}", doc_ref));
      if self.fail_delete {
        bail!("document {} not found", doc_ref);
      }
      Ok(())
    }
  }

  #[derive(Default)]
  struct RecordingStore {
    updates: Mutex<Vec<(String, MetadataUpdate)>>,
  }

  #[async_trait]
  impl MetadataStore for RecordingStore {
    async fn update(&self, subject_id: &str, fields: MetadataUpdate) -> Result<()> {
      self.updates.lock().unwrap().push((subject_id.to_string(), fields));
      Ok(())
    }
  }

  fn services(index: RecordingIndex) -> (Services, Arc<RecordingIndex>, Arc<RecordingStore>) {
    let index = Arc::new(index);
    let store = Arc::new(RecordingStore::default());
    (Services::new(index.clone(), store.clone()), index, store)
  }

  fn temp_upload(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, "knowledge").unwrap();
    path
  }

  #[tokio::test]
  async fn upload_records_ref_and_removes_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_upload(&dir, "a.txt");
    let (services, _, store) = services(RecordingIndex::default());

    let payload = json!({ "file_path": path, "display_name": "a.txt", "description": "faq" });
    process_upload_task("k1", &payload, &services).await.unwrap();

    let updates = store.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "k1");
    assert_eq!(updates[0].1.external_ref, Some(ExternalDocRef::new("doc/a.txt")));
    assert_eq!(updates[0].1.status, Some(KnowledgeStatus::Completed));
    assert!(!path.exists());
  }

  #[tokio::test]
  async fn failed_upload_leaves_metadata_alone_but_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_upload(&dir, "a.txt");
    let (services, _, store) = services(RecordingIndex { fail_upload: true, ..Default::default() });

    let payload = json!({ "file_path": path, "display_name": "a.txt" });
    let err = process_upload_task("k1", &payload, &services).await.unwrap_err();

    assert!(format!("{:#}", err).contains("corpus rejected"));
    assert!(store.updates.lock().unwrap().is_empty());
    assert!(!path.exists());
  }

  #[tokio::test]
  async fn missing_temp_file_does_not_fail_upload() {
    let (services, _, _) = services(RecordingIndex::default());
    let payload = json!({ "file_path": "/nonexistent/ktq/a.txt", "display_name": "a.txt" });
    process_upload_task("k1", &payload, &services).await.unwrap();
  }

  #[tokio::test]
  async fn cleanup_error_does_not_fail_upload() {
    let dir = tempfile::tempdir().unwrap();
    let (services, _, store) = services(RecordingIndex::default());

    // remove_file refuses a directory, which is not a NotFound error
    let payload = json!({ "file_path": dir.path(), "display_name": "a.txt" });
    process_upload_task("k1", &payload, &services).await.unwrap();

    assert_eq!(store.updates.lock().unwrap().len(), 1);
    assert!(dir.path().is_dir());
  }

  #[tokio::test]
  async fn malformed_payload_is_an_error() {
    let (services, index, _) = services(RecordingIndex::default());
    let err = process_upload_task("k1", &json!({ "display_name": 7 }), &services).await.unwrap_err();
    assert!(err.to_string().contains("Invalid upload payload"));
    assert!(index.calls.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn update_deletes_old_then_uploads_new() {
    let (services, index, store) = services(RecordingIndex::default());
    let payload = json!({ "old_external_ref": "doc/old", "file_path": "/nonexistent/b.txt", "display_name": "b.txt" });
    process_update_task("k1", &payload, &services).await.unwrap();

    assert_eq!(*index.calls.lock().unwrap(), vec!["delete doc/old", "upload b.txt"]);
    assert_eq!(store.updates.lock().unwrap()[0].1.external_ref, Some(ExternalDocRef::new("doc/b.txt")));
  }

  #[tokio::test]
  async fn update_without_old_ref_just_uploads() {
    let (services, index, _) = services(RecordingIndex::default());
    let payload = json!({ "old_external_ref": "", "file_path": "/nonexistent/b.txt", "display_name": "b.txt" });
    process_update_task("k1", &payload, &services).await.unwrap();
    assert_eq!(*index.calls.lock().unwrap(), vec!["upload b.txt"]);
  }

  #[tokio::test]
  async fn delete_is_a_noop_without_ref() {
    let (services, index, store) = services(RecordingIndex::default());
    process_delete_task("k1", &Value::Null, &services).await.unwrap();
    process_delete_task("k1", &json!({ "external_ref": null }), &services).await.unwrap();
    process_delete_task("k1", &json!({}), &services).await.unwrap();
    assert!(index.calls.lock().unwrap().is_empty());
    assert!(store.updates.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn delete_propagates_index_errors() {
    let (services, _, _) = services(RecordingIndex { fail_delete: true, ..Default::default() });
    let err = process_delete_task("k1", &json!({ "external_ref": "doc/1" }), &services).await.unwrap_err();
    assert!(format!("{:#}", err).contains("not found"));
  }
}
