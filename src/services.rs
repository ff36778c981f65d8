//! Seams to the two external systems a task talks to.
//!
//! Concrete bindings for the hosted corpus and the metadata database live with
//! the caller; the queue only ever sees these traits.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ExternalDocRef, MetadataUpdate};

/// The external document index. It has no update primitive, so an update is a delete followed by an upload.
#[async_trait]
pub trait IndexingService: Send + Sync {
  async fn upload(&self, file_path: &Path, display_name: &str, description: Option<&str>) -> Result<ExternalDocRef>;

  async fn delete(&self, doc_ref: &ExternalDocRef) -> Result<()>;
}

/// Store holding the knowledge metadata records, keyed by subject id.
#[async_trait]
pub trait MetadataStore: Send + Sync {
  async fn update(&self, subject_id: &str, fields: MetadataUpdate) -> Result<()>;
}

#[derive(Clone)]
pub struct Services {
  pub indexer: Arc<dyn IndexingService>,
  pub store: Arc<dyn MetadataStore>,
}

impl Services {
  pub fn new(indexer: Arc<dyn IndexingService>, store: Arc<dyn MetadataStore>) -> Self {
    Self { indexer, store }
  }
}
