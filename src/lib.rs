pub mod config;
pub mod logging;
pub mod models;
pub mod queue;
pub mod services;
mod worker_scheduler;
pub mod worker_processing;
mod worker;

pub use config::Config;
pub use models::{ExternalDocRef, MetadataUpdate, Task, TaskId, TaskKind, TaskStatus};
pub use queue::{ShutdownMode, TaskQueue};
pub use services::{IndexingService, MetadataStore, Services};
