//! Durable "last seen entry" state, keyed by feed title.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::info;

use crate::config::{StateBackend, StateConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::snapshot::SnapshotFile;

/// The persisted state for one feed identity.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct FeedRecord {
    pub title: String,
    pub last_item_title: String,
    pub last_item_link: String,
}

impl FeedRecord {
    pub fn new(
        title: impl Into<String>,
        last_item_title: impl Into<String>,
        last_item_link: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            last_item_title: last_item_title.into(),
            last_item_link: last_item_link.into(),
        }
    }
}

/// Storage for [`FeedRecord`]s.
///
/// At most one record exists per title. Once a write returns `Ok`, it must
/// be visible to the next `load_all`, including from a new process.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// All records keyed by title. An empty store yields an empty map.
    async fn load_all(&self) -> Result<HashMap<String, FeedRecord>>;

    /// Insert or overwrite a single record atomically.
    async fn upsert(&self, record: &FeedRecord) -> Result<()>;

    /// Insert or overwrite a batch; either every record is stored or none is.
    async fn upsert_all(&self, records: &[FeedRecord]) -> Result<()>;
}

/// Open the configured backend, creating parent directories as needed.
pub async fn open_store(config: &StateConfig) -> Result<Box<dyn StateStore>> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::state_store(format!(
                    "failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    info!(
        "Using {:?} state store at {}",
        config.backend,
        config.path.display()
    );

    match config.backend {
        StateBackend::Sqlite => {
            let db = Database::open(&config.path).await?;
            db.initialize().await?;
            Ok(Box::new(db))
        }
        StateBackend::File => Ok(Box::new(SnapshotFile::new(&config.path))),
    }
}
