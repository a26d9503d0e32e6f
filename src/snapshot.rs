//! Whole-file JSON state store.
//!
//! Every write replaces the file through a temporary sibling that is
//! synced and then renamed over the original, so a crash leaves either
//! the old or the new document on disk.
//!
//! ```json
//! {
//!   "version": 1,
//!   "records": {
//!     "Comic A": { "title": "Comic A", "last_item_title": "Ep1", "last_item_link": "https://..." }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{FeedRecord, StateStore};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    version: u32,
    records: BTreeMap<String, FeedRecord>,
}

#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl SnapshotFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read(&self) -> Result<BTreeMap<String, FeedRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", self.path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                return Err(Error::state_store(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let document: SnapshotDocument = serde_json::from_str(&content).map_err(|e| {
            Error::state_store(format!(
                "state file {} is corrupted: {}",
                self.path.display(),
                e
            ))
        })?;

        if document.version != SNAPSHOT_VERSION {
            warn!(
                "State file version mismatch: expected {}, got {}",
                SNAPSHOT_VERSION, document.version
            );
        }

        Ok(document.records)
    }

    async fn write(&self, records: BTreeMap<String, FeedRecord>) -> Result<()> {
        let document = SnapshotDocument {
            version: SNAPSHOT_VERSION,
            records,
        };
        let json = serde_json::to_string_pretty(&document)?;

        let temp_path = self.temp_path();
        let io_err = |action: &str, path: &Path, e: std::io::Error| {
            Error::state_store(format!("failed to {} {}: {}", action, path.display(), e))
        };

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_err("create", &temp_path, e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| io_err("write", &temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_err("sync", &temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| io_err("replace", &self.path, e))?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for SnapshotFile {
    async fn load_all(&self) -> Result<HashMap<String, FeedRecord>> {
        Ok(self.read().await?.into_iter().collect())
    }

    async fn upsert(&self, record: &FeedRecord) -> Result<()> {
        self.upsert_all(std::slice::from_ref(record)).await
    }

    async fn upsert_all(&self, records: &[FeedRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut current = self.read().await?;
        for record in records {
            current.insert(record.title.clone(), record.clone());
        }
        self.write(current).await?;

        debug!(
            "Wrote {} feed records to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}
