use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::error;

/// Append-only, timestamped log of failures meant for the operator.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    path: PathBuf,
}

impl DiagnosticLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Failing to write the log is itself only logged,
    /// so recording a failure can never mask the original error.
    pub async fn record(&self, context: &str, detail: &(dyn Display + Sync)) {
        let entry = format!("{}:    {}: {}\n", Utc::now().to_rfc3339(), context, detail);

        if let Err(e) = self.append(entry.as_bytes()).await {
            error!(
                "Failed to write diagnostic log {}: {}",
                self.path.display(),
                e
            );
        }
    }

    async fn append(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }
}
