//! Local or mounted directory storage.

use super::{StorageBackend, StorageResult};
use crate::utils::StorageError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_matches('/'))
    }
}

fn not_found(e: std::io::Error, name: &str) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    /// Writable check: create and remove a probe file in the root.
    async fn is_available(&self) -> bool {
        let stamp = chrono::Utc::now().timestamp();
        let probe = self.root.join(format!(".avail-{stamp}"));

        if let Err(e) = tokio::fs::write(&probe, b"").await {
            tracing::debug!(root = %self.root.display(), "Availability probe failed: {}", e);
            return false;
        }
        tokio::fs::remove_file(&probe).await.is_ok()
    }

    async fn copy(&self, source: &Path, dest: &str) -> StorageResult<()> {
        tokio::fs::copy(source, self.resolve(dest)).await?;
        Ok(())
    }

    async fn scan_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(self.resolve(path))
            .await
            .map_err(|e| not_found(e, path))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // a lossy name would not resolve back to the file
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!(path = %entry.path().display(), "Skipping non-UTF-8 entry");
                continue;
            };
            if name != "." && name != ".." {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        tokio::fs::remove_file(self.resolve(path))
            .await
            .map_err(|e| not_found(e, path))
    }

    async fn get_size(&self, path: &str) -> StorageResult<u64> {
        let metadata = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| not_found(e, path))?;
        Ok(metadata.len())
    }
}
