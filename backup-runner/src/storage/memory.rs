//! In-memory storage with fault injection, for exercising the verifier and
//! the orchestrator without a real destination.

use super::{StorageBackend, StorageResult};
use crate::utils::StorageError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryBackend {
    files: Mutex<BTreeMap<String, u64>>,
    unavailable: AtomicBool,
    ignore_deletes: AtomicBool,
    size_skew: AtomicI64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing remote file.
    pub fn with_file(self, name: &str, size: u64) -> Self {
        self.lock().insert(key(name), size);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }

    /// Report sizes off by `skew` bytes, as a truncated upload would.
    pub fn set_size_skew(&self, skew: i64) {
        self.size_skew.store(skew, Ordering::Relaxed);
    }

    /// Accept deletes without removing anything.
    pub fn set_ignore_deletes(&self, ignore: bool) {
        self.ignore_deletes.store(ignore, Ordering::Relaxed);
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, u64>> {
        // a poisoned map is still a consistent map
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn key(name: &str) -> String {
    name.trim_matches('/').to_string()
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::Relaxed)
    }

    async fn copy(&self, source: &Path, dest: &str) -> StorageResult<()> {
        let size = tokio::fs::metadata(source).await?.len();
        self.lock().insert(key(dest), size);
        Ok(())
    }

    async fn scan_dir(&self, _path: &str) -> StorageResult<Vec<String>> {
        Ok(self.names())
    }

    async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.lock().contains_key(&key(path)))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let mut files = self.lock();
        if !files.contains_key(&key(path)) {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if !self.ignore_deletes.load(Ordering::Relaxed) {
            files.remove(&key(path));
        }
        Ok(())
    }

    async fn get_size(&self, path: &str) -> StorageResult<u64> {
        let size = *self
            .lock()
            .get(&key(path))
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let skew = self.size_skew.load(Ordering::Relaxed);
        Ok(size.saturating_add_signed(skew))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_files() -> anyhow::Result<()> {
        let backend = MemoryBackend::new().with_file("/a.tar.gz", 10);
        assert!(backend.file_exists("a.tar.gz").await?);
        assert_eq!(backend.get_size("a.tar.gz").await?, 10);

        backend.set_size_skew(-1);
        assert_eq!(backend.get_size("a.tar.gz").await?, 9);
        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_delete_keeps_file() -> anyhow::Result<()> {
        let backend = MemoryBackend::new().with_file("a.tar.gz", 10);
        backend.set_ignore_deletes(true);
        backend.delete("a.tar.gz").await?;
        assert!(backend.file_exists("a.tar.gz").await?);
        Ok(())
    }
}
