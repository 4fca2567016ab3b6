//! Storage backends archives are replicated to.
//!
//! The orchestrator and the verifier only ever see [`StorageBackend`]; each
//! destination kind (local directory, SFTP share, Yandex Disk) lives in its
//! own module.

pub mod local;
#[cfg(test)]
pub mod memory;
pub mod sftp;
pub mod yandex;

use crate::config::StorageKind;
use crate::utils::StorageError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use local::LocalBackend;
#[cfg(test)]
pub use memory::MemoryBackend;
pub use sftp::{SftpBackend, SftpSettings};
pub use yandex::YandexDiskBackend;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Capability set every destination provides. Paths are relative to the
/// backend's configured root.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Liveness probe. Transient unavailability is `false`, never an error.
    async fn is_available(&self) -> bool;

    /// Copy a local file to `dest`.
    async fn copy(&self, source: &Path, dest: &str) -> StorageResult<()>;

    /// Entry names under `path`, without `.` and `..`.
    async fn scan_dir(&self, path: &str) -> StorageResult<Vec<String>>;

    async fn file_exists(&self, path: &str) -> StorageResult<bool>;

    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Byte size of `path`; [`StorageError::NotFound`] when absent.
    async fn get_size(&self, path: &str) -> StorageResult<u64>;
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    async fn is_available(&self) -> bool {
        (**self).is_available().await
    }

    async fn copy(&self, source: &Path, dest: &str) -> StorageResult<()> {
        (**self).copy(source, dest).await
    }

    async fn scan_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        (**self).scan_dir(path).await
    }

    async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        (**self).file_exists(path).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        (**self).delete(path).await
    }

    async fn get_size(&self, path: &str) -> StorageResult<u64> {
        (**self).get_size(path).await
    }
}

/// Build the backend for a configured storage kind.
pub fn connect(kind: &StorageKind) -> StorageResult<Box<dyn StorageBackend>> {
    let backend: Box<dyn StorageBackend> = match kind {
        StorageKind::Local { path } => Box::new(LocalBackend::new(path)),
        StorageKind::Sftp {
            host,
            port,
            username,
            password,
            path,
        } => Box::new(SftpBackend::new(SftpSettings {
            host: host.clone(),
            port: *port,
            username: username.clone(),
            password: password.clone(),
            root: path.clone(),
        })),
        StorageKind::YandexDisk { token, path } => {
            Box::new(YandexDiskBackend::new(token.clone(), path.clone())?)
        }
    };
    Ok(backend)
}

/// Join a backend root and a relative name with a single `/`.
pub(crate) fn join_remote(root: &str, name: &str) -> String {
    let root = root.trim_end_matches('/');
    let name = name.trim_matches('/');
    match (root.is_empty(), name.is_empty()) {
        (true, _) => format!("/{name}"),
        (false, true) => root.to_string(),
        (false, false) => format!("{root}/{name}"),
    }
}
