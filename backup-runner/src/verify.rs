//! Copy and delete wrapped with post-condition checks.
//!
//! A copy is trusted only when the remote size equals the local size captured
//! before the transfer; a delete only when the entry is gone afterwards.
//! Nothing here retries.

use crate::storage::StorageBackend;
use crate::utils::{BackupError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Sizes observed around one copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    pub source_size: u64,
    pub dest_size: u64,
}

impl TransferResult {
    pub fn is_valid(&self) -> bool {
        self.source_size == self.dest_size
    }
}

/// Copy `source` to `dest` on `backend` and check the remote size.
///
/// `source_size` must be read from the staged file before this call, so a
/// local file that changes during the transfer shows up as a mismatch.
pub async fn transfer_and_verify(
    backend: &dyn StorageBackend,
    backend_name: &str,
    source: &Path,
    source_size: u64,
    dest: &str,
) -> Result<TransferResult> {
    if !backend.is_available().await {
        return Err(BackupError::BackendUnavailable(backend_name.to_string()));
    }

    debug!(backend = %backend_name, file = %dest, size = source_size, "Copying archive");
    backend.copy(source, dest).await?;

    let result = TransferResult {
        source_size,
        dest_size: backend.get_size(dest).await?,
    };

    if !result.is_valid() {
        return Err(BackupError::SizeMismatch {
            path: dest.to_string(),
            source_size: result.source_size,
            dest_size: result.dest_size,
        });
    }

    info!(backend = %backend_name, file = %dest, size = source_size, "Archive transferred");
    Ok(result)
}

/// Delete `path` on `backend` and confirm it no longer exists.
pub async fn delete_and_verify(
    backend: &dyn StorageBackend,
    backend_name: &str,
    path: &str,
) -> Result<()> {
    backend.delete(path).await?;

    if backend.file_exists(path).await? {
        return Err(BackupError::DeleteNotApplied {
            path: path.to_string(),
        });
    }

    info!(backend = %backend_name, file = %path, "Archive deleted");
    Ok(())
}
