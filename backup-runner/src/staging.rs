//! Staging area: the local directory archives are built in before they are
//! replicated to every storage.

use crate::archive::is_archive_name;
use std::path::{Path, PathBuf};

/// An archive waiting in the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArchive {
    pub filename: String,
    pub path: PathBuf,
    /// Local size, read before any transfer starts
    pub size: u64,
}

/// Every conventionally named regular file in `dir`, sorted by name.
pub async fn list_staged(dir: &Path) -> std::io::Result<Vec<StagedArchive>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut staged = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let Ok(filename) = entry.file_name().into_string() else {
            continue;
        };
        if !is_archive_name(&filename) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        staged.push(StagedArchive {
            filename,
            path: entry.path(),
            size: metadata.len(),
        });
    }

    staged.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(staged)
}

/// Remove staged archives, leaving unrelated files alone. Returns the names
/// removed.
pub async fn clear_staging(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut removed = Vec::new();
    for archive in list_staged(dir).await? {
        tokio::fs::remove_file(&archive.path).await?;
        tracing::debug!(file = %archive.filename, "Removed staged archive");
        removed.push(archive.filename);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_staged_filters_and_sizes() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("2024-03-01-dir-site.tar.gz"), vec![1u8; 500])?;
        fs::write(dir.path().join("2024-03-01-db-shop.sql.gz"), vec![1u8; 1500])?;
        fs::write(dir.path().join("keep.txt"), b"x")?;
        fs::create_dir(dir.path().join("2024-03-01-fake.tar.gz"))?;

        let staged = list_staged(dir.path()).await?;
        let summary: Vec<(&str, u64)> = staged.iter().map(|s| (s.filename.as_str(), s.size)).collect();
        assert_eq!(
            summary,
            vec![("2024-03-01-db-shop.sql.gz", 1500), ("2024-03-01-dir-site.tar.gz", 500)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_staging_leaves_unrelated_files() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("2024-03-01-dir-site.tar.gz"), b"a")?;
        fs::write(dir.path().join("keep.txt"), b"x")?;

        let removed = clear_staging(dir.path()).await?;
        assert_eq!(removed, vec!["2024-03-01-dir-site.tar.gz"]);
        assert!(dir.path().join("keep.txt").exists());
        assert!(!dir.path().join("2024-03-01-dir-site.tar.gz").exists());
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_utf8_names_are_not_staged() -> std::io::Result<()> {
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new()?;
        fs::write(dir.path().join("2024-03-01-dir-site.tar.gz"), b"a")?;
        let raw = std::ffi::OsStr::from_bytes(b"2024-03-01-dir-\xffsite.tar.gz");
        fs::write(dir.path().join(raw), b"b")?;

        let staged = list_staged(dir.path()).await?;
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].filename, "2024-03-01-dir-site.tar.gz");

        // clearing leaves the unreadable name in place
        clear_staging(dir.path()).await?;
        assert!(dir.path().join(raw).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_staging_dir() {
        let dir = TempDir::new().unwrap();
        assert!(list_staged(&dir.path().join("missing")).await.is_err());
    }
}
