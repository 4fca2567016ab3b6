//! Run orchestration.
//!
//! One run walks `CREATE_ARCHIVES -> (per storage: CHECK_AVAILABLE ->
//! TRANSFER_ALL -> PRUNE) -> CLEAN_STAGING` and always reaches the end. Each
//! archive, each transferred file and each deletion is its own unit of
//! failure: the outcome goes into the [`Report`] and the run moves on.

use crate::archive::classify;
use crate::archive::producer::{ArchiveProducer, BackupTarget, CommandProducer};
use crate::config::Config;
use crate::report::Report;
use crate::retention::{self, RetentionPolicy};
use crate::staging::{self, StagedArchive};
use crate::storage::{self, StorageBackend, StorageResult};
use crate::utils::BackupError;
use crate::verify;
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::info;

/// Listing root on every storage.
const STORAGE_ROOT: &str = "/";

/// A configured storage together with its retention policy.
pub struct Destination {
    pub name: String,
    pub retention: RetentionPolicy,
    backend: StorageResult<Box<dyn StorageBackend>>,
}

impl Destination {
    pub fn new(
        name: impl Into<String>,
        retention: RetentionPolicy,
        backend: Box<dyn StorageBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            retention,
            backend: Ok(backend),
        }
    }

    fn subject(&self) -> String {
        format!("storage {}", self.name)
    }
}

pub struct Orchestrator {
    staging_dir: PathBuf,
    producer: Box<dyn ArchiveProducer>,
    targets: Vec<BackupTarget>,
    destinations: Vec<Destination>,
}

impl Orchestrator {
    pub fn new(staging_dir: impl Into<PathBuf>, producer: Box<dyn ArchiveProducer>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            producer,
            targets: Vec::new(),
            destinations: Vec::new(),
        }
    }

    /// Wire up targets, the command producer and every configured storage.
    /// A storage whose client cannot be built is kept and reported during the
    /// run like an unavailable one.
    pub fn from_config(config: &Config) -> Self {
        let producer = CommandProducer::new(config.dir.clone(), config.archive_timeout);
        let mut orchestrator = Self::new(&config.tmp_dir, Box::new(producer));

        for (name, settings) in &config.directories {
            orchestrator = orchestrator.with_target(BackupTarget::Directory {
                name: name.clone(),
                settings: settings.clone(),
            });
        }
        for (name, settings) in &config.databases {
            orchestrator = orchestrator.with_target(BackupTarget::Database {
                name: name.clone(),
                settings: settings.clone(),
            });
        }

        for storage in &config.storages {
            orchestrator.destinations.push(Destination {
                name: storage.name.clone(),
                retention: storage.retention,
                backend: storage::connect(&storage.kind),
            });
        }

        orchestrator
    }

    pub fn with_target(mut self, target: BackupTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Execute one run for archives dated `date`.
    pub async fn run(&self, date: NaiveDate) -> Report {
        let mut report = Report::new();
        info!(
            targets = self.targets.len(),
            storages = self.destinations.len(),
            "Backup run started"
        );

        self.create_archives(date, &mut report).await;

        match staging::list_staged(&self.staging_dir).await {
            Ok(staged) => {
                for destination in &self.destinations {
                    self.replicate(destination, &staged, &mut report).await;
                }
            }
            Err(e) => report.error("staging", "Failed to list staged archives", e),
        }

        self.clean_staging(&mut report).await;

        info!(
            entries = report.entries().len(),
            errors = report.error_count(),
            "Backup run finished"
        );
        report
    }

    async fn create_archives(&self, date: NaiveDate, report: &mut Report) {
        for target in &self.targets {
            match self.producer.produce(target, &self.staging_dir, date).await {
                Ok(archive) => report.success(
                    target.label(),
                    format!("{} created ({} bytes)", archive.filename, archive.size),
                ),
                Err(e) => report.error(target.label(), "Backup failed", e),
            }
        }
    }

    /// Transfer every staged archive, then prune. Pruning waits for all
    /// transfers so the listing it reads includes them.
    async fn replicate(&self, destination: &Destination, staged: &[StagedArchive], report: &mut Report) {
        let subject = destination.subject();
        let backend = match &destination.backend {
            Ok(backend) => backend.as_ref(),
            Err(e) => {
                report.error(&subject, "Storage could not be set up", e);
                return;
            }
        };

        if !backend.is_available().await {
            report.error(
                &subject,
                "Transfer and cleanup skipped",
                BackupError::BackendUnavailable(destination.name.clone()),
            );
            return;
        }

        let mut failed = 0usize;
        for archive in staged {
            let outcome = verify::transfer_and_verify(
                backend,
                &destination.name,
                &archive.path,
                archive.size,
                &archive.filename,
            )
            .await;

            match outcome {
                Ok(result) => report.success(
                    &subject,
                    format!("{} copied ({} bytes)", archive.filename, result.dest_size),
                ),
                Err(e) => {
                    failed += 1;
                    report.error(&subject, format!("{} was not copied", archive.filename), e);
                }
            }
        }

        if failed > 0 {
            report.error(
                &subject,
                "Old backups were kept",
                format!("{failed} transfer(s) failed, retention skipped"),
            );
            return;
        }

        self.apply_retention(destination, backend, report).await;
    }

    async fn apply_retention(
        &self,
        destination: &Destination,
        backend: &dyn StorageBackend,
        report: &mut Report,
    ) {
        let subject = destination.subject();

        let listing = match backend.scan_dir(STORAGE_ROOT).await {
            Ok(listing) => listing,
            Err(e) => {
                report.error(&subject, "Failed to list stored backups", e);
                return;
            }
        };

        let doomed = retention::prune(&classify(&listing), &destination.retention);
        let mut failed = 0usize;

        for file in &doomed {
            match verify::delete_and_verify(backend, &destination.name, &file.filename).await {
                Ok(()) => report.success(&subject, format!("{} removed", file.filename)),
                Err(e) => {
                    failed += 1;
                    report.error(&subject, format!("{} was not removed", file.filename), e);
                }
            }
        }

        if failed == 0 {
            report.success(
                &subject,
                format!(
                    "Retention applied: at most {} per group, {} removed",
                    destination.retention.limit(),
                    doomed.len()
                ),
            );
        }
    }

    async fn clean_staging(&self, report: &mut Report) {
        match staging::clear_staging(&self.staging_dir).await {
            Ok(removed) => info!(count = removed.len(), "Staging area cleared"),
            Err(e) => report.error("staging", "Failed to clear staging area", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseTarget, DirectoryTarget};
    use crate::report::Severity;
    use crate::storage::MemoryBackend;
    use crate::utils::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::num::NonZeroUsize;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Writes zero-filled archives of a fixed size per group.
    struct FakeProducer {
        sizes: HashMap<String, u64>,
    }

    #[async_trait]
    impl ArchiveProducer for FakeProducer {
        async fn produce(
            &self,
            target: &BackupTarget,
            staging_dir: &Path,
            date: NaiveDate,
        ) -> Result<StagedArchive> {
            let size = *self
                .sizes
                .get(&target.group())
                .ok_or_else(|| BackupError::ArchiveCreation("dump tool failed".into()))?;
            let filename = target.archive_name(date);
            let path = staging_dir.join(&filename);
            tokio::fs::write(&path, vec![0u8; size as usize]).await?;
            Ok(StagedArchive { filename, path, size })
        }
    }

    fn producer(sizes: &[(&str, u64)]) -> Box<dyn ArchiveProducer> {
        Box::new(FakeProducer {
            sizes: sizes.iter().map(|(g, s)| (g.to_string(), *s)).collect(),
        })
    }

    fn site() -> BackupTarget {
        BackupTarget::Directory {
            name: "site".into(),
            settings: DirectoryTarget {
                path: Some("site".into()),
                exclude: vec![],
            },
        }
    }

    fn shop() -> BackupTarget {
        BackupTarget::Database {
            name: "shop".into(),
            settings: DatabaseTarget {
                host: "localhost".into(),
                user: "root".into(),
                pass: String::new(),
                name: "shop".into(),
                ignore: vec![],
            },
        }
    }

    fn limit(n: usize) -> RetentionPolicy {
        RetentionPolicy::new(NonZeroUsize::new(n).unwrap())
    }

    fn destination(name: &str, n: usize, backend: &Arc<MemoryBackend>) -> Destination {
        Destination::new(name, limit(n), Box::new(Arc::clone(backend)))
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn errors(report: &Report) -> Vec<String> {
        report
            .entries()
            .iter()
            .filter(|e| e.severity == Severity::Error)
            .map(|e| format!("{}: {}", e.subject, e.message))
            .collect()
    }

    #[tokio::test]
    async fn test_transfer_then_prune_keeps_newest() {
        let staging = TempDir::new().unwrap();
        // left over from an earlier run
        std::fs::write(staging.path().join("2024-02-01-dir-site.tar.gz"), vec![0u8; 480]).unwrap();

        let remote = Arc::new(MemoryBackend::new().with_file("2024-01-01-dir-site.tar.gz", 470));
        let orchestrator = Orchestrator::new(staging.path(), producer(&[("dir-site", 500)]))
            .with_target(site())
            .with_destination(destination("nas", 2, &remote));

        let report = orchestrator.run(date("2024-03-01")).await;

        assert!(!report.has_errors(), "{report}");
        assert_eq!(
            remote.names(),
            vec!["2024-02-01-dir-site.tar.gz", "2024-03-01-dir-site.tar.gz"]
        );
        assert!(!remote.file_exists("2024-01-01-dir-site.tar.gz").await.unwrap());
        assert!(report
            .entries()
            .iter()
            .any(|e| e.message == "2024-01-01-dir-site.tar.gz removed"));
        // staging cleared
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_second_run_prunes_nothing() {
        let staging = TempDir::new().unwrap();
        let remote = Arc::new(
            MemoryBackend::new()
                .with_file("2024-01-01-dir-site.tar.gz", 500)
                .with_file("2024-01-02-dir-site.tar.gz", 500),
        );
        let orchestrator = Orchestrator::new(staging.path(), producer(&[("dir-site", 500)]))
            .with_target(site())
            .with_destination(destination("nas", 2, &remote));

        orchestrator.run(date("2024-01-03")).await;
        let after_first = remote.names();
        let report = orchestrator.run(date("2024-01-03")).await;

        assert_eq!(remote.names(), after_first);
        assert!(!report.has_errors());
        assert!(report
            .entries()
            .iter()
            .any(|e| e.message == "Retention applied: at most 2 per group, 0 removed"));
    }

    #[tokio::test]
    async fn test_unavailable_storage_does_not_stop_others() {
        let staging = TempDir::new().unwrap();
        let down = Arc::new(MemoryBackend::new().with_file("2023-01-01-dir-site.tar.gz", 1));
        down.set_available(false);
        let up = Arc::new(MemoryBackend::new());

        let orchestrator = Orchestrator::new(staging.path(), producer(&[("dir-site", 500)]))
            .with_target(site())
            .with_destination(destination("down", 1, &down))
            .with_destination(destination("up", 1, &up));

        let report = orchestrator.run(date("2024-03-01")).await;

        assert_eq!(errors(&report), vec!["storage down: Transfer and cleanup skipped"]);
        assert_eq!(down.names(), vec!["2023-01-01-dir-site.tar.gz"]);
        assert_eq!(up.names(), vec!["2024-03-01-dir-site.tar.gz"]);
    }

    #[tokio::test]
    async fn test_failed_archive_does_not_stop_others() {
        let staging = TempDir::new().unwrap();
        let remote = Arc::new(MemoryBackend::new());
        // no size registered for the database: its producer fails
        let orchestrator = Orchestrator::new(staging.path(), producer(&[("dir-site", 500)]))
            .with_target(shop())
            .with_target(site())
            .with_destination(destination("nas", 3, &remote));

        let report = orchestrator.run(date("2024-03-01")).await;

        assert_eq!(errors(&report), vec!["db shop: Backup failed"]);
        assert_eq!(report.entries()[1].subject, "dir site");
        assert_eq!(remote.names(), vec!["2024-03-01-dir-site.tar.gz"]);
    }

    #[tokio::test]
    async fn test_size_mismatch_skips_retention() {
        let staging = TempDir::new().unwrap();
        let remote = Arc::new(
            MemoryBackend::new()
                .with_file("2024-01-01-dir-site.tar.gz", 500)
                .with_file("2024-01-02-dir-site.tar.gz", 500),
        );
        remote.set_size_skew(-1);

        let orchestrator = Orchestrator::new(staging.path(), producer(&[("dir-site", 500), ("db-shop", 2000)]))
            .with_target(site())
            .with_target(shop())
            .with_destination(destination("nas", 1, &remote));

        let report = orchestrator.run(date("2024-03-01")).await;

        // both files attempted, each failure recorded
        assert_eq!(
            errors(&report),
            vec![
                "storage nas: 2024-03-01-db-shop.sql.gz was not copied",
                "storage nas: 2024-03-01-dir-site.tar.gz was not copied",
                "storage nas: Old backups were kept",
            ]
        );
        assert_eq!(remote.names().len(), 4);
    }

    #[tokio::test]
    async fn test_each_failed_deletion_is_reported() {
        let staging = TempDir::new().unwrap();
        let remote = Arc::new(
            MemoryBackend::new()
                .with_file("2024-01-01-dir-site.tar.gz", 500)
                .with_file("2024-01-02-dir-site.tar.gz", 500),
        );
        remote.set_ignore_deletes(true);

        let orchestrator = Orchestrator::new(staging.path(), producer(&[("dir-site", 500)]))
            .with_target(site())
            .with_destination(destination("nas", 1, &remote));

        let report = orchestrator.run(date("2024-03-01")).await;

        assert_eq!(
            errors(&report),
            vec![
                "storage nas: 2024-01-02-dir-site.tar.gz was not removed",
                "storage nas: 2024-01-01-dir-site.tar.gz was not removed",
            ]
        );
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unrelated_remote_files_survive() {
        let staging = TempDir::new().unwrap();
        let remote = Arc::new(
            MemoryBackend::new()
                .with_file("notes.txt", 10)
                .with_file("2024-01-01-dir-site.tar", 10)
                .with_file("2024-01-01-dir-site.tar.gz", 500),
        );
        let orchestrator = Orchestrator::new(staging.path(), producer(&[("dir-site", 500)]))
            .with_target(site())
            .with_destination(destination("nas", 1, &remote));

        orchestrator.run(date("2024-03-01")).await;

        assert_eq!(
            remote.names(),
            vec!["2024-01-01-dir-site.tar", "2024-03-01-dir-site.tar.gz", "notes.txt"]
        );
    }

    #[tokio::test]
    async fn test_missing_staging_dir_is_reported() {
        let staging = TempDir::new().unwrap();
        let remote = Arc::new(MemoryBackend::new());
        let orchestrator = Orchestrator::new(staging.path().join("missing"), producer(&[]))
            .with_destination(destination("nas", 1, &remote));

        let report = orchestrator.run(date("2024-03-01")).await;

        assert_eq!(
            errors(&report),
            vec![
                "staging: Failed to list staged archives",
                "staging: Failed to clear staging area",
            ]
        );
    }
}
