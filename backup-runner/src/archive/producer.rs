//! Archive creation: tarballs of directories and gzipped MySQL dumps, built in
//! the staging directory by external tools.

use super::{archive_name, ArchiveKind};
use crate::config::{DatabaseTarget, DirDefaults, DirectoryTarget};
use crate::staging::StagedArchive;
use crate::utils::{BackupError, Result};
use async_compression::tokio::write::GzipEncoder;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Anything smaller is an empty or broken tarball.
const MIN_DIR_ARCHIVE_SIZE: u64 = 100;
/// Anything smaller is a dump without data.
const MIN_DB_ARCHIVE_SIZE: u64 = 1000;

/// One thing to back up.
#[derive(Debug, Clone)]
pub enum BackupTarget {
    Directory { name: String, settings: DirectoryTarget },
    Database { name: String, settings: DatabaseTarget },
}

impl BackupTarget {
    /// Group name embedded in the archive filename.
    pub fn group(&self) -> String {
        match self {
            BackupTarget::Directory { name, .. } => format!("dir-{name}"),
            BackupTarget::Database { name, .. } => format!("db-{name}"),
        }
    }

    pub fn kind(&self) -> ArchiveKind {
        match self {
            BackupTarget::Directory { .. } => ArchiveKind::Tar,
            BackupTarget::Database { .. } => ArchiveKind::Sql,
        }
    }

    /// Report subject, e.g. `dir site`.
    pub fn label(&self) -> String {
        match self {
            BackupTarget::Directory { name, .. } => format!("dir {name}"),
            BackupTarget::Database { name, .. } => format!("db {name}"),
        }
    }

    pub fn archive_name(&self, date: NaiveDate) -> String {
        archive_name(date, &self.group(), self.kind())
    }
}

#[async_trait]
pub trait ArchiveProducer: Send + Sync {
    /// Create one archive for `target` in `staging_dir`, dated `date`.
    async fn produce(
        &self,
        target: &BackupTarget,
        staging_dir: &Path,
        date: NaiveDate,
    ) -> Result<StagedArchive>;
}

/// Producer backed by `tar` and `mysqldump`.
pub struct CommandProducer {
    dir: DirDefaults,
    timeout: Duration,
    dump_program: PathBuf,
}

impl CommandProducer {
    pub fn new(dir: DirDefaults, timeout: Duration) -> Self {
        Self {
            dir,
            timeout,
            dump_program: PathBuf::from("mysqldump"),
        }
    }

    /// Use another dump binary instead of `mysqldump` from `PATH`.
    pub fn with_dump_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.dump_program = program.into();
        self
    }

    async fn archive_directory(
        &self,
        settings: &DirectoryTarget,
        output: &Path,
    ) -> Result<()> {
        let path = settings
            .path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| BackupError::ArchiveCreation("The parameter \"path\" is required".into()))?;
        let root = self
            .dir
            .root_path
            .as_deref()
            .ok_or_else(|| BackupError::ArchiveCreation("dir.root_path is not configured".into()))?;

        let source = root.join(path);
        if !source.exists() {
            return Err(BackupError::ArchiveCreation(format!(
                "Directory \"{}\" does not exist",
                source.display()
            )));
        }

        let args = tar_args(output, root, path, &self.dir.exclude_dirs, &settings.exclude);
        let result = Command::new("tar")
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackupError::ArchiveCreation(format!("Failed to run tar: {e}")))?;

        if !result.status.success() {
            return Err(BackupError::ArchiveCreation(format!(
                "tar exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn dump_database(&self, settings: &DatabaseTarget, output: &Path) -> Result<()> {
        let mut child = Command::new(&self.dump_program)
            .args(dump_args(settings))
            .env("MYSQL_PWD", &settings.pass)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackupError::ArchiveCreation(format!("Failed to run mysqldump: {e}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackupError::ArchiveCreation("mysqldump stdout unavailable".into()))?;
        let messages = tokio::spawn(read_all(child.stderr.take()));

        // stdout is owned by the future, so the pipe closes as soon as it returns
        let compressed = async move {
            let file = tokio::fs::File::create(output).await?;
            let mut encoder = GzipEncoder::new(file);
            tokio::io::copy(&mut stdout, &mut encoder).await?;
            encoder.shutdown().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = compressed {
            if let Err(kill_err) = child.start_kill() {
                tracing::debug!("mysqldump already exited: {}", kill_err);
            }
            let _ = child.wait().await;
            return Err(BackupError::ArchiveCreation(format!(
                "Failed to write {}: {e}",
                output.display()
            )));
        }

        let status = child.wait().await?;
        let messages = messages.await.unwrap_or_default();
        if !status.success() {
            return Err(BackupError::ArchiveCreation(format!(
                "mysqldump exited with {}: {}",
                status,
                messages.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveProducer for CommandProducer {
    async fn produce(
        &self,
        target: &BackupTarget,
        staging_dir: &Path,
        date: NaiveDate,
    ) -> Result<StagedArchive> {
        if !staging_dir.is_dir() {
            return Err(BackupError::ArchiveCreation(format!(
                "Directory {} for backups does not exist",
                staging_dir.display()
            )));
        }

        let filename = target.archive_name(date);
        let output = staging_dir.join(&filename);

        let work = async {
            match target {
                BackupTarget::Directory { settings, .. } => self.archive_directory(settings, &output).await,
                BackupTarget::Database { settings, .. } => self.dump_database(settings, &output).await,
            }
        };
        let outcome = match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(BackupError::ArchiveCreation(format!(
                "Timed out after {}s",
                self.timeout.as_secs()
            ))),
        };

        let min_size = match target.kind() {
            ArchiveKind::Tar => MIN_DIR_ARCHIVE_SIZE,
            ArchiveKind::Sql => MIN_DB_ARCHIVE_SIZE,
        };
        let staged = match outcome {
            Ok(()) => check_archive(&filename, &output, min_size).await,
            Err(e) => Err(e),
        };

        if staged.is_err() {
            discard(&output).await;
        }
        staged
    }
}

/// `tar -zcf <output> --exclude=... -C <root> <path>`
fn tar_args(
    output: &Path,
    root: &Path,
    path: &str,
    global_excludes: &[String],
    excludes: &[String],
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-zcf".into(), output.as_os_str().to_owned()];
    for exclude in global_excludes.iter().chain(excludes) {
        args.push(format!("--exclude={exclude}").into());
    }
    args.push("-C".into());
    args.push(root.as_os_str().to_owned());
    args.push(path.into());
    args
}

fn dump_args(settings: &DatabaseTarget) -> Vec<String> {
    let mut args = vec![
        "-h".to_string(),
        settings.host.clone(),
        "-u".to_string(),
        settings.user.clone(),
        settings.name.clone(),
    ];
    for table in &settings.ignore {
        args.push(format!("--ignore-table={}.{}", settings.name, table));
    }
    args.push("--lock-tables=false".to_string());
    args
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut bytes = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut bytes).await {
            tracing::debug!("Failed to read mysqldump stderr: {}", e);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

async fn check_archive(filename: &str, output: &Path, min_size: u64) -> Result<StagedArchive> {
    let size = tokio::fs::metadata(output).await?.len();
    if size < min_size {
        return Err(BackupError::ArchiveCreation(format!(
            "Backup {filename} is invalid ({size} bytes)"
        )));
    }
    Ok(StagedArchive {
        filename: filename.to_string(),
        path: output.to_path_buf(),
        size,
    })
}

async fn discard(output: &Path) {
    if let Err(e) = tokio::fs::remove_file(output).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(file = %output.display(), "Failed to remove partial archive: {}", e);
        }
    }
}
