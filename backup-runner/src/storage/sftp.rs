//! Network share over SSH/SFTP.
//!
//! `ssh2` is blocking, so every operation opens its own session inside
//! `spawn_blocking`. A run issues a handful of calls per archive, which keeps
//! this cheap enough and avoids holding a session across awaits.

use super::{join_remote, StorageBackend, StorageResult};
use crate::utils::StorageError;
use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

/// libssh2 `LIBSSH2_FX_NO_SUCH_FILE`
const SFTP_NO_SUCH_FILE: i32 = 2;

#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Directory on the share that holds the archives
    pub root: String,
}

pub struct SftpBackend {
    settings: SftpSettings,
}

impl SftpBackend {
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings }
    }

    /// Run `op` against a fresh SFTP channel on a blocking thread.
    async fn with_sftp<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp, &SftpSettings) -> StorageResult<T> + Send + 'static,
    {
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || {
            let session = open_session(&settings)?;
            let sftp = session.sftp()?;
            op(&sftp, &settings)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn open_session(settings: &SftpSettings) -> StorageResult<Session> {
    let tcp = TcpStream::connect((settings.host.as_str(), settings.port))?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;
    session.userauth_password(&settings.username, &settings.password)?;

    if !session.authenticated() {
        return Err(StorageError::Api {
            status: 401,
            message: format!("SSH authentication failed for {}", settings.username),
        });
    }
    Ok(session)
}

fn is_no_such_file(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
}

fn remote_path(settings: &SftpSettings, name: &str) -> PathBuf {
    PathBuf::from(join_remote(&settings.root, name))
}

#[async_trait]
impl StorageBackend for SftpBackend {
    async fn is_available(&self) -> bool {
        let result = self
            .with_sftp(|sftp, settings| {
                sftp.stat(Path::new(&settings.root))?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(host = %self.settings.host, "SFTP probe failed: {}", e);
                false
            }
        }
    }

    async fn copy(&self, source: &Path, dest: &str) -> StorageResult<()> {
        let source = source.to_path_buf();
        let dest = dest.to_string();
        self.with_sftp(move |sftp, settings| {
            let mut local = std::fs::File::open(&source)?;
            let mut remote = sftp.create(&remote_path(settings, &dest))?;
            std::io::copy(&mut local, &mut remote)?;
            Ok(())
        })
        .await
    }

    async fn scan_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        let path = path.to_string();
        self.with_sftp(move |sftp, settings| {
            let entries = sftp.readdir(&remote_path(settings, &path))?;
            Ok(entries
                .into_iter()
                .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .filter(|n| n != "." && n != "..")
                .collect())
        })
        .await
    }

    async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        let path = path.to_string();
        self.with_sftp(move |sftp, settings| match sftp.stat(&remote_path(settings, &path)) {
            Ok(_) => Ok(true),
            Err(e) if is_no_such_file(&e) => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let path = path.to_string();
        self.with_sftp(move |sftp, settings| match sftp.unlink(&remote_path(settings, &path)) {
            Ok(()) => Ok(()),
            Err(e) if is_no_such_file(&e) => Err(StorageError::NotFound(path.clone())),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn get_size(&self, path: &str) -> StorageResult<u64> {
        let path = path.to_string();
        self.with_sftp(move |sftp, settings| match sftp.stat(&remote_path(settings, &path)) {
            Ok(stat) => stat.size.ok_or_else(|| StorageError::NotFound(path.clone())),
            Err(e) if is_no_such_file(&e) => Err(StorageError::NotFound(path.clone())),
            Err(e) => Err(e.into()),
        })
        .await
    }
}
