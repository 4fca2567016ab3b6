//! Configuration management for the backup runner.
//!
//! Layout of the configuration directory:
//!
//! ```text
//! configs/
//!   config.json      staging dir, directory defaults, storages
//!   dir/<name>.json  one directory target per file
//!   db/<name>.json   one database target per file
//! ```
//!
//! Target files starting with `_` are disabled. Any problem found here is a
//! [`ConfigError`] and stops the run before anything is archived.

use crate::retention::RetentionPolicy;
use crate::utils::ConfigError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAIN_FILE: &str = "config.json";

#[derive(Debug, Clone)]
pub struct Config {
    /// Staging directory archives are created in
    pub tmp_dir: PathBuf,
    pub dir: DirDefaults,
    pub storages: Vec<StorageConfig>,
    /// Ceiling for creating one archive
    pub archive_timeout: Duration,
    /// Where to write the HTML report, if anywhere
    pub report_path: Option<PathBuf>,
    pub log: LogConfig,
    pub directories: BTreeMap<String, DirectoryTarget>,
    pub databases: BTreeMap<String, DatabaseTarget>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirDefaults {
    /// Parent of every directory target's `path`
    #[serde(default)]
    pub root_path: Option<PathBuf>,

    /// tar exclusions applied to every directory target
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A validated storage entry.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub name: String,
    pub kind: StorageKind,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageKind {
    Local {
        path: PathBuf,
    },
    Sftp {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        username: String,
        #[serde(default)]
        password: String,
        path: String,
    },
    YandexDisk {
        token: String,
        #[serde(default)]
        path: String,
    },
}

impl StorageKind {
    pub fn label(&self) -> &'static str {
        match self {
            StorageKind::Local { .. } => "local",
            StorageKind::Sftp { .. } => "sftp",
            StorageKind::YandexDisk { .. } => "yandex_disk",
        }
    }
}

/// Directory to archive with tar.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryTarget {
    /// Path relative to `dir.root_path`
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

/// MySQL database to dump.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseTarget {
    pub host: String,
    pub user: String,
    #[serde(default)]
    pub pass: String,
    pub name: String,

    /// Tables left out of the dump
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    tmp_dir: PathBuf,
    #[serde(default)]
    dir: DirDefaults,
    #[serde(default)]
    storages: Vec<RawStorage>,
    #[serde(default = "default_archive_timeout_secs")]
    archive_timeout_secs: u64,
    #[serde(default)]
    report_path: Option<PathBuf>,
    #[serde(default)]
    log: LogConfig,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    name: String,
    #[serde(default)]
    limit: Option<serde_json::Value>,
    #[serde(flatten)]
    kind: StorageKind,
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_archive_timeout_secs() -> u64 {
    360_000
}

impl Config {
    /// Load and validate the configuration directory.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let main_path = config_dir.join(MAIN_FILE);
        if !main_path.is_file() {
            return Err(ConfigError::NotFound(main_path.display().to_string()));
        }
        let raw: RawConfig = read_json(&main_path)?;

        let mut storages = Vec::with_capacity(raw.storages.len());
        for storage in raw.storages {
            storages.push(validate_storage(storage)?);
        }
        ensure_unique_names(&storages)?;

        let config = Config {
            tmp_dir: raw.tmp_dir,
            dir: raw.dir,
            storages,
            archive_timeout: Duration::from_secs(raw.archive_timeout_secs),
            report_path: raw.report_path,
            log: raw.log,
            directories: load_targets(&config_dir.join("dir"))?,
            databases: load_targets(&config_dir.join("db"))?,
        };

        if !config.directories.is_empty() && config.dir.root_path.is_none() {
            return Err(ConfigError::invalid(
                "dir.root_path",
                "required when directory targets are configured",
            ));
        }

        Ok(config)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn validate_storage(raw: RawStorage) -> Result<StorageConfig, ConfigError> {
    if raw.name.trim().is_empty() {
        return Err(ConfigError::invalid("storages.name", "storage name must not be empty"));
    }

    match &raw.kind {
        StorageKind::Local { path } if path.as_os_str().is_empty() => {
            return Err(ConfigError::invalid(
                format!("storages.{}.path", raw.name),
                "the path is required",
            ));
        }
        StorageKind::YandexDisk { token, .. } if token.trim().is_empty() => {
            return Err(ConfigError::invalid(
                format!("storages.{}.token", raw.name),
                "the token is required",
            ));
        }
        StorageKind::Sftp { host, .. } if host.trim().is_empty() => {
            return Err(ConfigError::invalid(
                format!("storages.{}.host", raw.name),
                "the host is required",
            ));
        }
        _ => {}
    }

    let retention = RetentionPolicy::from_setting(&raw.name, raw.limit.as_ref())?;

    Ok(StorageConfig {
        name: raw.name,
        kind: raw.kind,
        retention,
    })
}

fn ensure_unique_names(storages: &[StorageConfig]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for storage in storages {
        if !seen.insert(storage.name.as_str()) {
            return Err(ConfigError::invalid(
                format!("storages.{}", storage.name),
                "duplicate storage name",
            ));
        }
    }
    Ok(())
}

/// Read every enabled `*.json` file of a target directory, keyed by file stem.
fn load_targets<T: DeserializeOwned>(dir: &Path) -> Result<BTreeMap<String, T>, ConfigError> {
    let mut targets = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(targets);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(name) = file_name.strip_suffix(".json") else {
            continue;
        };
        if name.is_empty() || name.starts_with('_') || !entry.file_type()?.is_file() {
            continue;
        }
        targets.insert(name.to_string(), read_json(&entry.path())?);
    }

    Ok(targets)
}
