//! Backup Runner Library
//!
//! Archives directories and databases into a staging area, replicates the
//! archives to every configured storage with size verification, and keeps the
//! newest N archives per group on each storage.

pub mod archive;
pub mod config;
pub mod orchestrator;
pub mod report;
pub mod retention;
pub mod staging;
pub mod storage;
pub mod utils;
pub mod verify;

// Re-export commonly used types
pub use config::Config;
pub use orchestrator::Orchestrator;
pub use report::Report;
pub use utils::errors::{BackupError, ConfigError, StorageError};
pub type Result<T> = std::result::Result<T, BackupError>;
