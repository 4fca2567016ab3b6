//! Backup Runner - Main entry point
//!
//! Exits non-zero only when the configuration cannot be loaded. Failures of
//! individual archives or storages end up in the report.

use anyhow::{Context, Result};
use backup_runner::{utils, Config, Orchestrator};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration directory (config.json, dir/, db/)
    #[arg(short, long, value_name = "DIR", env = "BACKUP_CONFIG_DIR", default_value = "configs")]
    config_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides config
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = Config::load(&args.config_dir).with_context(|| {
        format!("Failed to load configuration from {}", args.config_dir.display())
    })?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting backup-runner v{} ({} storages)",
        env!("CARGO_PKG_VERSION"),
        config.storages.len()
    );

    let today = chrono::Local::now().date_naive();
    let report = Orchestrator::from_config(&config).run(today).await;

    print!("{report}");

    if let Some(path) = &config.report_path {
        match tokio::fs::write(path, report.to_html()).await {
            Ok(()) => tracing::info!(path = %path.display(), "Report written"),
            Err(e) => tracing::warn!(path = %path.display(), "Failed to write report: {}", e),
        }
    }

    if report.has_errors() {
        tracing::warn!("Backup run finished with {} error(s)", report.error_count());
    }

    Ok(())
}
