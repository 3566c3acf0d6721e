//! Photo Backup - Main entry point
//!
//! Mirrors a remote photo library into a local date-partitioned tree.
//! Exits non-zero when any item is left untransferred.

use clap::Parser;
use photo_backup::{
    daemon::shutdown::ShutdownCoordinator, provider::ProviderRegistry, utils, BackupError,
    BackupOrchestrator, Config,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backup root directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Manifest location (overrides config)
    #[arg(short, long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Remote provider name
    #[arg(short, long)]
    provider: Option<String>,

    /// Items requested per listing page
    #[arg(long)]
    page_size: Option<u32>,

    /// Retries per request after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Items transferred in parallel
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    /// Layer file, environment and command line; validation runs last.
    /// `env` replaces the process environment when given.
    fn into_config(self, env: Option<config::Map<String, String>>) -> photo_backup::Result<Config> {
        let mut config = Config::layered(self.config.as_deref(), self.root.as_deref(), env)?;

        if let Some(manifest) = self.manifest {
            config.backup.manifest_path = manifest;
        }
        if let Some(provider) = self.provider {
            config.provider.name = provider;
        }
        if let Some(page_size) = self.page_size {
            config.catalog.page_size = page_size;
        }
        if let Some(max_retries) = self.max_retries {
            config.transfer.max_retries = max_retries;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.transfer.max_concurrent = max_concurrent;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Exit status for errors that stop the run before or outside transfers
const EXIT_FATAL: u8 = 2;

/// Exit status for an interrupted run
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Args::parse().into_config(None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("photo-backup: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if let Err(e) = utils::logger::init(&config.log.level) {
        eprintln!("photo-backup: failed to initialize logging: {:#}", e);
        return ExitCode::from(EXIT_FATAL);
    }

    tracing::info!(
        "Starting photo-backup v{} (provider: {}, root: {})",
        env!("CARGO_PKG_VERSION"),
        config.provider.name,
        config.backup.root.display()
    );

    let provider = match ProviderRegistry::with_builtin().build(&config.provider) {
        Ok(provider) => provider,
        Err(e) => {
            tracing::error!("Backup failed: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let shutdown_coordinator = ShutdownCoordinator::new();
    let signal_listener = shutdown_coordinator.clone();
    let signal_handle = tokio::spawn(async move {
        signal_listener.wait_for_signal().await;
    });

    let orchestrator = BackupOrchestrator::new(&config, provider, shutdown_coordinator.token());
    let result = orchestrator.run().await;

    // Release the signal listener
    shutdown_coordinator.trigger();
    let _ = signal_handle.await;

    match result {
        Ok(summary) => {
            summary.report();
            if summary.is_success() {
                ExitCode::SUCCESS
            } else if summary.interrupted {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                let failed = summary.failed_ids();
                if !failed.is_empty() {
                    eprintln!("Failed items: {}", failed.join(", "));
                }
                ExitCode::FAILURE
            }
        }
        Err(BackupError::Cancelled) => {
            tracing::warn!("Backup interrupted before transfers started");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            tracing::error!("Backup failed: {}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}
