//! Photo Backup Library
//!
//! Resumable mirroring of a remote photo library into a local
//! `YYYYMMDD/filename` tree, driven by a crash-safe manifest.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod provider;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupOrchestrator, RunState, RunSummary};
pub use utils::errors::{BackupError, Result};
