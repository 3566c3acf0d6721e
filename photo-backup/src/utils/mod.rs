//! Utility modules for the photo backup engine.

pub mod errors;
pub mod logger;
pub mod retry;

pub use errors::{BackupError, Result};
