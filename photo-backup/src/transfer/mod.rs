//! Item transfers and run progress.

pub mod download;
pub mod progress;
