//! Run-level progress tracking for backup transfers.
//!
//! Counts items and bytes as transfers finish and derives throughput and a
//! remaining-time estimate for the periodic progress log.

use std::time::{Duration, Instant};

/// Progress of the transfer phase of one run
#[derive(Debug, Clone)]
pub struct RunProgress {
    start_time: Instant,

    /// Items that needed a transfer when the phase started
    pub total_items: usize,

    /// Items transferred and checkpointed
    pub completed_items: usize,

    /// Items that ended with a persistent failure
    pub failed_items: usize,

    /// Bytes written by completed items
    pub transferred_bytes: u64,
}

impl RunProgress {
    pub fn new(total_items: usize) -> Self {
        Self {
            start_time: Instant::now(),
            total_items,
            completed_items: 0,
            failed_items: 0,
            transferred_bytes: 0,
        }
    }

    pub fn record_success(&mut self, bytes: u64) {
        self.completed_items += 1;
        self.transferred_bytes += bytes;
    }

    pub fn record_failure(&mut self) {
        self.failed_items += 1;
    }

    /// Items finished either way
    pub fn processed_items(&self) -> usize {
        self.completed_items + self.failed_items
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total_items == 0 {
            100.0
        } else {
            (self.processed_items() as f64 / self.total_items as f64) * 100.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    /// Estimated seconds left, from the average time per processed item
    pub fn eta_seconds(&self) -> Option<u64> {
        let processed = self.processed_items();
        if processed == 0 {
            return None;
        }
        let per_item = self.elapsed().as_secs_f64() / processed as f64;
        let remaining = self.total_items.saturating_sub(processed);
        Some((per_item * remaining as f64).round() as u64)
    }

    /// One-line summary for the progress log
    pub fn summary(&self) -> String {
        format!(
            "{}/{} items ({:.1}%), {} failed, {} at {}",
            self.processed_items(),
            self.total_items,
            self.percent_complete(),
            self.failed_items,
            format_bytes(self.transferred_bytes),
            format_speed(self.average_speed()),
        )
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}
