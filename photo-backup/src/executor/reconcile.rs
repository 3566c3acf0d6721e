//! Reconciliation of the manifest against the local inventory.

use std::collections::HashSet;
use std::path::PathBuf;

use super::manifest::Manifest;
use crate::utils::errors::Result;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Records whose destination exists locally
    pub present: usize,
    /// Records still to be transferred
    pub missing: usize,
    /// Records whose flag flipped during this pass
    pub changed: usize,
}

/// Set every record's completion flag to whether its destination is in
/// `inventory`. Running it twice against the same inventory is a no-op.
pub fn reconcile(manifest: &mut Manifest, inventory: &HashSet<PathBuf>) -> Result<ReconcileStats> {
    let observed: Vec<(String, bool)> = manifest
        .iter()
        .map(|record| (record.id.clone(), inventory.contains(&record.destination_path)))
        .collect();

    let mut stats = ReconcileStats::default();
    for (id, present) in observed {
        if manifest.set_complete(&id, present)? {
            stats.changed += 1;
        }
        if present {
            stats.present += 1;
        } else {
            stats.missing += 1;
        }
    }

    Ok(stats)
}
