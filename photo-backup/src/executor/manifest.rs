//! Manifest types for resumable backups.
//!
//! The manifest records every remote item of the current run together with
//! its planned destination and whether that destination is known to hold
//! the complete file. Record order is the order items are transferred in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::fs::planner;
use crate::provider::RemoteMediaItem;
use crate::utils::errors::{BackupError, Result};

/// On-disk format version
pub const MANIFEST_VERSION: u32 = 1;

/// One remote media item and its backup state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: String,
    pub filename: String,
    pub creation_time: DateTime<Utc>,
    /// Planned once when the record is created; never recomputed
    pub destination_path: PathBuf,
    pub backup_complete: bool,
}

impl MediaRecord {
    /// Build a record for a remote item, planning its destination under `backup_root`.
    pub fn plan(item: &RemoteMediaItem, backup_root: &Path) -> Result<Self> {
        let planned = || -> Result<(DateTime<Utc>, PathBuf)> {
            let created = planner::parse_creation_time(&item.creation_time)?;
            Ok((created, planner::plan(&created, &item.filename, backup_root)?))
        };
        let (creation_time, destination_path) = planned().map_err(|e| match e {
            BackupError::PathPlanning(reason) => {
                BackupError::PathPlanning(format!("item {}: {}", item.id, reason))
            }
            other => other,
        })?;

        Ok(Self {
            id: item.id.clone(),
            filename: item.filename.clone(),
            creation_time,
            destination_path,
            backup_complete: false,
        })
    }
}

/// Serialized form of the manifest
#[derive(Serialize, Deserialize)]
struct ManifestFile {
    version: u32,
    records: Vec<MediaRecord>,
}

/// Ordered `id -> MediaRecord` mapping.
///
/// Records are only ever changed through the id-keyed methods on this type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    records: Vec<MediaRecord>,
    index: HashMap<String, usize>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh manifest from a remote catalog, in catalog order.
    ///
    /// Fails on the first item whose destination cannot be planned, and with
    /// [`BackupError::PathCollision`] when two ids plan to the same path.
    pub fn from_catalog(items: &[RemoteMediaItem], backup_root: &Path) -> Result<Self> {
        let records = items
            .iter()
            .map(|item| MediaRecord::plan(item, backup_root))
            .collect::<Result<Vec<_>>>()?;
        Self::from_records(records)
    }

    /// Assemble a manifest, enforcing unique ids and unique destinations.
    pub fn from_records(records: Vec<MediaRecord>) -> Result<Self> {
        let mut manifest = Self::new();
        let mut destinations: HashMap<PathBuf, String> = HashMap::with_capacity(records.len());

        for record in records {
            let path = record.destination_path.clone();
            let id = record.id.clone();
            manifest.insert(record)?;

            if let Some(first_id) = destinations.insert(path.clone(), id.clone()) {
                return Err(BackupError::PathCollision {
                    path,
                    first_id,
                    second_id: id,
                });
            }
        }

        Ok(manifest)
    }

    fn insert(&mut self, record: MediaRecord) -> Result<()> {
        if self.index.contains_key(&record.id) {
            return Err(BackupError::DuplicateRecord(record.id));
        }
        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MediaRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    /// Records in processing order
    pub fn iter(&self) -> impl Iterator<Item = &MediaRecord> {
        self.records.iter()
    }

    /// Set the completion flag of record `id`. Returns whether it changed.
    pub fn set_complete(&mut self, id: &str, complete: bool) -> Result<bool> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| BackupError::UnknownRecord(id.to_string()))?;
        let record = &mut self.records[i];
        let changed = record.backup_complete != complete;
        record.backup_complete = complete;
        Ok(changed)
    }

    /// Mark record `id` as backed up after a verified write.
    pub fn mark_complete(&mut self, id: &str) -> Result<()> {
        self.set_complete(id, true).map(|_| ())
    }

    /// Ids still waiting for a transfer, in processing order
    pub fn pending_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| !r.backup_complete)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.records.iter().filter(|r| r.backup_complete).count()
    }

    pub fn all_complete(&self) -> bool {
        self.records.iter().all(|r| r.backup_complete)
    }

    /// Deterministic JSON snapshot (pretty-printed, trailing newline).
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let file = ManifestFile {
            version: MANIFEST_VERSION,
            records: self.records.clone(),
        };
        let mut bytes = serde_json::to_vec_pretty(&file)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parse a snapshot produced by [`Manifest::to_json_bytes`].
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let file: ManifestFile = serde_json::from_slice(bytes)?;
        if file.version != MANIFEST_VERSION {
            return Err(BackupError::UnsupportedManifestVersion(file.version));
        }
        Self::from_records(file.records)
    }
}
