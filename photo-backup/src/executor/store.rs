//! Durable manifest snapshot.
//!
//! The snapshot is always replaced as a whole: the new contents are written
//! to a hidden sibling, synced, and renamed over the canonical file, so a
//! crash at any point leaves either the previous snapshot or the new one.

use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::manifest::Manifest;
use crate::fs::durable;
use crate::fs::walker::{temporary_sibling, TMP_SUFFIX};
use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted manifest. `Ok(None)` means there is no resume state.
    ///
    /// A file that exists but cannot be parsed is reported as
    /// [`BackupError::ManifestCorrupt`] and left in place for inspection.
    pub async fn load(&self) -> Result<Option<Manifest>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let manifest = Manifest::from_json_slice(&bytes).map_err(|e| BackupError::ManifestCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        info!(
            "Loaded manifest {} ({} records, {} complete)",
            self.path.display(),
            manifest.len(),
            manifest.completed_count()
        );
        Ok(Some(manifest))
    }

    /// Atomically replace the persisted manifest.
    pub async fn save(&self, manifest: &Manifest) -> Result<()> {
        let bytes = manifest.to_json_bytes()?;
        let tmp = temporary_sibling(&self.path, TMP_SUFFIX);

        durable::ensure_parent_dir(&self.path).await?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        durable::commit(&tmp, &self.path).await?;

        debug!(
            "Checkpointed manifest {} ({}/{} complete)",
            self.path.display(),
            manifest.completed_count(),
            manifest.len()
        );
        Ok(())
    }

    /// Remove the persisted manifest; absent is not an error.
    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Removed manifest {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RemoteMediaItem;
    use tempfile::TempDir;

    fn sample_manifest() -> Manifest {
        let items = vec![
            RemoteMediaItem {
                id: "a".into(),
                filename: "IMG_1.jpg".into(),
                creation_time: "2024-03-03T09:00:00Z".into(),
                mime_type: Some("image/jpeg".into()),
            },
            RemoteMediaItem {
                id: "b".into(),
                filename: "clip.mp4".into(),
                creation_time: "2024-03-04T21:30:00.5-05:00".into(),
                mime_type: Some("video/mp4".into()),
            },
        ];
        Manifest::from_catalog(&items, Path::new("/backup")).unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_is_none() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ManifestStore::new(dir.path().join("manifest.json"));
        assert!(store.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_then_load() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ManifestStore::new(dir.path().join("state/manifest.json"));

        let mut manifest = sample_manifest();
        manifest.mark_complete("b")?;
        store.save(&manifest).await?;

        let loaded = store.load().await?.expect("manifest should exist");
        assert_eq!(loaded, manifest);
        assert!(!dir.path().join("state/.manifest.json.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_of_load_is_byte_identical() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ManifestStore::new(dir.path().join("manifest.json"));
        store.save(&sample_manifest()).await?;
        let first = tokio::fs::read(store.path()).await?;

        let loaded = store.load().await?.expect("manifest should exist");
        store.save(&loaded).await?;
        let second = tokio::fs::read(store.path()).await?;

        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_reported() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("manifest.json");
        tokio::fs::write(&path, b"{\"version\": 1, \"records\": [").await?;

        let store = ManifestStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(BackupError::ManifestCorrupt { .. })
        ));
        // Never discarded behind the operator's back
        assert!(path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_tmp_does_not_affect_load() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ManifestStore::new(dir.path().join("manifest.json"));
        store.save(&sample_manifest()).await?;

        // A crash between write and rename leaves only the sibling behind
        tokio::fs::write(dir.path().join(".manifest.json.tmp"), b"garbage").await?;

        let loaded = store.load().await?.expect("manifest should exist");
        assert_eq!(loaded, sample_manifest());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ManifestStore::new(dir.path().join("manifest.json"));
        store.save(&sample_manifest()).await?;
        assert!(store.exists().await);

        store.delete().await?;
        assert!(!store.exists().await);
        store.delete().await?;
        Ok(())
    }
}
