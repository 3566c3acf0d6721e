//! Destination path planning.
//!
//! Every media item lands at `<root>/<YYYYMMDD>/<filename>`, where the date
//! is the item's creation instant in UTC.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::fs::walker::is_temporary;
use crate::utils::errors::{BackupError, Result};

/// Parse a remote creation timestamp (RFC 3339, any offset) into UTC.
pub fn parse_creation_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BackupError::PathPlanning(format!("unparseable creation time {:?}: {}", raw, e)))
}

/// Compute the destination path for an item.
///
/// # Example
/// ```
/// use photo_backup::fs::planner::{parse_creation_time, plan};
/// use std::path::Path;
///
/// let created = parse_creation_time("2024-03-03T23:30:00-02:00").unwrap();
/// let path = plan(&created, "IMG_0001.jpg", Path::new("/backup")).unwrap();
/// assert_eq!(path, Path::new("/backup/20240304/IMG_0001.jpg"));
/// ```
pub fn plan(creation_time: &DateTime<Utc>, filename: &str, backup_root: &Path) -> Result<PathBuf> {
    validate_filename(filename)?;

    let day = creation_time.format("%Y%m%d").to_string();
    Ok(backup_root.join(day).join(filename))
}

fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(BackupError::PathPlanning("empty filename".into()));
    }
    if filename == "." || filename == ".." || filename.contains(['/', '\\']) {
        return Err(BackupError::PathPlanning(format!(
            "filename {:?} is not a single path component",
            filename
        )));
    }
    if is_temporary(filename) {
        return Err(BackupError::PathPlanning(format!(
            "filename {:?} is reserved for in-flight writes",
            filename
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_raw(creation_time: &str, filename: &str, backup_root: &Path) -> Result<PathBuf> {
        plan(&parse_creation_time(creation_time)?, filename, backup_root)
    }

    #[test]
    fn test_plan_uses_utc_date() -> Result<()> {
        let root = Path::new("/backup");

        let path = plan_raw("2024-03-03T10:15:00Z", "IMG_0001.jpg", root)?;
        assert_eq!(path, PathBuf::from("/backup/20240303/IMG_0001.jpg"));

        // Late evening in UTC+10 is still the previous day in UTC
        let path = plan_raw("2024-03-04T08:00:00+10:00", "IMG_0002.jpg", root)?;
        assert_eq!(path, PathBuf::from("/backup/20240303/IMG_0002.jpg"));

        Ok(())
    }

    #[test]
    fn test_plan_is_deterministic() -> Result<()> {
        let root = Path::new("/backup");
        let a = plan_raw("2023-12-31T23:59:59.999Z", "clip.mp4", root)?;
        let b = plan_raw("2023-12-31T23:59:59.999Z", "clip.mp4", root)?;
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/backup/20231231/clip.mp4"));
        Ok(())
    }

    #[test]
    fn test_rejects_empty_filename() {
        let result = plan_raw("2024-03-03T10:15:00Z", "", Path::new("/backup"));
        assert!(matches!(result, Err(BackupError::PathPlanning(_))));
    }

    #[test]
    fn test_rejects_unparseable_time() {
        let result = plan_raw("yesterday", "IMG_0001.jpg", Path::new("/backup"));
        assert!(matches!(result, Err(BackupError::PathPlanning(_))));
    }

    #[test]
    fn test_rejects_path_traversal() {
        for name in ["..", ".", "../escape.jpg", "nested/file.jpg", "win\\file.jpg", ".x.jpg.partial"] {
            let result = plan_raw("2024-03-03T10:15:00Z", name, Path::new("/backup"));
            assert!(matches!(result, Err(BackupError::PathPlanning(_))), "{}", name);
        }
    }
}
