//! Local inventory of the backup root.
//!
//! Lists regular files already present so they are never downloaded twice,
//! and sweeps temporary files left behind by interrupted transfers.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Suffix of in-flight download files
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Suffix of in-flight manifest snapshots
pub const TMP_SUFFIX: &str = ".tmp";

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Skip uncommitted writes (see [`is_temporary`])
    pub exclude_temporary: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            exclude_temporary: true,
        }
    }
}

/// Whether a file name belongs to a write that has not been committed yet.
///
/// Temporary names are hidden (leading dot) and carry one of the reserved
/// suffixes, so a remote item can never be mistaken for one unless its own
/// name has that shape; the path planner rejects such names.
pub fn is_temporary(file_name: &str) -> bool {
    file_name.starts_with('.')
        && (file_name.ends_with(PARTIAL_SUFFIX) || file_name.ends_with(TMP_SUFFIX))
}

/// Hidden sibling of `path` used while it is being written.
pub fn temporary_sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}{}", name, suffix))
}

/// Walk a directory tree and call `callback` for every regular file.
///
/// Directories, symlinks and excluded names are skipped. A missing root is
/// treated as empty.
pub fn walk_files<F>(root: &Path, options: &WalkOptions, mut callback: F) -> io::Result<()>
where
    F: FnMut(&DirEntry),
{
    if !root.exists() {
        debug!("Backup root {} does not exist yet", root.display());
        return Ok(());
    }

    for entry in WalkDir::new(root) {
        let entry = entry?;
        let file_type = entry.file_type();

        if file_type.is_dir() || file_type.is_symlink() || !file_type.is_file() {
            continue;
        }

        if options.exclude_temporary && is_temporary(&entry.file_name().to_string_lossy()) {
            continue;
        }

        callback(&entry);
    }

    Ok(())
}

/// Recursively list regular files under `root`.
///
/// # Example
/// ```no_run
/// use photo_backup::fs::walker::scan_inventory;
/// use std::path::Path;
///
/// let files = scan_inventory(Path::new("/backup")).unwrap();
/// println!("{} files already backed up", files.len());
/// ```
pub fn scan_inventory(root: &Path) -> io::Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    walk_files(root, &WalkOptions::default(), |entry| {
        files.insert(entry.path().to_path_buf());
    })?;
    Ok(files)
}

/// Delete `*.partial` files left by transfers that never reached their
/// rename. Returns how many were removed.
pub fn remove_stale_partials(root: &Path) -> io::Result<usize> {
    let options = WalkOptions {
        exclude_temporary: false,
    };

    let mut stale = Vec::new();
    walk_files(root, &options, |entry| {
        let name = entry.file_name().to_string_lossy();
        if is_temporary(&name) && name.ends_with(PARTIAL_SUFFIX) {
            stale.push(entry.path().to_path_buf());
        }
    })?;

    let mut removed = 0;
    for path in stale {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed stale partial file {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove stale partial file {}: {}", path.display(), e),
        }
    }

    Ok(removed)
}
