//! Commit step shared by every write-temp-then-rename in the crate.

use std::io;
use std::path::Path;

/// Rename a fully written and synced temporary file over `dest`, then sync
/// the containing directory so the rename itself survives a crash.
pub async fn commit(tmp: &Path, dest: &Path) -> io::Result<()> {
    tokio::fs::rename(tmp, dest).await?;
    sync_parent_dir(dest).await
}

/// Create the parent directory of `path` if it has one.
pub async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => return Ok(()),
    };
    tokio::task::spawn_blocking(move || std::fs::File::open(&parent)?.sync_all())
        .await
        .map_err(io::Error::other)?
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    // Directory handles cannot be synced here
    Ok(())
}
