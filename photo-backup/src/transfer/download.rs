//! Single-item download with atomic placement.
//!
//! Bytes are streamed into a hidden `.partial` sibling of the destination,
//! synced, and renamed into place only after the whole item arrived, so the
//! destination path either does not exist or holds the complete file.

use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::manifest::MediaRecord;
use crate::fs::durable;
use crate::fs::walker::{temporary_sibling, PARTIAL_SUFFIX};
use crate::provider::MediaProvider;
use crate::utils::errors::{BackupError, Result};
use crate::utils::retry::RetryPolicy;

pub struct TransferExecutor {
    provider: Arc<dyn MediaProvider>,
    retry: RetryPolicy,
    /// Limit for opening a download and for each stalled read
    idle_timeout: Duration,
}

impl TransferExecutor {
    pub fn new(provider: Arc<dyn MediaProvider>, retry: RetryPolicy, idle_timeout: Duration) -> Self {
        Self {
            provider,
            retry,
            idle_timeout,
        }
    }

    /// Download `record` to its destination path, retrying transient
    /// failures. Returns the number of bytes written.
    ///
    /// The caller marks the record complete only after this returns `Ok`.
    pub async fn transfer(&self, record: &MediaRecord, cancel: &CancellationToken) -> Result<u64> {
        let dest = &record.destination_path;
        let partial = temporary_sibling(dest, PARTIAL_SUFFIX);
        durable::ensure_parent_dir(dest).await?;

        let what = format!("Download of {}", record.id);
        let result = self
            .retry
            .run(&what, cancel, || async {
                let attempt = tokio::select! {
                    result = self.download_to(&record.id, &partial) => result,
                    _ = cancel.cancelled() => Err(BackupError::Cancelled),
                };
                if attempt.is_err() {
                    discard(&partial).await;
                }
                attempt
            })
            .await;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = durable::commit(&partial, dest).await {
            discard(&partial).await;
            return Err(e.into());
        }

        info!("Saved {} ({} bytes) to {}", record.id, bytes, dest.display());
        Ok(bytes)
    }

    /// One attempt: stream the item into `partial` and sync it.
    async fn download_to(&self, item_id: &str, partial: &Path) -> Result<u64> {
        let download = tokio::time::timeout(self.idle_timeout, self.provider.fetch_bytes(item_id))
            .await
            .map_err(|_| BackupError::Timeout(format!("opening download of {}", item_id)))??;

        let mut stream = download.stream;
        let mut file = tokio::fs::File::create(partial).await?;
        let mut written = 0u64;

        loop {
            let next = tokio::time::timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| BackupError::Timeout(format!("reading {}", item_id)))?;

            match next {
                Some(Ok(chunk)) => {
                    file.write_all(&chunk).await.map_err(|e| BackupError::PartialWrite {
                        path: partial.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                    written += chunk.len() as u64;
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if let Some(expected) = download.content_length {
            if expected != written {
                return Err(BackupError::PartialWrite {
                    path: partial.to_path_buf(),
                    reason: format!("expected {} bytes, received {}", expected, written),
                });
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!("Wrote {} bytes to {}", written, partial.display());
        Ok(written)
    }
}

async fn discard(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        // Left for the stale-partial sweep of the next run
        Err(e) => warn!("Failed to remove {}: {}", partial.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{item, Failure, ScriptedProvider};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn record(root: &Path, id: &str) -> MediaRecord {
        MediaRecord::plan(&item(id, &format!("{}.jpg", id), "2024-03-03T09:00:00Z"), root).unwrap()
    }

    fn executor(provider: Arc<ScriptedProvider>) -> TransferExecutor {
        TransferExecutor::new(
            provider,
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
            Duration::from_millis(200),
        )
    }

    fn partial_of(path: &Path) -> PathBuf {
        temporary_sibling(path, PARTIAL_SUFFIX)
    }

    #[tokio::test]
    async fn test_successful_transfer() -> Result<()> {
        let dir = TempDir::new()?;
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let rec = record(dir.path(), "a");

        let bytes = executor(provider.clone()).transfer(&rec, &CancellationToken::new()).await?;

        let expected = ScriptedProvider::content("a");
        assert_eq!(bytes, expected.len() as u64);
        assert_eq!(tokio::fs::read(&rec.destination_path).await?, expected);
        assert!(!partial_of(&rec.destination_path).exists());
        assert_eq!(provider.download_count("a"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() -> Result<()> {
        let dir = TempDir::new()?;
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_failure("a", Failure::Times(2)));
        let rec = record(dir.path(), "a");

        executor(provider.clone()).transfer(&rec, &CancellationToken::new()).await?;
        assert!(rec.destination_path.exists());
        assert_eq!(provider.download_count("a"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_nothing_behind() -> Result<()> {
        let dir = TempDir::new()?;
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_failure("a", Failure::Always));
        let rec = record(dir.path(), "a");

        let result = executor(provider.clone()).transfer(&rec, &CancellationToken::new()).await;
        assert!(matches!(result, Err(BackupError::Network(_))));
        assert!(!rec.destination_path.exists());
        assert!(!partial_of(&rec.destination_path).exists());
        assert_eq!(provider.download_count("a"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() -> Result<()> {
        let dir = TempDir::new()?;
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_failure("a", Failure::Permanent));
        let rec = record(dir.path(), "a");

        let result = executor(provider.clone()).transfer(&rec, &CancellationToken::new()).await;
        assert!(matches!(result, Err(BackupError::Provider { status: 404, .. })));
        assert_eq!(provider.download_count("a"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_stream_is_partial_write() -> Result<()> {
        let dir = TempDir::new()?;
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_failure("a", Failure::Truncated));
        let rec = record(dir.path(), "a");

        let result = executor(provider).transfer(&rec, &CancellationToken::new()).await;
        assert!(matches!(result, Err(BackupError::PartialWrite { .. })));
        assert!(!rec.destination_path.exists());
        assert!(!partial_of(&rec.destination_path).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out() -> Result<()> {
        let dir = TempDir::new()?;
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_failure("a", Failure::Stall));
        let rec = record(dir.path(), "a");

        let result = executor(provider.clone()).transfer(&rec, &CancellationToken::new()).await;
        assert!(matches!(result, Err(BackupError::Timeout(_))));
        assert!(!rec.destination_path.exists());
        assert_eq!(provider.download_count("a"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_mid_transfer() -> Result<()> {
        let dir = TempDir::new()?;
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_failure("a", Failure::Stall));
        let rec = record(dir.path(), "a");
        let cancel = CancellationToken::new();

        let exec = TransferExecutor::new(
            provider,
            RetryPolicy::new(0, Duration::from_millis(1), Duration::from_millis(1)),
            Duration::from_secs(30),
        );
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = exec.transfer(&rec, &cancel).await;
        assert!(matches!(result, Err(BackupError::Cancelled)));
        assert!(!rec.destination_path.exists());
        assert!(!partial_of(&rec.destination_path).exists());
        Ok(())
    }
}
