//! Backup run orchestration.
//!
//! A run moves through `Absent → Fetched → Reconciled → InProgress →
//! Complete`, persisting the manifest after every state-changing step:
//! - the catalog is listed (or the manifest of an unfinished run is loaded),
//! - the manifest is reconciled against files already on disk,
//! - missing items are downloaded, one checkpoint per finished item,
//! - the manifest is deleted once every item is safely on disk.

pub mod manifest;
pub mod reconcile;
pub mod store;

use manifest::{Manifest, MediaRecord};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::ManifestStore;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::fs::walker::{remove_stale_partials, scan_inventory};
use crate::provider::catalog::CatalogFetcher;
use crate::provider::MediaProvider;
use crate::transfer::download::TransferExecutor;
use crate::transfer::progress::{format_bytes, RunProgress};
use crate::utils::errors::{BackupError, Result};
use crate::utils::retry::RetryPolicy;

/// Where a run currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No manifest yet
    Absent,
    /// Manifest built from the catalog or loaded from disk
    Fetched,
    /// Completion flags match the local inventory
    Reconciled,
    /// Transfers running, or stopped with work left
    InProgress,
    /// Everything on disk, manifest deleted
    Complete,
}

/// An item that could not be transferred in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: RunState,
    pub total_items: usize,
    /// Items found on disk during reconciliation
    pub already_present: usize,
    /// Items transferred by this run, in completion order
    pub succeeded: Vec<String>,
    pub failed: Vec<ItemFailure>,
    /// Items neither present nor failed (not attempted, or interrupted)
    pub remaining: Vec<String>,
    pub transferred_bytes: u64,
    pub interrupted: bool,
    pub duration: Duration,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            state: RunState::Absent,
            total_items: 0,
            already_present: 0,
            succeeded: Vec::new(),
            failed: Vec::new(),
            remaining: Vec::new(),
            transferred_bytes: 0,
            interrupted: false,
            duration: Duration::ZERO,
        }
    }

    /// Every item is on disk and the manifest is gone.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Complete
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.id.as_str()).collect()
    }

    /// Log the final report
    pub fn report(&self) {
        info!(
            "Backup {}: {} items, {} already present, {} transferred ({}), {} failed, {} remaining, {}s",
            if self.is_success() { "complete" } else if self.interrupted { "interrupted" } else { "incomplete" },
            self.total_items,
            self.already_present,
            self.succeeded.len(),
            format_bytes(self.transferred_bytes),
            self.failed.len(),
            self.remaining.len(),
            self.duration.as_secs()
        );
        for id in &self.succeeded {
            info!("  transferred: {}", id);
        }
        for failure in &self.failed {
            error!("  failed: {} ({})", failure.id, failure.reason);
        }
        for id in &self.remaining {
            warn!("  remaining: {}", id);
        }
    }
}

/// Message from a transfer worker to the manifest writer
struct Completion {
    id: String,
    result: Result<u64>,
}

/// Drives one backup run against a provider.
pub struct BackupOrchestrator {
    provider: Arc<dyn MediaProvider>,
    store: ManifestStore,
    backup_root: PathBuf,
    catalog: CatalogFetcher,
    transfer: Arc<TransferExecutor>,
    max_concurrent: usize,
    cancel_token: CancellationToken,
}

impl BackupOrchestrator {
    pub fn new(config: &Config, provider: Arc<dyn MediaProvider>, cancel_token: CancellationToken) -> Self {
        let retry = RetryPolicy::from_config(&config.transfer);
        let timeout = Duration::from_secs(config.transfer.request_timeout_secs);

        Self {
            catalog: CatalogFetcher::new(provider.clone(), &config.catalog, timeout, retry.clone()),
            transfer: Arc::new(TransferExecutor::new(provider.clone(), retry, timeout)),
            store: ManifestStore::new(&config.backup.manifest_path),
            backup_root: config.backup.root.clone(),
            max_concurrent: config.transfer.max_concurrent.max(1),
            provider,
            cancel_token,
        }
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Execute a run.
    ///
    /// Fatal conditions (authentication, catalog listing, corrupt manifest,
    /// path collisions, manifest I/O) return `Err` and leave the manifest at
    /// its last checkpoint. Per-item failures are reported in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::new();

        info!(
            "Starting backup of {} into {}",
            self.provider.name(),
            self.backup_root.display()
        );

        self.provider.authenticate().await?;

        let root = self.backup_root.clone();
        let removed = blocking(move || remove_stale_partials(&root)).await?;
        if removed > 0 {
            info!("Removed {} partial files from an interrupted run", removed);
        }

        let mut manifest = match self.store.load().await? {
            Some(manifest) => {
                info!("Resuming unfinished backup ({} items)", manifest.len());
                manifest
            }
            None => {
                let items = self.catalog.fetch_all(&self.cancel_token).await?;
                let manifest = Manifest::from_catalog(&items, &self.backup_root)?;
                self.store.save(&manifest).await?;
                manifest
            }
        };
        self.enter(&mut summary, RunState::Fetched);
        summary.total_items = manifest.len();

        let root = self.backup_root.clone();
        let inventory = blocking(move || scan_inventory(&root)).await?;
        let stats = reconcile::reconcile(&mut manifest, &inventory)?;
        self.store.save(&manifest).await?;
        summary.already_present = stats.present;
        info!(
            "Reconciled {} items: {} present locally, {} to transfer",
            manifest.len(),
            stats.present,
            stats.missing
        );
        self.enter(&mut summary, RunState::Reconciled);

        self.enter(&mut summary, RunState::InProgress);
        self.transfer_pending(&mut manifest, &mut summary).await?;

        summary.remaining = manifest
            .pending_ids()
            .into_iter()
            .filter(|id| !summary.failed.iter().any(|f| &f.id == id))
            .collect();
        summary.interrupted = self.cancel_token.is_cancelled() && !manifest.all_complete();

        if manifest.all_complete() && summary.failed.is_empty() {
            self.store.delete().await?;
            self.enter(&mut summary, RunState::Complete);
        } else {
            info!(
                "Keeping manifest {} for the next run ({} items outstanding)",
                self.store.path().display(),
                manifest.len() - manifest.completed_count()
            );
        }

        summary.duration = start.elapsed();
        Ok(summary)
    }

    fn enter(&self, summary: &mut RunSummary, state: RunState) {
        info!("Backup state {:?} -> {:?}", summary.state, state);
        summary.state = state;
    }

    /// Transfer every incomplete record. This task is the only writer of
    /// the manifest; workers report back over a channel.
    async fn transfer_pending(&self, manifest: &mut Manifest, summary: &mut RunSummary) -> Result<()> {
        let pending: Vec<MediaRecord> = manifest
            .iter()
            .filter(|record| !record.backup_complete)
            .cloned()
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        info!(
            "Transferring {} items ({} at a time)",
            pending.len(),
            self.max_concurrent
        );

        let mut progress = RunProgress::new(pending.len());
        let run_token = self.cancel_token.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let dispatcher = tokio::spawn(dispatch(
            pending,
            self.max_concurrent,
            self.transfer.clone(),
            tx,
            run_token.clone(),
        ));

        let mut outcome = Ok(());
        while let Some(completion) = rx.recv().await {
            if let Err(e) = self.checkpoint(manifest, summary, &mut progress, completion).await {
                error!("Stopping transfers: {}", e);
                run_token.cancel();
                outcome = Err(e);
                break;
            }
        }

        drop(rx);
        if let Err(e) = dispatcher.await {
            warn!("Transfer dispatcher failed: {}", e);
        }

        summary.transferred_bytes = progress.transferred_bytes;
        outcome
    }

    /// Apply one worker result to the manifest and persist it.
    async fn checkpoint(
        &self,
        manifest: &mut Manifest,
        summary: &mut RunSummary,
        progress: &mut RunProgress,
        completion: Completion,
    ) -> Result<()> {
        let Completion { id, result } = completion;

        match result {
            Ok(bytes) => {
                manifest.mark_complete(&id)?;
                self.store.save(manifest).await?;
                progress.record_success(bytes);
                summary.succeeded.push(id);
                info!(
                    "Progress: {} (eta {}s)",
                    progress.summary(),
                    progress.eta_seconds().unwrap_or(0)
                );
            }
            Err(BackupError::Cancelled) => {
                info!("Transfer of {} interrupted", id);
            }
            Err(e) => {
                warn!("Giving up on {} for this run: {}", id, e);
                progress.record_failure();
                summary.failed.push(ItemFailure {
                    id,
                    reason: e.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Start transfers in manifest order, at most `limit` at a time, and wait
/// for all of them to finish.
async fn dispatch(
    pending: Vec<MediaRecord>,
    limit: usize,
    executor: Arc<TransferExecutor>,
    tx: mpsc::UnboundedSender<Completion>,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut workers = JoinSet::new();

    for record in pending {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let executor = executor.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        workers.spawn(async move {
            let result = executor.transfer(&record, &cancel).await;
            let _ = tx.send(Completion {
                id: record.id,
                result,
            });
            drop(permit);
        });
    }

    drop(tx);
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!("Transfer task failed: {}", e);
        }
    }
}

/// Run blocking filesystem work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackupError::Io(std::io::Error::other(e)))?
        .map_err(BackupError::from)
}
