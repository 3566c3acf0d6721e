//! Full enumeration of a provider's library.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MediaPage, MediaProvider, RemoteMediaItem};
use crate::config::CatalogConfig;
use crate::utils::errors::{BackupError, Result};
use crate::utils::retry::RetryPolicy;

/// Walks every listing page of a provider and collects the complete catalog.
pub struct CatalogFetcher {
    provider: Arc<dyn MediaProvider>,
    page_size: u32,
    max_pages: usize,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl CatalogFetcher {
    pub fn new(
        provider: Arc<dyn MediaProvider>,
        config: &CatalogConfig,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            page_size: config.page_size,
            max_pages: config.max_pages,
            request_timeout,
            retry,
        }
    }

    /// Fetch every item, following page tokens until an empty one.
    ///
    /// Empty pages with a continuation token are followed. Items the
    /// provider repeats are kept once, at their first position. Fails with
    /// [`BackupError::PaginationExhausted`] once `max_pages` pages have been
    /// read without reaching the end.
    pub async fn fetch_all(&self, cancel: &CancellationToken) -> Result<Vec<RemoteMediaItem>> {
        let start = Instant::now();
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        info!("Listing media from {} (page size {})", self.provider.name(), self.page_size);

        loop {
            if pages >= self.max_pages {
                return Err(BackupError::PaginationExhausted { pages });
            }

            let page = self.fetch_page(page_token.as_deref(), pages + 1, cancel).await?;
            pages += 1;

            let page_len = page.items.len();
            for item in page.items {
                if seen.insert(item.id.clone()) {
                    items.push(item);
                } else {
                    warn!("Provider listed item {} more than once; keeping first", item.id);
                }
            }

            debug!("Page {}: {} items ({} total)", pages, page_len, items.len());

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        info!(
            "Listed {} items in {} pages ({:.1}s)",
            items.len(),
            pages,
            start.elapsed().as_secs_f64()
        );
        Ok(items)
    }

    async fn fetch_page(
        &self,
        page_token: Option<&str>,
        number: usize,
        cancel: &CancellationToken,
    ) -> Result<MediaPage> {
        let what = format!("Listing page {}", number);

        self.retry
            .run(&what, cancel, || async {
                tokio::select! {
                    result = tokio::time::timeout(
                        self.request_timeout,
                        self.provider.list_page(page_token, self.page_size),
                    ) => result.map_err(|_| BackupError::Timeout(what.clone()))?,
                    _ = cancel.cancelled() => Err(BackupError::Cancelled),
                }
            })
            .await
    }
}
