//! Scripted in-memory provider used by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{MediaDownload, MediaPage, MediaProvider, RemoteMediaItem};
use crate::utils::errors::{BackupError, Result};

pub(crate) fn item(id: &str, filename: &str, created: &str) -> RemoteMediaItem {
    RemoteMediaItem {
        id: id.to_string(),
        filename: filename.to_string(),
        creation_time: created.to_string(),
        mime_type: Some("image/jpeg".to_string()),
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    /// Every download fails with a network error
    Always,
    /// The first `n` downloads fail with a network error
    Times(u32),
    /// The provider rejects the item outright
    Permanent,
    /// The stream ends before the announced length
    Truncated,
    /// The stream yields one chunk and then never finishes
    Stall,
}

pub(crate) struct ScriptedProvider {
    pages: Vec<Vec<RemoteMediaItem>>,
    endless: bool,
    auth_fails: bool,
    list_failures: AtomicU32,
    failures: Mutex<HashMap<String, Failure>>,
    downloads: Mutex<HashMap<String, u32>>,
    list_calls: AtomicUsize,
    authenticated: AtomicBool,
}

impl ScriptedProvider {
    /// Serve `pages` in order; page `i` is reached with token `page-i`.
    pub(crate) fn new(pages: Vec<Vec<RemoteMediaItem>>) -> Self {
        Self {
            pages,
            endless: false,
            auth_fails: false,
            list_failures: AtomicU32::new(0),
            failures: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            authenticated: AtomicBool::new(false),
        }
    }

    /// Always answer with the first page and the same non-empty token.
    pub(crate) fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    pub(crate) fn failing_auth(mut self) -> Self {
        self.auth_fails = true;
        self
    }

    /// Fail the next `n` listing calls with a network error.
    pub(crate) fn with_list_failures(self, n: u32) -> Self {
        self.list_failures.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_failure(self, id: &str, failure: Failure) -> Self {
        self.set_failure(id, failure);
        self
    }

    pub(crate) fn set_failure(&self, id: &str, failure: Failure) {
        self.failures.lock().unwrap().insert(id.to_string(), failure);
    }

    pub(crate) fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub(crate) fn content(id: &str) -> Vec<u8> {
        format!("content of {}", id).into_bytes()
    }

    pub(crate) fn download_count(&self, id: &str) -> u32 {
        self.downloads.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub(crate) fn total_downloads(&self) -> u32 {
        self.downloads.lock().unwrap().values().sum()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn page_index(&self, token: Option<&str>) -> Result<usize> {
        match token {
            None => Ok(0),
            Some(_) if self.endless => Ok(0),
            Some(t) => t
                .strip_prefix("page-")
                .and_then(|n| n.parse().ok())
                .filter(|&n: &usize| n < self.pages.len())
                .ok_or_else(|| BackupError::Provider {
                    status: 400,
                    message: format!("bad page token {}", t),
                }),
        }
    }
}

#[async_trait]
impl MediaProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn authenticate(&self) -> Result<()> {
        if self.auth_fails {
            return Err(BackupError::Authentication("token revoked".into()));
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_page(&self, page_token: Option<&str>, _page_size: u32) -> Result<MediaPage> {
        assert!(self.authenticated.load(Ordering::SeqCst), "listed before authenticate");
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackupError::Network("connection reset".into()));
        }

        if self.pages.is_empty() {
            return Ok(MediaPage::default());
        }

        let index = self.page_index(page_token)?;
        let next_page_token = if self.endless {
            Some("again".to_string())
        } else if index + 1 < self.pages.len() {
            Some(format!("page-{}", index + 1))
        } else {
            Some(String::new())
        };

        Ok(MediaPage {
            items: self.pages[index].clone(),
            next_page_token,
        })
    }

    async fn fetch_bytes(&self, item_id: &str) -> Result<MediaDownload> {
        let attempt = {
            let mut downloads = self.downloads.lock().unwrap();
            let count = downloads.entry(item_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let failure = self.failures.lock().unwrap().get(item_id).copied();
        let data = Self::content(item_id);
        let len = data.len() as u64;

        match failure {
            Some(Failure::Always) => Err(BackupError::Network("connection reset".into())),
            Some(Failure::Times(n)) if attempt <= n => {
                Err(BackupError::Network("connection reset".into()))
            }
            Some(Failure::Permanent) => Err(BackupError::Provider {
                status: 404,
                message: format!("{} not found", item_id),
            }),
            Some(Failure::Truncated) => {
                let half = Bytes::from(data[..data.len() / 2].to_vec());
                Ok(MediaDownload {
                    content_length: Some(len),
                    stream: stream::iter(vec![Ok(half)]).boxed(),
                })
            }
            Some(Failure::Stall) => {
                let first = Bytes::from(data[..1].to_vec());
                Ok(MediaDownload {
                    content_length: Some(len),
                    stream: stream::iter(vec![Ok(first)]).chain(stream::pending()).boxed(),
                })
            }
            _ => {
                let (head, tail) = data.split_at(data.len() / 2);
                let chunks = vec![Ok(Bytes::from(head.to_vec())), Ok(Bytes::from(tail.to_vec()))];
                Ok(MediaDownload {
                    content_length: Some(len),
                    stream: stream::iter(chunks).boxed(),
                })
            }
        }
    }
}
