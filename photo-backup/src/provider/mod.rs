//! Remote media providers.
//!
//! A provider exposes three capabilities: authenticate, list one page of the
//! library, and stream one item's bytes. Implementations are chosen by name
//! through [`ProviderRegistry`].

pub mod catalog;
pub mod google_photos;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::utils::errors::{BackupError, Result};

/// An item as reported by the remote listing API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMediaItem {
    pub id: String,
    pub filename: String,
    /// Creation instant exactly as the provider reported it
    pub creation_time: String,
    pub mime_type: Option<String>,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct MediaPage {
    pub items: Vec<RemoteMediaItem>,
    /// `None` or empty marks the final page
    pub next_page_token: Option<String>,
}

/// Streamed item content
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Download handle for one item
pub struct MediaDownload {
    /// Expected size, when the provider announces one
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

/// Capability interface every media provider implements.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Registry name, used in logs
    fn name(&self) -> &str;

    /// Establish a session. Must succeed before any other call.
    async fn authenticate(&self) -> Result<()>;

    /// Fetch one listing page. `page_token == None` requests the first page.
    async fn list_page(&self, page_token: Option<&str>, page_size: u32) -> Result<MediaPage>;

    /// Open a byte stream for one item.
    async fn fetch_bytes(&self, item_id: &str) -> Result<MediaDownload>;
}

/// Constructor stored in the registry
pub type ProviderConstructor = fn(&ProviderConfig) -> Result<Arc<dyn MediaProvider>>;

/// Explicit name → constructor mapping for media providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every provider shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(google_photos::PROVIDER_NAME, google_photos::construct);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: ProviderConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the provider named in `config`.
    pub fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn MediaProvider>> {
        let constructor = self
            .constructors
            .get(&config.name)
            .ok_or_else(|| BackupError::UnknownProvider {
                name: config.name.clone(),
                available: self.names(),
            })?;
        constructor(config)
    }
}
