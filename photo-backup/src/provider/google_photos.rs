//! Google Photos Library API provider.
//!
//! Listing uses `mediaItems.list`; downloads re-read the item to obtain a
//! fresh `baseUrl` (they expire after about an hour) and fetch the original
//! bytes from it. Obtaining and refreshing the OAuth token is left to an
//! external tool; this provider only reads the resulting access token.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::{MediaDownload, MediaPage, MediaProvider, RemoteMediaItem};
use crate::config::ProviderConfig;
use crate::utils::errors::{BackupError, Result};

pub const PROVIDER_NAME: &str = "google-photos";

/// Largest page the API accepts
const MAX_PAGE_SIZE: u32 = 100;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMediaItemsResponse {
    #[serde(default)]
    media_items: Vec<GoogleMediaItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleMediaItem {
    id: String,
    filename: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    media_metadata: MediaMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaMetadata {
    creation_time: String,
}

/// Token file as written by common OAuth helpers
#[derive(Debug, Deserialize)]
struct TokenFile {
    #[serde(alias = "token")]
    access_token: String,
}

impl From<GoogleMediaItem> for RemoteMediaItem {
    fn from(item: GoogleMediaItem) -> Self {
        RemoteMediaItem {
            id: item.id,
            filename: item.filename,
            creation_time: item.media_metadata.creation_time,
            mime_type: item.mime_type,
        }
    }
}

pub struct GooglePhotosProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    access_token: RwLock<Option<String>>,
}

/// Registry constructor
pub fn construct(config: &ProviderConfig) -> Result<Arc<dyn MediaProvider>> {
    Ok(Arc::new(GooglePhotosProvider::new(config.clone())?))
}

impl GooglePhotosProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("photo-backup/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            access_token: RwLock::new(None),
        })
    }

    async fn bearer(&self) -> Result<String> {
        self.access_token
            .read()
            .await
            .as_ref()
            .map(|token| format!("Bearer {}", token))
            .ok_or_else(|| BackupError::Authentication("not authenticated".into()))
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<bytes::Bytes> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer().await?)
            .query(query)
            .send()
            .await?;

        Ok(check_status(response).await?.bytes().await?)
    }
}

#[async_trait]
impl MediaProvider for GooglePhotosProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn authenticate(&self) -> Result<()> {
        let token = match (&self.config.access_token, &self.config.token_file) {
            (Some(token), _) => token.clone(),
            (None, Some(path)) => read_token_file(path).await?,
            (None, None) => {
                return Err(BackupError::Authentication(
                    "no access_token or token_file configured".into(),
                ))
            }
        };

        if token.trim().is_empty() {
            return Err(BackupError::Authentication("access token is empty".into()));
        }

        *self.access_token.write().await = Some(token);
        info!("Authenticated with Google Photos");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_page(&self, page_token: Option<&str>, page_size: u32) -> Result<MediaPage> {
        let url = format!("{}/mediaItems", self.config.api_base);
        let mut query = vec![("pageSize", page_size.clamp(1, MAX_PAGE_SIZE).to_string())];
        if let Some(token) = page_token.filter(|t| !t.is_empty()) {
            query.push(("pageToken", token.to_string()));
        }

        let body = self.get_json(&url, &query).await?;
        let page = parse_list_response(&body)?;
        debug!("Listed {} media items", page.items.len());
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn fetch_bytes(&self, item_id: &str) -> Result<MediaDownload> {
        let url = format!("{}/mediaItems/{}", self.config.api_base, item_id);
        let body = self.get_json(&url, &[]).await?;
        let item: GoogleMediaItem = serde_json::from_slice(&body)?;

        let base_url = item.base_url.ok_or_else(|| BackupError::Provider {
            status: 200,
            message: format!("media item {} has no baseUrl", item_id),
        })?;

        let response = self
            .client
            .get(download_url(&base_url, item.mime_type.as_deref()))
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(MediaDownload {
            content_length: response.content_length(),
            stream: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(BackupError::from))
                .boxed(),
        })
    }
}

fn parse_list_response(body: &[u8]) -> Result<MediaPage> {
    let response: ListMediaItemsResponse = serde_json::from_slice(body)?;
    Ok(MediaPage {
        items: response.media_items.into_iter().map(RemoteMediaItem::from).collect(),
        next_page_token: response.next_page_token,
    })
}

/// Original-quality download URL: `=dv` for videos, `=d` for everything else.
fn download_url(base_url: &str, mime_type: Option<&str>) -> String {
    let is_video = mime_type.is_some_and(|m| m.starts_with("video/"));
    format!("{}={}", base_url, if is_video { "dv" } else { "d" })
}

async fn read_token_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        BackupError::Authentication(format!("cannot read token file {}: {}", path.display(), e))
    })?;
    let token: TokenFile = serde_json::from_slice(&bytes).map_err(|e| {
        BackupError::Authentication(format!("invalid token file {}: {}", path.display(), e))
    })?;
    Ok(token.access_token)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(BackupError::Authentication(format!("{}: {}", status, message))),
        code => Err(BackupError::Provider {
            status: code,
            message,
        }),
    }
}
