//! Remote queue on top of a paginated playlist provider.
//!
//! The provider lists a playlist in fixed pages of [`PAGE_SIZE`] items.
//! `item_at` walks page tokens from the first page until it reaches the page
//! holding `index`; if the playlist shrank in the meantime and that page no
//! longer exists, the item is simply "not found".

use std::sync::Arc;

use async_trait::async_trait;
use sleepy_proto::protocol::{ItemRef, QueueItem};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{PlaylistSource, SourceError};
use crate::youtube::auth::AuthError;

pub const PAGE_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// One entry of a provider page.  Entries without a video (deleted or
/// private uploads) are kept so that page offsets stay aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    /// Playlist-item id, used for deletion.
    pub id: String,
    pub video_id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<RemoteItem>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    async fn list_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page, ProviderError>;

    async fn count(&self, playlist_id: &str) -> Result<usize, ProviderError>;

    async fn item_title(&self, video_id: &str) -> Result<Option<String>, ProviderError>;

    async fn delete(&self, item_id: &str) -> Result<(), ProviderError>;
}

pub struct RemoteSource {
    provider: Arc<dyn PlaylistProvider>,
}

impl RemoteSource {
    pub fn new(provider: Arc<dyn PlaylistProvider>) -> Self {
        Self { provider }
    }

    pub fn watch_url(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", video_id)
    }

    fn wrap(locator: &str) -> impl FnOnce(ProviderError) -> SourceError + '_ {
        move |source| SourceError::Remote {
            locator: locator.to_string(),
            source,
        }
    }

    async fn resolve_title(&self, item: &RemoteItem, video_id: &str) -> String {
        if let Some(title) = item.title.as_deref().filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        match self.provider.item_title(video_id).await {
            Ok(Some(title)) => title,
            Ok(None) => video_id.to_string(),
            Err(e) => {
                warn!("failed to fetch title for {}: {}", video_id, e);
                video_id.to_string()
            }
        }
    }
}

#[async_trait]
impl PlaylistSource for RemoteSource {
    async fn count(&self, locator: &str) -> Result<usize, SourceError> {
        self.provider.count(locator).await.map_err(Self::wrap(locator))
    }

    async fn item_at(&self, locator: &str, index: usize) -> Result<Option<QueueItem>, SourceError> {
        let target_page = index / PAGE_SIZE;
        let offset = index % PAGE_SIZE;

        let mut token: Option<String> = None;
        for page_no in 0..target_page {
            let page = self
                .provider
                .list_page(locator, token.as_deref())
                .await
                .map_err(Self::wrap(locator))?;
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => {
                    info!(
                        "playlist {} ends at page {}, index {} unreachable",
                        locator, page_no, index
                    );
                    return Ok(None);
                }
            }
        }

        let page = self
            .provider
            .list_page(locator, token.as_deref())
            .await
            .map_err(Self::wrap(locator))?;
        let Some(item) = page.items.get(offset) else {
            debug!("playlist {} page {} has no offset {}", locator, target_page, offset);
            return Ok(None);
        };
        let Some(video_id) = item.video_id.as_deref() else {
            warn!("playlist item {} at index {} has no video", item.id, index);
            return Ok(None);
        };

        let title = self.resolve_title(item, video_id).await;
        Ok(Some(QueueItem {
            content_ref: Self::watch_url(video_id),
            title,
            item_ref: ItemRef(item.id.clone()),
        }))
    }

    async fn remove(&self, locator: &str, item: &ItemRef) -> Result<bool, SourceError> {
        self.provider
            .delete(&item.0)
            .await
            .map_err(Self::wrap(locator))?;
        info!("removed playlist item: {}", item);
        Ok(true)
    }
}
