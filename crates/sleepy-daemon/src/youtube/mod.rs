//! YouTube Data API v3 client for the remote playlist variant.

pub mod auth;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sleepy_proto::config::YoutubeConfig;
use tracing::{debug, info, warn};

use self::auth::{AuthError, TokenManager};
use crate::audio::{Cue, CuePlayer};
use crate::source::remote::{Page, RemoteItem, PAGE_SIZE};
use crate::source::{PlaylistProvider, PlaylistSource, ProviderError, RemoteConnector, RemoteSource};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    page_info: Option<PageInfo>,
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    total_results: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    id: String,
    #[serde(default)]
    snippet: Option<ItemSnippet>,
    #[serde(default)]
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSnippet {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
struct VideoSnippet {
    title: String,
}

impl PlaylistItem {
    fn into_remote(self) -> RemoteItem {
        let from_snippet = self
            .snippet
            .as_ref()
            .and_then(|s| s.resource_id.as_ref())
            .and_then(|r| r.video_id.clone());
        let video_id = self.content_details.map(|c| c.video_id).or(from_snippet);
        if video_id.is_none() {
            warn!("playlist item {} has no video id", self.id);
        }
        RemoteItem {
            id: self.id,
            video_id,
            title: self.snippet.and_then(|s| s.title),
        }
    }
}

/// Bearer-authenticated client over `playlistItems` and `videos`.
pub struct YoutubeClient {
    http: reqwest::Client,
    api_base: String,
    auth: Arc<TokenManager>,
}

impl YoutubeClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, auth: Arc<TokenManager>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}/{}", self.api_base, resource);
        debug!("GET {} {:?}", url, query);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PlaylistProvider for YoutubeClient {
    async fn list_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page, ProviderError> {
        let max_results = PAGE_SIZE.to_string();
        let mut query = vec![
            ("part", "snippet,contentDetails"),
            ("playlistId", playlist_id),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response: PlaylistItemsResponse = self.get("playlistItems", &query).await?;
        let items = response
            .items
            .into_iter()
            .map(PlaylistItem::into_remote)
            .collect();
        Ok(Page {
            items,
            next_page_token: response.next_page_token,
        })
    }

    async fn count(&self, playlist_id: &str) -> Result<usize, ProviderError> {
        let response: PlaylistItemsResponse = self
            .get(
                "playlistItems",
                &[("part", "id"), ("playlistId", playlist_id), ("maxResults", "1")],
            )
            .await?;
        Ok(response
            .page_info
            .map(|p| p.total_results)
            .unwrap_or(response.items.len()))
    }

    async fn item_title(&self, video_id: &str) -> Result<Option<String>, ProviderError> {
        let response: VideosResponse = self
            .get("videos", &[("part", "snippet"), ("id", video_id)])
            .await?;
        Ok(response.items.into_iter().next().map(|v| v.snippet.title))
    }

    async fn delete(&self, item_id: &str) -> Result<(), ProviderError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}/playlistItems", self.api_base);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(token)
            .query(&[("id", item_id)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Authenticates against YouTube and hands out the remote source.
pub struct YoutubeConnector {
    config: YoutubeConfig,
    http: reqwest::Client,
}

impl YoutubeConnector {
    pub fn new(config: YoutubeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RemoteConnector for YoutubeConnector {
    async fn connect(
        &mut self,
        cues: &mut dyn CuePlayer,
    ) -> Result<Arc<dyn PlaylistSource>, AuthError> {
        let manager = TokenManager::load(
            self.http.clone(),
            &self.config.client_secrets,
            self.config.token_file.clone(),
        )
        .await?
        .with_device_url(&self.config.device_code_url);
        if !manager.try_stored().await? {
            warn!("no valid YouTube credentials, starting device authorization");
            cues.play(Cue::Error).await;
            manager.acquire().await?;
        }
        info!("YouTube client authenticated");

        let client = YoutubeClient::new(self.http.clone(), &self.config.api_base, Arc::new(manager));
        Ok(Arc::new(RemoteSource::new(Arc::new(client))))
    }
}
